use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::Duration;

use anyhow::Context;
use x11rb::connection::{Connection as _, DiscardMode, RequestConnection, RequestKind};
use x11rb::cookie::{Cookie, VoidCookie};
use x11rb::errors::{ConnectionError, ParseError, ReplyError, ReplyOrIdError};
use x11rb::protocol::composite::{ConnectionExt as _, Redirect};
use x11rb::protocol::damage::{ConnectionExt as _, ReportLevel};
use x11rb::protocol::randr::{ConnectionExt as _, NotifyMask};
use x11rb::protocol::shape::{self, ConnectionExt as _, SK};
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{self, ConnectionExt as _};
use x11rb::protocol::{composite, damage, randr, xfixes, ErrorKind, Event as XEvent};
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::{TryParse, X11Error};

use crate::clock::Clock;
use crate::connection::RequestError;
use crate::protocol::{
    Attributes, ErrorCode, Event, ExtensionVersion, Extensions, Geometry, MapState,
    PropertyReply, ProtocolError, Reply, ReplyKind, Request, ScreenInfo, ShapeExtents, Tree,
};
use crate::region::Rect;

/// Set in a DamageNotify level when more notifications of the same batch follow.
const DAMAGE_MORE: u8 = 0x80;

/// Backend talking to a real X server through x11rb.
pub struct X11 {
    conn: RustConnection,
    screen: ScreenInfo,
    clock: Clock,
}

impl X11 {
    pub fn connect(display: Option<&str>) -> anyhow::Result<Self> {
        let (conn, number) = x11rb::connect(display).context("error connecting to X server")?;

        let setup = conn.setup();
        let root = setup
            .roots
            .get(number)
            .with_context(|| format!("X server has no screen {number}"))?;
        let screen = ScreenInfo {
            number,
            root: root.root,
            width: i32::from(root.width_in_pixels),
            height: i32::from(root.height_in_pixels),
            root_depth: root.root_depth,
            root_visual: root.root_visual,
        };

        debug!(
            "connected to X server, screen {number} is {}x{}",
            screen.width, screen.height
        );

        Ok(Self {
            conn,
            screen,
            clock: Clock::default(),
        })
    }

    /// File descriptor of the connection, for event loop registration.
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.conn.stream().as_fd()
    }

    pub fn screen(&self) -> ScreenInfo {
        self.screen
    }

    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    pub fn send(&mut self, request: Request) -> Result<u64, ConnectionError> {
        let conn = &self.conn;
        let seq = match request {
            Request::GetGeometry(window) => detach(conn.get_geometry(window)?),
            Request::GetWindowAttributes(window) => detach(conn.get_window_attributes(window)?),
            Request::QueryTree(window) => detach(conn.query_tree(window)?),
            Request::SelectInput { window, mask } => {
                let aux = xproto::ChangeWindowAttributesAux::new().event_mask(mask);
                detach_void(conn.change_window_attributes(window, &aux)?)
            }
            Request::InternAtom {
                name,
                only_if_exists,
            } => detach(conn.intern_atom(only_if_exists, name.as_bytes())?),
            Request::GetProperty {
                window,
                property,
                type_,
                long_length,
            } => detach(conn.get_property(false, window, property, type_, 0, long_length)?),
            Request::ChangeProperty {
                window,
                property,
                type_,
                format,
                append,
                data,
            } => {
                let mode = if append {
                    xproto::PropMode::APPEND
                } else {
                    xproto::PropMode::REPLACE
                };
                let len = data.len() as u32 / u32::from(format / 8).max(1);
                detach_void(conn.change_property(mode, window, property, type_, format, len, &data)?)
            }
            Request::DeleteProperty { window, property } => {
                detach_void(conn.delete_property(window, property)?)
            }
            Request::CreateOwnerWindow { window, root } => {
                let aux = xproto::CreateWindowAux::new().override_redirect(1);
                detach_void(conn.create_window(
                    x11rb::COPY_DEPTH_FROM_PARENT,
                    window,
                    root,
                    -1,
                    -1,
                    1,
                    1,
                    0,
                    xproto::WindowClass::INPUT_ONLY,
                    x11rb::COPY_FROM_PARENT,
                    &aux,
                )?)
            }
            Request::DestroyWindow(window) => detach_void(conn.destroy_window(window)?),
            Request::GetSelectionOwner(selection) => detach(conn.get_selection_owner(selection)?),
            Request::SetSelectionOwner {
                owner,
                selection,
                time,
            } => detach_void(conn.set_selection_owner(owner, selection, time)?),
            Request::SendManagerMessage(msg) => {
                let event = xproto::ClientMessageEvent::new(
                    32,
                    msg.root,
                    msg.manager_atom,
                    [msg.time, msg.selection, msg.owner, 0, 0],
                );
                detach_void(conn.send_event(
                    false,
                    msg.root,
                    xproto::EventMask::STRUCTURE_NOTIFY,
                    event,
                )?)
            }
            // Automatic redirection keeps the server painting windows; the pixels are still
            // readable through the named pixmap.
            Request::RedirectWindow(window) => {
                detach_void(conn.composite_redirect_window(window, Redirect::AUTOMATIC)?)
            }
            Request::UnredirectWindow(window) => {
                detach_void(conn.composite_unredirect_window(window, Redirect::AUTOMATIC)?)
            }
            Request::NameWindowPixmap { window, pixmap } => {
                detach_void(conn.composite_name_window_pixmap(window, pixmap)?)
            }
            Request::FreePixmap(pixmap) => detach_void(conn.free_pixmap(pixmap)?),
            Request::DamageCreate { damage, drawable } => {
                detach_void(conn.damage_create(damage, drawable, ReportLevel::RAW_RECTANGLES)?)
            }
            Request::DamageDestroy(damage) => detach_void(conn.damage_destroy(damage)?),
            Request::DamageSubtract(damage) => {
                detach_void(conn.damage_subtract(damage, x11rb::NONE, x11rb::NONE)?)
            }
            Request::ShapeSelectInput { window, enable } => {
                detach_void(conn.shape_select_input(window, enable)?)
            }
            Request::ShapeQueryExtents(window) => detach(conn.shape_query_extents(window)?),
            Request::ShapeGetRectangles(window) => {
                detach(conn.shape_get_rectangles(window, SK::BOUNDING)?)
            }
            Request::SelectScreenChange(window) => {
                detach_void(conn.randr_select_input(window, NotifyMask::SCREEN_CHANGE)?)
            }
        };
        Ok(seq)
    }

    pub fn wait_for_reply(&mut self, seq: u64, kind: ReplyKind) -> Result<Reply, RequestError> {
        if kind == ReplyKind::Void {
            return match self.conn.check_for_raw_error(seq)? {
                None => Ok(Reply::Void),
                Some(buf) => {
                    let err = self
                        .conn
                        .parse_error(&buf)
                        .map_err(ConnectionError::ParseError)?;
                    Err(protocol_error(&err).into())
                }
            };
        }

        let buf = match self.conn.wait_for_reply_or_error(seq) {
            Ok(buf) => buf,
            Err(ReplyError::ConnectionError(err)) => return Err(err.into()),
            Err(ReplyError::X11Error(err)) => return Err(protocol_error(&err).into()),
        };

        parse_reply(kind, &buf).map_err(|err| RequestError::from(ConnectionError::ParseError(err)))
    }

    pub fn discard_reply(&mut self, seq: u64, kind: ReplyKind) {
        let kind = if kind == ReplyKind::Void {
            RequestKind::IsVoid
        } else {
            RequestKind::HasResponse
        };
        self.conn
            .discard_reply(seq, kind, DiscardMode::DiscardReply);
    }

    pub fn poll_for_event(&mut self) -> Result<Option<Event>, ConnectionError> {
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = convert_event(event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    pub fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<Event>, ConnectionError> {
        if let Some(event) = self.poll_for_event()? {
            return Ok(Some(event));
        }

        self.conn.flush()?;

        let mut pollfd = libc::pollfd {
            fd: self.conn.stream().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = timeout.as_millis().min(i32::MAX as u128) as i32;
        // SAFETY: pollfd points to one valid pollfd for the duration of the call.
        let ret = unsafe { libc::poll(&mut pollfd, 1, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }

        self.poll_for_event()
    }

    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        self.conn.flush()
    }

    pub fn generate_id(&mut self) -> Result<u32, RequestError> {
        match self.conn.generate_id() {
            Ok(id) => Ok(id),
            Err(ReplyOrIdError::ConnectionError(err)) => Err(err.into()),
            Err(ReplyOrIdError::X11Error(err)) => Err(protocol_error(&err).into()),
            Err(ReplyOrIdError::IdsExhausted) => Err(RequestError::IdsExhausted),
        }
    }

    pub fn query_extensions(&mut self) -> Result<Extensions, ConnectionError> {
        let _span = tracy_client::span!("X11::query_extensions");

        let conn = &self.conn;
        let present = |name: &'static str| -> Result<bool, ConnectionError> {
            Ok(conn.extension_information(name)?.is_some())
        };

        let mut ext = Extensions::default();

        if present(composite::X11_EXTENSION_NAME)? {
            ext.composite = version(conn.composite_query_version(0, 4)?.reply(), |r| {
                (r.major_version, r.minor_version)
            })?;
        }
        if present(damage::X11_EXTENSION_NAME)? {
            ext.damage = version(conn.damage_query_version(1, 1)?.reply(), |r| {
                (r.major_version, r.minor_version)
            })?;
        }
        if present(xfixes::X11_EXTENSION_NAME)? {
            ext.xfixes = version(conn.xfixes_query_version(5, 0)?.reply(), |r| {
                (r.major_version, r.minor_version)
            })?;
        }
        if present(shape::X11_EXTENSION_NAME)? {
            ext.shape = version(conn.shape_query_version()?.reply(), |r| {
                (u32::from(r.major_version), u32::from(r.minor_version))
            })?;
        }
        if present(randr::X11_EXTENSION_NAME)? {
            ext.randr = version(conn.randr_query_version(1, 5)?.reply(), |r| {
                (r.major_version, r.minor_version)
            })?;
        }

        Ok(ext)
    }
}

/// Keeps the reply for later collection by sequence number.
fn detach<R: TryParse>(cookie: Cookie<'_, RustConnection, R>) -> u64 {
    let seq = cookie.sequence_number();
    // Dropping the cookie would discard the reply.
    mem::forget(cookie);
    seq
}

fn detach_void(cookie: VoidCookie<'_, RustConnection>) -> u64 {
    let seq = cookie.sequence_number();
    mem::forget(cookie);
    seq
}

fn version<R>(
    reply: Result<R, ReplyError>,
    f: impl FnOnce(R) -> (u32, u32),
) -> Result<Option<ExtensionVersion>, ConnectionError> {
    match reply {
        Ok(reply) => {
            let (major, minor) = f(reply);
            Ok(Some(ExtensionVersion { major, minor }))
        }
        Err(ReplyError::ConnectionError(err)) => Err(err),
        Err(ReplyError::X11Error(err)) => {
            warn!("extension version query failed: {err:?}");
            Ok(None)
        }
    }
}

fn protocol_error(err: &X11Error) -> ProtocolError {
    let code = match err.error_kind {
        ErrorKind::Window => ErrorCode::Window,
        ErrorKind::Drawable => ErrorCode::Drawable,
        ErrorKind::Pixmap => ErrorCode::Pixmap,
        ErrorKind::Match => ErrorCode::Match,
        ErrorKind::Value => ErrorCode::Value,
        ErrorKind::Atom => ErrorCode::Atom,
        ErrorKind::Access => ErrorCode::Access,
        ErrorKind::Alloc => ErrorCode::Alloc,
        ErrorKind::IDChoice => ErrorCode::IdChoice,
        ErrorKind::DamageBadDamage => ErrorCode::Damage,
        _ => ErrorCode::Other(err.error_code),
    };

    ProtocolError {
        code,
        request: err.request_name,
        bad_value: err.bad_value,
    }
}

fn parse_reply(kind: ReplyKind, buf: &[u8]) -> Result<Reply, ParseError> {
    let reply = match kind {
        ReplyKind::Void => Reply::Void,
        ReplyKind::Geometry => {
            let (r, _) = xproto::GetGeometryReply::try_parse(buf)?;
            Reply::Geometry(Geometry {
                x: i32::from(r.x),
                y: i32::from(r.y),
                width: i32::from(r.width),
                height: i32::from(r.height),
                border_width: i32::from(r.border_width),
                depth: r.depth,
            })
        }
        ReplyKind::Attributes => {
            let (r, _) = xproto::GetWindowAttributesReply::try_parse(buf)?;
            let map_state = match r.map_state {
                xproto::MapState::VIEWABLE => MapState::Viewable,
                xproto::MapState::UNVIEWABLE => MapState::Unviewable,
                _ => MapState::Unmapped,
            };
            Reply::Attributes(Attributes {
                map_state,
                override_redirect: r.override_redirect,
                input_only: r.class == xproto::WindowClass::INPUT_ONLY,
                visual: r.visual,
            })
        }
        ReplyKind::Tree => {
            let (r, _) = xproto::QueryTreeReply::try_parse(buf)?;
            Reply::Tree(Tree {
                root: r.root,
                parent: r.parent,
                children: r.children,
            })
        }
        ReplyKind::Atom => {
            let (r, _) = xproto::InternAtomReply::try_parse(buf)?;
            Reply::Atom(r.atom)
        }
        ReplyKind::Property => {
            let (r, _) = xproto::GetPropertyReply::try_parse(buf)?;
            Reply::Property(PropertyReply {
                type_: r.type_,
                format: r.format,
                value: r.value,
            })
        }
        ReplyKind::SelectionOwner => {
            let (r, _) = xproto::GetSelectionOwnerReply::try_parse(buf)?;
            Reply::SelectionOwner(r.owner)
        }
        ReplyKind::ShapeExtents => {
            let (r, _) = shape::QueryExtentsReply::try_parse(buf)?;
            Reply::ShapeExtents(ShapeExtents {
                bounding_shaped: r.bounding_shaped,
                bounding: Rect::new(
                    i32::from(r.bounding_shape_extents_x),
                    i32::from(r.bounding_shape_extents_y),
                    i32::from(r.bounding_shape_extents_width),
                    i32::from(r.bounding_shape_extents_height),
                ),
            })
        }
        ReplyKind::ShapeRectangles => {
            let (r, _) = shape::GetRectanglesReply::try_parse(buf)?;
            Reply::ShapeRectangles(r.rectangles.iter().map(rect).collect())
        }
    };
    Ok(reply)
}

fn rect(r: &xproto::Rectangle) -> Rect {
    Rect::new(
        i32::from(r.x),
        i32::from(r.y),
        i32::from(r.width),
        i32::from(r.height),
    )
}

fn convert_event(event: XEvent) -> Option<Event> {
    let event = match event {
        XEvent::CreateNotify(e) => Event::CreateNotify {
            parent: e.parent,
            window: e.window,
        },
        XEvent::MapNotify(e) => Event::MapNotify {
            event: e.event,
            window: e.window,
            override_redirect: e.override_redirect,
        },
        XEvent::UnmapNotify(e) => Event::UnmapNotify {
            event: e.event,
            window: e.window,
        },
        XEvent::DestroyNotify(e) => Event::DestroyNotify {
            event: e.event,
            window: e.window,
        },
        XEvent::ReparentNotify(e) => Event::ReparentNotify {
            event: e.event,
            window: e.window,
            parent: e.parent,
        },
        XEvent::ConfigureNotify(e) => Event::ConfigureNotify {
            event: e.event,
            window: e.window,
            geometry: Geometry {
                x: i32::from(e.x),
                y: i32::from(e.y),
                width: i32::from(e.width),
                height: i32::from(e.height),
                border_width: i32::from(e.border_width),
                depth: 0,
            },
            override_redirect: e.override_redirect,
        },
        XEvent::PropertyNotify(e) => Event::PropertyNotify {
            window: e.window,
            atom: e.atom,
            time: e.time,
            deleted: e.state == xproto::Property::DELETE,
        },
        XEvent::SelectionClear(e) => Event::SelectionClear {
            owner: e.owner,
            selection: e.selection,
            time: e.time,
        },
        XEvent::DamageNotify(e) => Event::DamageNotify {
            drawable: e.drawable,
            damage: e.damage,
            area: rect(&e.area),
            more: u8::from(e.level) & DAMAGE_MORE != 0,
        },
        XEvent::ShapeNotify(e) if e.shape_kind == SK::BOUNDING => Event::ShapeNotify {
            window: e.affected_window,
            shaped: e.shaped,
        },
        XEvent::RandrScreenChangeNotify(e) => Event::ScreenChange {
            root: e.root,
            width: i32::from(e.width),
            height: i32::from(e.height),
        },
        XEvent::Error(err) => Event::Error(protocol_error(&err)),
        other => {
            trace!("ignoring event {other:?}");
            return None;
        }
    };
    Some(event)
}
