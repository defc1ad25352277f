//! Wire-neutral description of the X11 traffic the core produces and consumes.
//!
//! Backends translate [`Request`]s into real protocol requests (or simulate them) and hand back
//! [`Reply`]s and [`Event`]s. Everything above the backend only ever sees these types.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
pub use x11rb::protocol::xproto::{Atom, EventMask, Pixmap, Timestamp, Visualid, Window};
pub use x11rb::protocol::damage::Damage;

use crate::region::Rect;

pub mod atoms;
pub mod property;

pub use atoms::Atoms;
pub use property::PropertyReply;

pub const NONE: u32 = 0;
pub const CURRENT_TIME: Timestamp = 0;

/// `AnyPropertyType` for GetProperty.
pub const ANY_PROPERTY_TYPE: Atom = 0;

/// Geometry snapshot of a window, relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub border_width: i32,
    pub depth: u8,
}

impl Geometry {
    /// Inner area, excluding the border.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Area on the parent including the border on both sides.
    pub fn outer_rect(&self) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.width + 2 * self.border_width,
            self.height + 2 * self.border_width,
        )
    }

    pub fn same_size(&self, other: &Geometry) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.border_width == other.border_width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MapState {
    #[default]
    Unmapped,
    Unviewable,
    Viewable,
}

/// Attribute snapshot of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Attributes {
    pub map_state: MapState,
    pub override_redirect: bool,
    pub input_only: bool,
    pub visual: Visualid,
}

/// Result of QueryTree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub root: Window,
    pub parent: Window,
    pub children: Vec<Window>,
}

/// Result of ShapeQueryExtents for the bounding shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShapeExtents {
    pub bounding_shaped: bool,
    pub bounding: Rect,
}

/// Which manager selection a [`Request::SendManagerMessage`] announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerMessage {
    pub root: Window,
    pub manager_atom: Atom,
    pub time: Timestamp,
    pub selection: Atom,
    pub owner: Window,
}

/// Requests the core issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetGeometry(Window),
    GetWindowAttributes(Window),
    QueryTree(Window),
    SelectInput {
        window: Window,
        mask: EventMask,
    },
    InternAtom {
        name: String,
        only_if_exists: bool,
    },
    GetProperty {
        window: Window,
        property: Atom,
        type_: Atom,
        long_length: u32,
    },
    ChangeProperty {
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        append: bool,
        data: Vec<u8>,
    },
    DeleteProperty {
        window: Window,
        property: Atom,
    },
    /// Creates an unmapped 1x1 input-only child of the root, used to own selections.
    CreateOwnerWindow {
        window: Window,
        root: Window,
    },
    DestroyWindow(Window),
    GetSelectionOwner(Atom),
    SetSelectionOwner {
        owner: Window,
        selection: Atom,
        time: Timestamp,
    },
    SendManagerMessage(ManagerMessage),
    RedirectWindow(Window),
    UnredirectWindow(Window),
    NameWindowPixmap {
        window: Window,
        pixmap: Pixmap,
    },
    FreePixmap(Pixmap),
    DamageCreate {
        damage: Damage,
        drawable: Window,
    },
    DamageDestroy(Damage),
    DamageSubtract(Damage),
    ShapeSelectInput {
        window: Window,
        enable: bool,
    },
    ShapeQueryExtents(Window),
    ShapeGetRectangles(Window),
    SelectScreenChange(Window),
}

/// What a reply to a [`Request`] looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Void,
    Geometry,
    Attributes,
    Tree,
    Atom,
    Property,
    SelectionOwner,
    ShapeExtents,
    ShapeRectangles,
}

impl Request {
    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            Request::GetGeometry(_) => ReplyKind::Geometry,
            Request::GetWindowAttributes(_) => ReplyKind::Attributes,
            Request::QueryTree(_) => ReplyKind::Tree,
            Request::InternAtom { .. } => ReplyKind::Atom,
            Request::GetProperty { .. } => ReplyKind::Property,
            Request::GetSelectionOwner(_) => ReplyKind::SelectionOwner,
            Request::ShapeQueryExtents(_) => ReplyKind::ShapeExtents,
            Request::ShapeGetRectangles(_) => ReplyKind::ShapeRectangles,
            _ => ReplyKind::Void,
        }
    }

    /// Protocol name of the request, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetGeometry(_) => "GetGeometry",
            Request::GetWindowAttributes(_) => "GetWindowAttributes",
            Request::QueryTree(_) => "QueryTree",
            Request::SelectInput { .. } => "ChangeWindowAttributes",
            Request::InternAtom { .. } => "InternAtom",
            Request::GetProperty { .. } => "GetProperty",
            Request::ChangeProperty { .. } => "ChangeProperty",
            Request::DeleteProperty { .. } => "DeleteProperty",
            Request::CreateOwnerWindow { .. } => "CreateWindow",
            Request::DestroyWindow(_) => "DestroyWindow",
            Request::GetSelectionOwner(_) => "GetSelectionOwner",
            Request::SetSelectionOwner { .. } => "SetSelectionOwner",
            Request::SendManagerMessage(_) => "SendEvent",
            Request::RedirectWindow(_) => "CompositeRedirectWindow",
            Request::UnredirectWindow(_) => "CompositeUnredirectWindow",
            Request::NameWindowPixmap { .. } => "CompositeNameWindowPixmap",
            Request::FreePixmap(_) => "FreePixmap",
            Request::DamageCreate { .. } => "DamageCreate",
            Request::DamageDestroy(_) => "DamageDestroy",
            Request::DamageSubtract(_) => "DamageSubtract",
            Request::ShapeSelectInput { .. } => "ShapeSelectInput",
            Request::ShapeQueryExtents(_) => "ShapeQueryExtents",
            Request::ShapeGetRectangles(_) => "ShapeGetRectangles",
            Request::SelectScreenChange(_) => "RRSelectInput",
        }
    }
}

/// Replies the core collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Void,
    Geometry(Geometry),
    Attributes(Attributes),
    Tree(Tree),
    Atom(Atom),
    Property(PropertyReply),
    SelectionOwner(Window),
    ShapeExtents(ShapeExtents),
    ShapeRectangles(Vec<Rect>),
}

/// Conversion from an untyped [`Reply`] to the value a [`Token`] promises.
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> Option<Self>;
}

macro_rules! from_reply {
    ($ty:ty, $variant:ident) => {
        impl FromReply for $ty {
            fn from_reply(reply: Reply) -> Option<Self> {
                match reply {
                    Reply::$variant(x) => Some(x),
                    _ => None,
                }
            }
        }
    };
}

from_reply!(Geometry, Geometry);
from_reply!(Attributes, Attributes);
from_reply!(Tree, Tree);
from_reply!(PropertyReply, Property);
from_reply!(ShapeExtents, ShapeExtents);
from_reply!(Vec<Rect>, ShapeRectangles);

/// Reply to InternAtom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interned(pub Atom);

/// Reply to GetSelectionOwner; `NONE` when unowned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOwner(pub Window);

impl FromReply for Interned {
    fn from_reply(reply: Reply) -> Option<Self> {
        match reply {
            Reply::Atom(atom) => Some(Interned(atom)),
            _ => None,
        }
    }
}

impl FromReply for SelectionOwner {
    fn from_reply(reply: Reply) -> Option<Self> {
        match reply {
            Reply::SelectionOwner(owner) => Some(SelectionOwner(owner)),
            _ => None,
        }
    }
}

impl FromReply for () {
    fn from_reply(reply: Reply) -> Option<Self> {
        matches!(reply, Reply::Void).then_some(())
    }
}

/// Correlation token for a submitted request.
///
/// Returned immediately on submission; the reply is collected later through
/// [`Connection::reply`](crate::connection::Connection::reply).
#[must_use = "replies must be collected or discarded"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Token<T> {
    pub(crate) seq: u64,
    _reply: PhantomData<fn() -> T>,
}

impl<T> Token<T> {
    pub(crate) fn new(seq: u64) -> Self {
        Self {
            seq,
            _reply: PhantomData,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

/// Error codes the core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Window,
    Drawable,
    Pixmap,
    Match,
    Value,
    Atom,
    Access,
    Alloc,
    IdChoice,
    Damage,
    Other(u8),
}

impl ErrorCode {
    /// Whether the error means the window (or something hanging off it) is gone.
    pub fn is_gone(self) -> bool {
        matches!(
            self,
            ErrorCode::Window | ErrorCode::Drawable | ErrorCode::Pixmap | ErrorCode::Damage
        )
    }
}

/// A protocol error reply or error event, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub request: Option<&'static str>,
    pub bad_value: u32,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} error in {} (bad value {:#x})",
            self.code,
            self.request.unwrap_or("unknown request"),
            self.bad_value,
        )
    }
}

impl std::error::Error for ProtocolError {}

/// Events the core reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateNotify {
        parent: Window,
        window: Window,
    },
    MapNotify {
        event: Window,
        window: Window,
        override_redirect: bool,
    },
    UnmapNotify {
        event: Window,
        window: Window,
    },
    DestroyNotify {
        event: Window,
        window: Window,
    },
    ReparentNotify {
        event: Window,
        window: Window,
        parent: Window,
    },
    ConfigureNotify {
        event: Window,
        window: Window,
        geometry: Geometry,
        override_redirect: bool,
    },
    PropertyNotify {
        window: Window,
        atom: Atom,
        time: Timestamp,
        deleted: bool,
    },
    SelectionClear {
        owner: Window,
        selection: Atom,
        time: Timestamp,
    },
    DamageNotify {
        drawable: Window,
        damage: Damage,
        area: Rect,
        more: bool,
    },
    ShapeNotify {
        window: Window,
        shaped: bool,
    },
    ScreenChange {
        root: Window,
        width: i32,
        height: i32,
    },
    Error(ProtocolError),
}

impl Event {
    /// The window an event is about, if any.
    pub fn window(&self) -> Option<Window> {
        match *self {
            Event::CreateNotify { window, .. }
            | Event::MapNotify { window, .. }
            | Event::UnmapNotify { window, .. }
            | Event::DestroyNotify { window, .. }
            | Event::ReparentNotify { window, .. }
            | Event::ConfigureNotify { window, .. }
            | Event::PropertyNotify { window, .. }
            | Event::ShapeNotify { window, .. } => Some(window),
            Event::DamageNotify { drawable, .. } => Some(drawable),
            Event::SelectionClear { owner, .. } => Some(owner),
            Event::ScreenChange { root, .. } => Some(root),
            Event::Error(_) => None,
        }
    }
}

/// Version of an extension found on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtensionVersion {
    pub major: u32,
    pub minor: u32,
}

/// Extensions discovered at startup; `None` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Extensions {
    pub composite: Option<ExtensionVersion>,
    pub damage: Option<ExtensionVersion>,
    pub xfixes: Option<ExtensionVersion>,
    pub shape: Option<ExtensionVersion>,
    pub randr: Option<ExtensionVersion>,
}

/// Static information about the screen the connection manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub number: usize,
    pub root: Window,
    pub width: i32,
    pub height: i32,
    pub root_depth: u8,
    pub root_visual: Visualid,
}
