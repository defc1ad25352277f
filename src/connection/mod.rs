//! The connection to the X server.
//!
//! Requests are submitted without blocking and answered through [`Token`]s collected later, in
//! any order. Incoming events go through an explicit queue so that code handling one event can
//! look ahead at what is already received but not yet dispatched.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;

use x11rb::errors::ConnectionError;

use crate::backend::Backend;
use crate::clock::Clock;
use crate::protocol::{
    Atom, Attributes, Event, EventMask, FromReply, Geometry, Interned, Pixmap, PropertyReply,
    ProtocolError, ReplyKind, Request, ScreenInfo, SelectionOwner, ShapeExtents, Token, Tree,
    Window, ANY_PROPERTY_TYPE,
};
use crate::region::Rect;

pub mod extensions;
pub mod selection;

pub use extensions::ExtensionError;
pub use selection::{ManagerRole, Role, RoleError};

/// Properties are fetched up to this many 32-bit units.
pub const MAX_PROPERTY_LENGTH: u32 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("X connection is broken")]
    Disconnected,
    #[error("X server ran out of resource ids")]
    IdsExhausted,
    #[error("no reply pending for request {0}")]
    NoReply(u64),
    #[error("reply to request {0} has the wrong kind")]
    UnexpectedReply(u64),
}

impl RequestError {
    /// Whether the request failed because the resource it named no longer exists.
    pub fn is_gone(&self) -> bool {
        matches!(self, RequestError::Protocol(err) if err.code.is_gone())
    }
}

/// Pixmap ids whose last handle was dropped, freed on the next flush.
pub(crate) type Reaper = Rc<RefCell<Vec<Pixmap>>>;

pub struct Connection {
    backend: Backend,
    screen: ScreenInfo,
    clock: Clock,
    queue: VecDeque<Event>,
    pending: HashMap<u64, ReplyKind>,
    reaper: Reaper,
    broken: bool,
}

impl Connection {
    pub fn new(backend: Backend) -> Self {
        let screen = backend.screen();
        let clock = backend.clock();
        Self {
            backend,
            screen,
            clock,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            reaper: Reaper::default(),
            broken: false,
        }
    }

    pub fn backend(&mut self) -> &mut Backend {
        &mut self.backend
    }

    pub fn screen(&self) -> ScreenInfo {
        self.screen
    }

    pub fn root(&self) -> Window {
        self.screen.root
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Number of requests whose reply is still owed to somebody.
    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Submits a request. Never blocks; a connection failure surfaces when the reply is
    /// collected.
    fn submit<T: FromReply>(&mut self, request: Request) -> Token<T> {
        let kind = request.reply_kind();
        let name = request.name();
        trace!("sending {request:?}");

        if self.broken {
            return Token::new(0);
        }

        match self.backend.send(request) {
            Ok(seq) => {
                self.pending.insert(seq, kind);
                Token::new(seq)
            }
            Err(err) => {
                error!("error sending {name}: {err}");
                self.broken = true;
                Token::new(0)
            }
        }
    }

    /// Blocks until the reply for `token` is in.
    pub fn reply<T: FromReply>(&mut self, token: Token<T>) -> Result<T, RequestError> {
        let _span = tracy_client::span!("Connection::reply");

        if token.seq == 0 {
            return Err(RequestError::Disconnected);
        }

        let seq = token.seq;
        let kind = self.pending.remove(&seq).ok_or(RequestError::NoReply(seq))?;
        match self.backend.wait_for_reply(seq, kind) {
            Ok(reply) => T::from_reply(reply).ok_or(RequestError::UnexpectedReply(seq)),
            Err(RequestError::Protocol(err)) => {
                debug!("request failed: {err}");
                Err(err.into())
            }
            Err(RequestError::Connection(err)) => {
                error!("X connection error: {err}");
                self.broken = true;
                Err(err.into())
            }
            Err(err) => Err(err),
        }
    }

    /// Drops interest in a reply. An error for the request is delivered as an event instead.
    pub fn discard<T>(&mut self, token: Token<T>) {
        if let Some(kind) = self.pending.remove(&token.seq) {
            self.backend.discard_reply(token.seq, kind);
        }
    }

    /// Sends a request whose outcome nobody waits for.
    pub fn send(&mut self, request: Request) {
        let token = self.submit::<()>(request);
        self.discard(token);
    }

    /// Sends a request without a reply, keeping a token to check it for errors.
    pub fn send_checked(&mut self, request: Request) -> Token<()> {
        self.submit(request)
    }

    pub fn get_geometry(&mut self, window: Window) -> Token<Geometry> {
        self.submit(Request::GetGeometry(window))
    }

    pub fn get_window_attributes(&mut self, window: Window) -> Token<Attributes> {
        self.submit(Request::GetWindowAttributes(window))
    }

    pub fn query_tree(&mut self, window: Window) -> Token<Tree> {
        self.submit(Request::QueryTree(window))
    }

    pub fn intern_atom(&mut self, name: &str, only_if_exists: bool) -> Token<Interned> {
        self.submit(Request::InternAtom {
            name: name.to_owned(),
            only_if_exists,
        })
    }

    pub fn get_property(&mut self, window: Window, property: Atom) -> Token<PropertyReply> {
        self.submit(Request::GetProperty {
            window,
            property,
            type_: ANY_PROPERTY_TYPE,
            long_length: MAX_PROPERTY_LENGTH,
        })
    }

    pub fn get_selection_owner(&mut self, selection: Atom) -> Token<SelectionOwner> {
        self.submit(Request::GetSelectionOwner(selection))
    }

    pub fn shape_query_extents(&mut self, window: Window) -> Token<ShapeExtents> {
        self.submit(Request::ShapeQueryExtents(window))
    }

    pub fn shape_get_rectangles(&mut self, window: Window) -> Token<Vec<Rect>> {
        self.submit(Request::ShapeGetRectangles(window))
    }

    pub fn select_input(&mut self, window: Window, mask: EventMask) -> Token<()> {
        self.submit(Request::SelectInput { window, mask })
    }

    pub fn generate_id(&mut self) -> Result<u32, RequestError> {
        self.backend.generate_id()
    }

    /// Moves everything the backend has already received into the queue.
    pub fn fill_queue(&mut self) -> Result<(), ConnectionError> {
        while let Some(event) = self.backend.poll_for_event()? {
            self.queue.push_back(event);
        }
        Ok(())
    }

    /// Next event in arrival order, without blocking.
    pub fn next_event(&mut self) -> Result<Option<Event>, ConnectionError> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        self.backend.poll_for_event()
    }

    /// Next event, waiting at most `timeout` for one.
    pub fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<Event>, ConnectionError> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        self.flush()?;
        self.backend.wait_for_event(timeout)
    }

    /// Events received but not yet dispatched, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &Event> {
        self.queue.iter()
    }

    /// Whether a DestroyNotify for `window` is already received and waiting to be dispatched.
    pub fn is_destroy_pending(&mut self, window: Window) -> bool {
        if let Err(err) = self.fill_queue() {
            warn!("error reading events: {err}");
        }
        self.queue
            .iter()
            .any(|e| matches!(*e, Event::DestroyNotify { window: w, .. } if w == window))
    }

    /// Waits until an event matching `pred` arrives or `deadline` passes, and removes it from the
    /// queue. Other events stay queued in order.
    pub fn wait_for_queued(
        &mut self,
        mut pred: impl FnMut(&Event) -> bool,
        deadline: Duration,
    ) -> Result<Option<Event>, ConnectionError> {
        loop {
            self.fill_queue()?;
            if let Some(pos) = self.queue.iter().position(&mut pred) {
                return Ok(self.queue.remove(pos));
            }

            let now = self.clock.now();
            if now >= deadline {
                return Ok(None);
            }

            self.flush()?;
            if let Some(event) = self.backend.wait_for_event(deadline - now)? {
                self.queue.push_back(event);
            }
        }
    }

    pub(crate) fn reaper(&self) -> Weak<RefCell<Vec<Pixmap>>> {
        Rc::downgrade(&self.reaper)
    }

    /// Frees dropped pixmaps and writes out buffered requests.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        let reaped = std::mem::take(&mut *self.reaper.borrow_mut());
        for pixmap in reaped {
            trace!("freeing pixmap {pixmap:#x}");
            self.send(Request::FreePixmap(pixmap));
        }
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;
    use crate::protocol::{ErrorCode, NONE};

    fn connection() -> Connection {
        Connection::new(Headless::new().into())
    }

    #[test]
    fn replies_collected_out_of_order() {
        let mut conn = connection();
        let root = conn.root();

        let tree = conn.query_tree(root);
        let geometry = conn.get_geometry(root);

        assert_eq!(conn.reply(geometry).unwrap().width, 1920);
        assert_eq!(conn.reply(tree).unwrap().parent, NONE);
    }

    #[test]
    fn protocol_error_fails_only_that_request() {
        let mut conn = connection();
        let root = conn.root();

        let bad = conn.get_geometry(0xdead);
        let good = conn.get_window_attributes(root);

        let err = conn.reply(bad).unwrap_err();
        assert!(err.is_gone());
        assert!(conn.reply(good).is_ok());
    }

    #[test]
    fn unchecked_errors_arrive_as_events() {
        let mut conn = connection();
        conn.send(Request::DamageDestroy(0x42));

        let event = conn.next_event().unwrap().unwrap();
        let Event::Error(err) = event else {
            panic!("expected an error event, got {event:?}");
        };
        assert_eq!(err.code, ErrorCode::Damage);
        assert_eq!(err.request, Some("DamageDestroy"));
    }

    #[test]
    fn destroy_lookahead_does_not_consume() {
        let mut conn = connection();
        let root = conn.root();
        let token = conn.select_input(root, EventMask::SUBSTRUCTURE_NOTIFY);
        conn.reply(token).unwrap();

        let headless = conn.backend().headless();
        let a = headless.create_window(Rect::new(0, 0, 10, 10), false);
        let b = headless.create_window(Rect::new(0, 0, 10, 10), false);
        headless.destroy_window(b);

        assert!(conn.is_destroy_pending(b));
        assert!(!conn.is_destroy_pending(a));

        let kinds: Vec<_> = std::iter::from_fn(|| conn.next_event().unwrap()).collect();
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[2], Event::DestroyNotify { window, .. } if window == b));
    }

    #[test]
    fn wait_for_queued_keeps_other_events() {
        let mut conn = connection();
        let root = conn.root();
        let headless = conn.backend().headless();
        headless.push_event(Event::ScreenChange {
            root,
            width: 800,
            height: 600,
        });
        headless.push_event(Event::ShapeNotify {
            window: 7,
            shaped: true,
        });

        let found = conn
            .wait_for_queued(|e| matches!(e, Event::ShapeNotify { .. }), Duration::ZERO)
            .unwrap();
        assert!(found.is_some());
        assert!(matches!(
            conn.next_event().unwrap(),
            Some(Event::ScreenChange { .. })
        ));
    }

    #[test]
    fn wait_for_queued_gives_up_at_deadline() {
        let mut conn = connection();
        let deadline = Duration::from_secs(2);

        let found = conn.wait_for_queued(|_| true, deadline).unwrap();
        assert_eq!(found, None);
        assert_eq!(conn.clock().now(), deadline);
    }

    #[test]
    fn dropped_pixmaps_are_freed_on_flush() {
        let mut conn = connection();
        let reaper = conn.reaper();
        if let Some(reaper) = reaper.upgrade() {
            reaper.borrow_mut().push(0x77);
        }

        conn.flush().unwrap();
        assert_eq!(
            conn.backend().headless().requests().last(),
            Some(&Request::FreePixmap(0x77))
        );
    }
}
