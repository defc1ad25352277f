use std::time::Duration;

use x11rb::errors::ConnectionError;

use crate::clock::Clock;
use crate::connection::RequestError;
use crate::protocol::{Event, Extensions, Reply, ReplyKind, Request, ScreenInfo};

pub mod headless;
pub use headless::Headless;

pub mod x11;
pub use x11::X11;

/// Where requests go and events come from.
///
/// `X11` talks to a real server; `Headless` simulates one in-process and is what the tests run
/// against.
#[allow(clippy::large_enum_variant)]
pub enum Backend {
    X11(X11),
    Headless(Headless),
}

impl Backend {
    /// Submits a request and returns its sequence number without waiting for anything.
    pub fn send(&mut self, request: Request) -> Result<u64, ConnectionError> {
        match self {
            Backend::X11(x11) => x11.send(request),
            Backend::Headless(headless) => Ok(headless.send(request)),
        }
    }

    /// Blocks until the reply (or error) for `seq` is available.
    pub fn wait_for_reply(&mut self, seq: u64, kind: ReplyKind) -> Result<Reply, RequestError> {
        match self {
            Backend::X11(x11) => x11.wait_for_reply(seq, kind),
            Backend::Headless(headless) => headless.wait_for_reply(seq),
        }
    }

    /// Gives up on the reply for `seq`; a later error for it arrives as an event.
    pub fn discard_reply(&mut self, seq: u64, kind: ReplyKind) {
        match self {
            Backend::X11(x11) => x11.discard_reply(seq, kind),
            Backend::Headless(headless) => headless.discard_reply(seq),
        }
    }

    pub fn poll_for_event(&mut self) -> Result<Option<Event>, ConnectionError> {
        match self {
            Backend::X11(x11) => x11.poll_for_event(),
            Backend::Headless(headless) => Ok(headless.poll_for_event()),
        }
    }

    /// Waits at most `timeout` for the next event.
    pub fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<Event>, ConnectionError> {
        match self {
            Backend::X11(x11) => x11.wait_for_event(timeout),
            Backend::Headless(headless) => Ok(headless.wait_for_event(timeout)),
        }
    }

    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        match self {
            Backend::X11(x11) => x11.flush(),
            Backend::Headless(_) => Ok(()),
        }
    }

    pub fn generate_id(&mut self) -> Result<u32, RequestError> {
        match self {
            Backend::X11(x11) => x11.generate_id(),
            Backend::Headless(headless) => Ok(headless.generate_id()),
        }
    }

    pub fn query_extensions(&mut self) -> Result<Extensions, ConnectionError> {
        match self {
            Backend::X11(x11) => x11.query_extensions(),
            Backend::Headless(headless) => Ok(headless.extensions()),
        }
    }

    pub fn screen(&self) -> ScreenInfo {
        match self {
            Backend::X11(x11) => x11.screen(),
            Backend::Headless(headless) => headless.screen(),
        }
    }

    pub fn clock(&self) -> Clock {
        match self {
            Backend::X11(x11) => x11.clock(),
            Backend::Headless(headless) => headless.clock(),
        }
    }

    pub fn x11_checked(&self) -> Option<&X11> {
        if let Self::X11(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn headless(&mut self) -> &mut Headless {
        match self {
            Self::Headless(v) => v,
            _ => panic!("backend is not Headless"),
        }
    }
}

impl From<X11> for Backend {
    fn from(value: X11) -> Self {
        Backend::X11(value)
    }
}

impl From<Headless> for Backend {
    fn from(value: Headless) -> Self {
        Backend::Headless(value)
    }
}
