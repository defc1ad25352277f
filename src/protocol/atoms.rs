use super::Atom;
use crate::connection::{Connection, RequestError};

macro_rules! atoms {
    ($($name:ident),+ $(,)?) => {
        /// Atoms the core uses, interned once per connection.
        #[allow(non_snake_case)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct Atoms {
            $(pub $name: Atom,)+
        }

        impl Atoms {
            pub const NAMES: &'static [&'static str] = &[$(stringify!($name),)+];

            fn from_slice(atoms: &[Atom]) -> Self {
                let mut iter = atoms.iter().copied();
                Self {
                    $($name: iter.next().unwrap_or(0),)+
                }
            }

            /// Name of a known atom, for logging.
            pub fn name_of(&self, atom: Atom) -> Option<&'static str> {
                $(
                    if self.$name == atom {
                        return Some(stringify!($name));
                    }
                )+
                None
            }
        }
    };
}

atoms! {
    ATOM,
    CARDINAL,
    WINDOW,
    STRING,
    UTF8_STRING,
    COMPOUND_TEXT,
    MANAGER,

    WM_NAME,
    WM_ICON_NAME,
    WM_CLASS,
    WM_TRANSIENT_FOR,
    WM_PROTOCOLS,
    WM_NORMAL_HINTS,
    WM_SIZE_HINTS,
    WM_HINTS,
    WM_STATE,
    WM_CLIENT_LEADER,
    WM_DELETE_WINDOW,
    WM_TAKE_FOCUS,

    _NET_WM_NAME,
    _NET_WM_ICON_NAME,
    _NET_WM_PID,
    _NET_WM_DESKTOP,
    _NET_WM_STATE,
    _NET_WM_STRUT_PARTIAL,
    _NET_WM_WINDOW_OPACITY,
    _NET_WM_BYPASS_COMPOSITOR,
    _NET_WM_WINDOW_TYPE,
    _NET_WM_WINDOW_TYPE_DESKTOP,
    _NET_WM_WINDOW_TYPE_DOCK,
    _NET_WM_WINDOW_TYPE_TOOLBAR,
    _NET_WM_WINDOW_TYPE_MENU,
    _NET_WM_WINDOW_TYPE_UTILITY,
    _NET_WM_WINDOW_TYPE_SPLASH,
    _NET_WM_WINDOW_TYPE_DIALOG,
    _NET_WM_WINDOW_TYPE_DROPDOWN_MENU,
    _NET_WM_WINDOW_TYPE_POPUP_MENU,
    _NET_WM_WINDOW_TYPE_TOOLTIP,
    _NET_WM_WINDOW_TYPE_NOTIFICATION,
    _NET_WM_WINDOW_TYPE_COMBO,
    _NET_WM_WINDOW_TYPE_DND,
    _NET_WM_WINDOW_TYPE_NORMAL,

    _MOTIF_WM_HINTS,
    _CAIRN_TIMESTAMP,
}

impl Atoms {
    /// Interns every atom in one round trip: all requests go out before any reply is awaited.
    pub fn intern(conn: &mut Connection) -> Result<Self, RequestError> {
        let _span = tracy_client::span!("Atoms::intern");

        let tokens: Vec<_> = Self::NAMES
            .iter()
            .map(|name| conn.intern_atom(name, false))
            .collect();

        let mut atoms = Vec::with_capacity(tokens.len());
        for token in tokens {
            atoms.push(conn.reply(token)?.0);
        }

        Ok(Self::from_slice(&atoms))
    }
}
