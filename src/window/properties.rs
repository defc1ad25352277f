//! Typed cache of the ICCCM and EWMH properties of one window.

use bitflags::bitflags;
use serde::Serialize;

use crate::connection::Connection;
use crate::protocol::property::{
    MotifHints, PropertyError, WmHints, WmSizeHints, WmState,
};
use crate::protocol::{Atom, Atoms, PropertyReply, Token, Window, NONE};

bitflags! {
    /// Which cached properties changed value since last asked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Changed: u32 {
        const TITLE = 1 << 0;
        const ICON_NAME = 1 << 1;
        const CLASS = 1 << 2;
        const TRANSIENT_FOR = 1 << 3;
        const PROTOCOLS = 1 << 4;
        const NORMAL_HINTS = 1 << 5;
        const HINTS = 1 << 6;
        const WM_STATE = 1 << 7;
        const CLIENT_LEADER = 1 << 8;
        const WINDOW_TYPE = 1 << 9;
        const NET_WM_STATE = 1 << 10;
        const PID = 1 << 11;
        const DESKTOP = 1 << 12;
        const STRUT = 1 << 13;
        const OPACITY = 1 << 14;
        const BYPASS_COMPOSITOR = 1 << 15;
        const MOTIF_HINTS = 1 << 16;
    }
}

/// Instance and class names from WM_CLASS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WmClass {
    pub instance: String,
    pub class: String,
}

/// Last known value of every tracked property; `None` when unset or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Properties {
    pub wm_name: Option<String>,
    pub net_wm_name: Option<String>,
    pub wm_icon_name: Option<String>,
    pub net_wm_icon_name: Option<String>,
    pub wm_class: Option<WmClass>,
    pub transient_for: Option<Window>,
    pub protocols: Option<Vec<Atom>>,
    pub normal_hints: Option<WmSizeHints>,
    pub hints: Option<WmHints>,
    pub wm_state: Option<WmState>,
    pub client_leader: Option<Window>,
    pub window_type: Option<Vec<Atom>>,
    pub net_wm_state: Option<Vec<Atom>>,
    pub pid: Option<u32>,
    pub desktop: Option<u32>,
    /// The twelve _NET_WM_STRUT_PARTIAL cardinals.
    pub strut_partial: Option<[u32; 12]>,
    pub opacity: Option<u32>,
    pub bypass_compositor: Option<u32>,
    pub motif_hints: Option<MotifHints>,
}

/// A tracked property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    WmName,
    NetWmName,
    WmIconName,
    NetWmIconName,
    WmClass,
    TransientFor,
    Protocols,
    NormalHints,
    Hints,
    WmState,
    ClientLeader,
    WindowType,
    NetWmState,
    Pid,
    Desktop,
    StrutPartial,
    Opacity,
    BypassCompositor,
    MotifHints,
}

impl Slot {
    const ALL: [Slot; 19] = [
        Slot::WmName,
        Slot::NetWmName,
        Slot::WmIconName,
        Slot::NetWmIconName,
        Slot::WmClass,
        Slot::TransientFor,
        Slot::Protocols,
        Slot::NormalHints,
        Slot::Hints,
        Slot::WmState,
        Slot::ClientLeader,
        Slot::WindowType,
        Slot::NetWmState,
        Slot::Pid,
        Slot::Desktop,
        Slot::StrutPartial,
        Slot::Opacity,
        Slot::BypassCompositor,
        Slot::MotifHints,
    ];

    fn atom(self, atoms: &Atoms) -> Atom {
        match self {
            Slot::WmName => atoms.WM_NAME,
            Slot::NetWmName => atoms._NET_WM_NAME,
            Slot::WmIconName => atoms.WM_ICON_NAME,
            Slot::NetWmIconName => atoms._NET_WM_ICON_NAME,
            Slot::WmClass => atoms.WM_CLASS,
            Slot::TransientFor => atoms.WM_TRANSIENT_FOR,
            Slot::Protocols => atoms.WM_PROTOCOLS,
            Slot::NormalHints => atoms.WM_NORMAL_HINTS,
            Slot::Hints => atoms.WM_HINTS,
            Slot::WmState => atoms.WM_STATE,
            Slot::ClientLeader => atoms.WM_CLIENT_LEADER,
            Slot::WindowType => atoms._NET_WM_WINDOW_TYPE,
            Slot::NetWmState => atoms._NET_WM_STATE,
            Slot::Pid => atoms._NET_WM_PID,
            Slot::Desktop => atoms._NET_WM_DESKTOP,
            Slot::StrutPartial => atoms._NET_WM_STRUT_PARTIAL,
            Slot::Opacity => atoms._NET_WM_WINDOW_OPACITY,
            Slot::BypassCompositor => atoms._NET_WM_BYPASS_COMPOSITOR,
            Slot::MotifHints => atoms._MOTIF_WM_HINTS,
        }
    }

    fn from_atom(atom: Atom, atoms: &Atoms) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| slot.atom(atoms) == atom)
    }

    fn flag(self) -> Changed {
        match self {
            Slot::WmName | Slot::NetWmName => Changed::TITLE,
            Slot::WmIconName | Slot::NetWmIconName => Changed::ICON_NAME,
            Slot::WmClass => Changed::CLASS,
            Slot::TransientFor => Changed::TRANSIENT_FOR,
            Slot::Protocols => Changed::PROTOCOLS,
            Slot::NormalHints => Changed::NORMAL_HINTS,
            Slot::Hints => Changed::HINTS,
            Slot::WmState => Changed::WM_STATE,
            Slot::ClientLeader => Changed::CLIENT_LEADER,
            Slot::WindowType => Changed::WINDOW_TYPE,
            Slot::NetWmState => Changed::NET_WM_STATE,
            Slot::Pid => Changed::PID,
            Slot::Desktop => Changed::DESKTOP,
            Slot::StrutPartial => Changed::STRUT,
            Slot::Opacity => Changed::OPACITY,
            Slot::BypassCompositor => Changed::BYPASS_COMPOSITOR,
            Slot::MotifHints => Changed::MOTIF_HINTS,
        }
    }
}

fn ok_or_absent<T>(value: Result<T, PropertyError>, slot: Slot) -> Option<T> {
    match value {
        Ok(value) => Some(value),
        Err(PropertyError::Absent) => None,
        Err(err) => {
            debug!("ignoring malformed {slot:?}: {err}");
            None
        }
    }
}

impl Properties {
    /// Decodes `reply` into the slot; returns whether the value changed.
    fn store(&mut self, slot: Slot, reply: &PropertyReply, atoms: &Atoms) -> bool {
        fn set<T: PartialEq>(field: &mut Option<T>, value: Option<T>) -> bool {
            let changed = *field != value;
            *field = value;
            changed
        }

        let r = reply;
        match slot {
            Slot::WmName => set(&mut self.wm_name, ok_or_absent(r.text(atoms), slot)),
            Slot::NetWmName => set(&mut self.net_wm_name, ok_or_absent(r.text(atoms), slot)),
            Slot::WmIconName => set(&mut self.wm_icon_name, ok_or_absent(r.text(atoms), slot)),
            Slot::NetWmIconName => {
                set(&mut self.net_wm_icon_name, ok_or_absent(r.text(atoms), slot))
            }
            Slot::WmClass => {
                let class = ok_or_absent(r.text_list(atoms), slot).map(|mut list| {
                    list.resize(2, String::new());
                    let class = list.pop().unwrap_or_default();
                    let instance = list.pop().unwrap_or_default();
                    WmClass { instance, class }
                });
                set(&mut self.wm_class, class)
            }
            Slot::TransientFor => {
                set(&mut self.transient_for, ok_or_absent(r.window(atoms), slot))
            }
            Slot::Protocols => set(&mut self.protocols, ok_or_absent(r.atoms(atoms), slot)),
            Slot::NormalHints => set(
                &mut self.normal_hints,
                ok_or_absent(WmSizeHints::from_reply(r, atoms), slot),
            ),
            Slot::Hints => set(
                &mut self.hints,
                ok_or_absent(WmHints::from_reply(r, atoms), slot),
            ),
            Slot::WmState => set(
                &mut self.wm_state,
                ok_or_absent(WmState::from_reply(r, atoms), slot),
            ),
            Slot::ClientLeader => {
                set(&mut self.client_leader, ok_or_absent(r.window(atoms), slot))
            }
            Slot::WindowType => set(&mut self.window_type, ok_or_absent(r.atoms(atoms), slot)),
            Slot::NetWmState => set(&mut self.net_wm_state, ok_or_absent(r.atoms(atoms), slot)),
            Slot::Pid => set(&mut self.pid, ok_or_absent(r.cardinal(atoms), slot)),
            Slot::Desktop => set(&mut self.desktop, ok_or_absent(r.cardinal(atoms), slot)),
            Slot::StrutPartial => {
                let strut = ok_or_absent(r.cardinals(atoms), slot)
                    .and_then(|v| <[u32; 12]>::try_from(v.get(..12)?).ok());
                set(&mut self.strut_partial, strut)
            }
            Slot::Opacity => set(&mut self.opacity, ok_or_absent(r.cardinal(atoms), slot)),
            Slot::BypassCompositor => {
                set(&mut self.bypass_compositor, ok_or_absent(r.cardinal(atoms), slot))
            }
            Slot::MotifHints => set(
                &mut self.motif_hints,
                ok_or_absent(MotifHints::from_reply(r, atoms), slot),
            ),
        }
    }

    /// _NET_WM_NAME if set, else WM_NAME.
    pub fn title(&self) -> Option<&str> {
        self.net_wm_name.as_deref().or(self.wm_name.as_deref())
    }

    /// Declared parent for transient windows, ignoring `None`.
    pub fn parent(&self) -> Option<Window> {
        self.transient_for.filter(|&w| w != NONE)
    }

    pub fn supports_protocol(&self, protocol: Atom) -> bool {
        self.protocols
            .as_ref()
            .is_some_and(|list| list.contains(&protocol))
    }
}

/// Property values plus the fetches still in flight.
#[derive(Default)]
pub struct PropertyCache {
    values: Properties,
    pending: Vec<(Slot, Token<PropertyReply>)>,
    changed: Changed,
}

impl PropertyCache {
    pub fn values(&self) -> &Properties {
        &self.values
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Requests every tracked property. Does not wait for anything.
    pub fn fetch_all(&mut self, conn: &mut Connection, atoms: &Atoms, window: Window) {
        for slot in Slot::ALL {
            self.fetch(conn, atoms, window, slot);
        }
    }

    fn fetch(&mut self, conn: &mut Connection, atoms: &Atoms, window: Window, slot: Slot) {
        let token = conn.get_property(window, slot.atom(atoms));
        self.pending.push((slot, token));
    }

    /// Refetches the property named by a PropertyNotify. Returns `false` for untracked atoms.
    pub fn on_property_changed(
        &mut self,
        conn: &mut Connection,
        atoms: &Atoms,
        window: Window,
        atom: Atom,
    ) -> bool {
        let Some(slot) = Slot::from_atom(atom, atoms) else {
            return false;
        };
        self.fetch(conn, atoms, window, slot);
        true
    }

    /// Collects every outstanding fetch in submission order and returns what changed.
    ///
    /// A failed fetch leaves the property absent.
    pub fn resolve_all(&mut self, conn: &mut Connection, atoms: &Atoms) -> Changed {
        let _span = tracy_client::span!("PropertyCache::resolve_all");

        let mut changed = Changed::empty();
        for (slot, token) in std::mem::take(&mut self.pending) {
            let reply = match conn.reply(token) {
                Ok(reply) => reply,
                Err(err) => {
                    trace!("fetching {slot:?} failed: {err}");
                    PropertyReply::absent()
                }
            };
            if self.values.store(slot, &reply, atoms) {
                changed |= slot.flag();
            }
        }

        self.changed |= changed;
        changed
    }

    /// Collects and ignores every outstanding fetch.
    pub fn drop_pending(&mut self, conn: &mut Connection) {
        for (slot, token) in std::mem::take(&mut self.pending) {
            if let Err(err) = conn.reply(token) {
                trace!("dropping {slot:?} fetch: {err}");
            }
        }
    }

    /// Forgets the fetches in flight without waiting for their replies.
    pub fn discard_pending(&mut self, conn: &mut Connection) {
        for (_, token) in std::mem::take(&mut self.pending) {
            conn.discard(token);
        }
    }

    /// Changes accumulated since the last call.
    pub fn take_changed(&mut self) -> Changed {
        std::mem::take(&mut self.changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;
    use crate::protocol::property::IcccmState;
    use crate::region::Rect;

    fn setup() -> (Connection, Atoms, Window) {
        let mut conn = Connection::new(Headless::new().into());
        let atoms = Atoms::intern(&mut conn).unwrap();
        let window = conn
            .backend()
            .headless()
            .create_window(Rect::new(0, 0, 100, 100), false);
        (conn, atoms, window)
    }

    #[test]
    fn fetch_and_resolve() {
        let (mut conn, atoms, window) = setup();
        let headless = conn.backend().headless();
        headless.set_property(
            window,
            atoms.WM_CLASS,
            PropertyReply::from_bytes(atoms.STRING, &b"xterm\0XTerm\0"[..]),
        );
        headless.set_property(
            window,
            atoms.WM_NAME,
            PropertyReply::from_bytes(atoms.STRING, &b"legacy"[..]),
        );
        headless.set_property(
            window,
            atoms._NET_WM_NAME,
            PropertyReply::from_bytes(atoms.UTF8_STRING, "~ — zsh".as_bytes()),
        );
        headless.set_property(
            window,
            atoms.WM_STATE,
            PropertyReply::from_u32s(atoms.WM_STATE, &[1, 0]),
        );

        let mut cache = PropertyCache::default();
        cache.fetch_all(&mut conn, &atoms, window);
        assert!(cache.has_pending());
        assert_eq!(cache.values(), &Properties::default());

        let changed = cache.resolve_all(&mut conn, &atoms);
        assert!(!cache.has_pending());
        assert_eq!(changed, Changed::TITLE | Changed::CLASS | Changed::WM_STATE);

        let values = cache.values();
        assert_eq!(values.title(), Some("~ — zsh"));
        assert_eq!(
            values.wm_class,
            Some(WmClass {
                instance: "xterm".into(),
                class: "XTerm".into()
            })
        );
        assert_eq!(values.wm_state.map(|s| s.state), Some(IcccmState::Normal));
        assert_eq!(values.transient_for, None);
    }

    #[test]
    fn changed_property_is_refetched() {
        let (mut conn, atoms, window) = setup();
        let mut cache = PropertyCache::default();
        cache.fetch_all(&mut conn, &atoms, window);
        cache.resolve_all(&mut conn, &atoms);
        conn.backend().headless().clear_requests();

        conn.backend().headless().set_property(
            window,
            atoms._NET_WM_PID,
            PropertyReply::from_u32s(atoms.CARDINAL, &[4242]),
        );
        assert!(cache.on_property_changed(&mut conn, &atoms, window, atoms._NET_WM_PID));
        assert!(!cache.on_property_changed(&mut conn, &atoms, window, atoms.MANAGER));

        // Exactly one request went out.
        assert_eq!(conn.backend().headless().requests().len(), 1);

        let changed = cache.resolve_all(&mut conn, &atoms);
        assert_eq!(changed, Changed::PID);
        assert_eq!(cache.values().pid, Some(4242));
        assert_eq!(cache.take_changed(), Changed::PID);
        assert_eq!(cache.take_changed(), Changed::empty());
    }

    #[test]
    fn malformed_and_vanished_become_absent() {
        let (mut conn, atoms, window) = setup();
        let headless = conn.backend().headless();
        // A transient-for of the wrong type.
        headless.set_property(
            window,
            atoms.WM_TRANSIENT_FOR,
            PropertyReply::from_u32s(atoms.CARDINAL, &[5]),
        );
        headless.set_property(
            window,
            atoms._NET_WM_DESKTOP,
            PropertyReply::from_u32s(atoms.CARDINAL, &[2]),
        );

        let mut cache = PropertyCache::default();
        cache.fetch_all(&mut conn, &atoms, window);
        conn.backend().headless().destroy_window(window);
        cache.resolve_all(&mut conn, &atoms);
        assert_eq!(cache.values().transient_for, None);
        assert_eq!(cache.values().desktop, Some(2));

        // Fetching after the window is gone clears the slot instead of failing.
        cache.on_property_changed(&mut conn, &atoms, window, atoms._NET_WM_DESKTOP);
        let changed = cache.resolve_all(&mut conn, &atoms);
        assert_eq!(changed, Changed::DESKTOP);
        assert_eq!(cache.values().desktop, None);
    }
}
