use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::compositor::redirect::full_damage;
use crate::compositor::{Pixmap, Redirection, ViewId};
use crate::connection::{Connection, RequestError};
use crate::protocol::{
    Atom, Atoms, Attributes, Damage, EventMask, Geometry, MapState, Request, ShapeExtents, Token,
    Window,
};
use crate::region::{Rect, Region};
use crate::utils::xid;

pub mod properties;

pub use properties::{Changed, PropertyCache, Properties};

/// Semantic window type, as in _NET_WM_WINDOW_TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowType {
    Desktop,
    Dock,
    Toolbar,
    Menu,
    Utility,
    Splash,
    Dialog,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
    Normal,
}

impl WindowType {
    pub fn from_atom(atom: Atom, atoms: &Atoms) -> Option<Self> {
        let known = [
            (atoms._NET_WM_WINDOW_TYPE_DESKTOP, WindowType::Desktop),
            (atoms._NET_WM_WINDOW_TYPE_DOCK, WindowType::Dock),
            (atoms._NET_WM_WINDOW_TYPE_TOOLBAR, WindowType::Toolbar),
            (atoms._NET_WM_WINDOW_TYPE_MENU, WindowType::Menu),
            (atoms._NET_WM_WINDOW_TYPE_UTILITY, WindowType::Utility),
            (atoms._NET_WM_WINDOW_TYPE_SPLASH, WindowType::Splash),
            (atoms._NET_WM_WINDOW_TYPE_DIALOG, WindowType::Dialog),
            (atoms._NET_WM_WINDOW_TYPE_DROPDOWN_MENU, WindowType::DropdownMenu),
            (atoms._NET_WM_WINDOW_TYPE_POPUP_MENU, WindowType::PopupMenu),
            (atoms._NET_WM_WINDOW_TYPE_TOOLTIP, WindowType::Tooltip),
            (atoms._NET_WM_WINDOW_TYPE_NOTIFICATION, WindowType::Notification),
            (atoms._NET_WM_WINDOW_TYPE_COMBO, WindowType::Combo),
            (atoms._NET_WM_WINDOW_TYPE_DND, WindowType::Dnd),
            (atoms._NET_WM_WINDOW_TYPE_NORMAL, WindowType::Normal),
        ];
        known
            .into_iter()
            .find_map(|(a, ty)| (a == atom).then_some(ty))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowType::Desktop => "desktop",
            WindowType::Dock => "dock",
            WindowType::Toolbar => "toolbar",
            WindowType::Menu => "menu",
            WindowType::Utility => "utility",
            WindowType::Splash => "splash",
            WindowType::Dialog => "dialog",
            WindowType::DropdownMenu => "dropdown-menu",
            WindowType::PopupMenu => "popup-menu",
            WindowType::Tooltip => "tooltip",
            WindowType::Notification => "notification",
            WindowType::Combo => "combo",
            WindowType::Dnd => "dnd",
            WindowType::Normal => "normal",
        }
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate type atoms for a window, most specific first.
///
/// Always ends with `_NET_WM_WINDOW_TYPE_NORMAL`, so resolution never comes up empty.
fn type_ladder(properties: &Properties, override_redirect: bool, atoms: &Atoms) -> Vec<Atom> {
    let mut ladder = match &properties.window_type {
        Some(declared) => declared.clone(),
        None if !override_redirect && properties.parent().is_some() => {
            vec![atoms._NET_WM_WINDOW_TYPE_DIALOG]
        }
        None => vec![atoms._NET_WM_WINDOW_TYPE_NORMAL],
    };
    ladder.push(atoms._NET_WM_WINDOW_TYPE_NORMAL);
    ladder
}

/// Summary of a tracked window, as listed by `cairn windows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowInfo {
    pub id: Window,
    #[serde(rename = "type")]
    pub type_: WindowType,
    pub title: Option<String>,
    pub class: Option<String>,
    pub position: Rect,
    pub override_redirect: bool,
    pub viewable: bool,
    pub shaped: bool,
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} {:<12} {}", self.id, self.type_.as_str(), self.position)?;
        if let Some(class) = &self.class {
            write!(f, " [{class}]")?;
        }
        if let Some(title) = &self.title {
            write!(f, " {title:?}")?;
        }
        if self.override_redirect {
            f.write_str(" (override-redirect)")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidClient {
    #[error("window {0:#x} vanished")]
    Vanished(Window, #[source] RequestError),
    #[error("window {0:#x} is being destroyed")]
    Destroyed(Window),
}

impl InvalidClient {
    pub fn window(&self) -> Window {
        match *self {
            InvalidClient::Vanished(window, _) | InvalidClient::Destroyed(window) => window,
        }
    }
}

/// Everything the core knows about one client window.
///
/// Positions and regions handed out are relative to the outer top-left corner of the window,
/// border included, except [`ClientProxy::position`] which is in parent coordinates.
pub struct ClientProxy {
    window: Window,
    geometry: Geometry,
    attributes: Attributes,
    /// Bounding shape; `None` while the window is rectangular.
    shape: Option<Region>,
    shape_query: Option<(Token<ShapeExtents>, Token<Vec<Rect>>)>,
    detached: bool,
    properties: PropertyCache,
    effective_type: Cell<Option<WindowType>>,
    redirection: Redirection,
    destroyed: bool,
}

impl ClientProxy {
    /// Starts tracking `window`.
    ///
    /// Fails without leaving anything behind if the window is gone, or if its destruction is
    /// already waiting in the event queue.
    pub fn new(
        conn: &mut Connection,
        atoms: &Atoms,
        window: Window,
    ) -> Result<Self, InvalidClient> {
        let _span = tracy_client::span!("ClientProxy::new");

        let geometry = conn.get_geometry(window);
        let attributes = conn.get_window_attributes(window);
        let selected = conn.select_input(window, EventMask::PROPERTY_CHANGE);
        let shape_selected = conn.send_checked(Request::ShapeSelectInput {
            window,
            enable: true,
        });

        // Collect everything before bailing out so no reply is left pending.
        let geometry = conn.reply(geometry);
        let attributes = conn.reply(attributes);
        let selected = conn.reply(selected);
        let shape_selected = conn.reply(shape_selected);

        let vanished = |err| InvalidClient::Vanished(window, err);
        let geometry = geometry.map_err(vanished)?;
        let attributes = attributes.map_err(vanished)?;
        selected.map_err(vanished)?;
        shape_selected.map_err(vanished)?;

        if conn.is_destroy_pending(window) {
            return Err(InvalidClient::Destroyed(window));
        }

        let mut proxy = Self {
            window,
            geometry,
            attributes,
            shape: None,
            shape_query: None,
            detached: false,
            properties: PropertyCache::default(),
            effective_type: Cell::new(None),
            redirection: Redirection::default(),
            destroyed: false,
        };
        proxy.properties.fetch_all(conn, atoms, window);
        proxy.query_shape(conn);

        trace!("tracking {}", xid(window));
        Ok(proxy)
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn properties(&self) -> &Properties {
        self.properties.values()
    }

    pub fn is_viewable(&self) -> bool {
        self.attributes.map_state == MapState::Viewable
    }

    pub fn is_override_redirect(&self) -> bool {
        self.attributes.override_redirect
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Outer rectangle in parent coordinates.
    pub fn position(&self) -> Rect {
        self.geometry.outer_rect()
    }

    pub fn shape(&self) -> Option<&Region> {
        self.shape.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.properties.values().title()
    }

    pub fn info(&self, atoms: &Atoms) -> WindowInfo {
        let properties = self.properties.values();
        WindowInfo {
            id: self.window,
            type_: self.effective_type(atoms),
            title: self.title().map(str::to_owned),
            class: properties.wm_class.as_ref().map(|c| c.class.clone()),
            position: self.position(),
            override_redirect: self.is_override_redirect(),
            viewable: self.is_viewable(),
            shaped: self.shape.is_some(),
        }
    }

    /// Collects outstanding property and shape replies.
    pub fn resolve_all(&mut self, conn: &mut Connection, atoms: &Atoms) -> Changed {
        let changed = self.properties.resolve_all(conn, atoms);
        if changed.intersects(Changed::TRANSIENT_FOR | Changed::WINDOW_TYPE) {
            self.effective_type.set(None);
        }
        self.resolve_shape(conn);
        changed
    }

    pub fn has_pending(&self) -> bool {
        self.properties.has_pending() || self.shape_query.is_some()
    }

    /// Refetches a property after a PropertyNotify. Returns `false` if it is not tracked.
    pub fn on_property_changed(
        &mut self,
        conn: &mut Connection,
        atoms: &Atoms,
        atom: Atom,
    ) -> bool {
        if self.destroyed {
            return false;
        }
        self.properties
            .on_property_changed(conn, atoms, self.window, atom)
    }

    /// Property changes resolved since the last call.
    pub fn take_changed(&mut self) -> Changed {
        self.properties.take_changed()
    }

    /// Semantic type of the window, computed once per relevant property change.
    pub fn effective_type(&self, atoms: &Atoms) -> WindowType {
        if let Some(ty) = self.effective_type.get() {
            return ty;
        }

        let ladder = type_ladder(self.properties.values(), self.is_override_redirect(), atoms);
        let ty = ladder
            .into_iter()
            .find_map(|atom| WindowType::from_atom(atom, atoms))
            .unwrap_or(WindowType::Normal);
        self.effective_type.set(Some(ty));
        ty
    }

    fn query_shape(&mut self, conn: &mut Connection) {
        if let Some((extents, rects)) = self.shape_query.take() {
            conn.discard(extents);
            conn.discard(rects);
        }
        let extents = conn.shape_query_extents(self.window);
        let rects = conn.shape_get_rectangles(self.window);
        self.shape_query = Some((extents, rects));
    }

    fn resolve_shape(&mut self, conn: &mut Connection) {
        let Some((extents, rects)) = self.shape_query.take() else {
            return;
        };
        let extents = conn.reply(extents);
        let rects = conn.reply(rects);

        let (extents, rects) = match (extents, rects) {
            (Ok(extents), Ok(rects)) => (extents, rects),
            (Err(err), _) | (_, Err(err)) => {
                debug!("error querying shape of {}: {err}", xid(self.window));
                return;
            }
        };

        let bw = self.geometry.border_width;
        self.shape = extents
            .bounding_shaped
            .then(|| Region::from_rects(rects).translate(bw, bw));
    }

    pub fn on_shape_changed(&mut self, conn: &mut Connection) {
        if !self.destroyed {
            self.query_shape(conn);
        }
    }

    /// Applies a ConfigureNotify. Returns whether the size changed.
    pub fn on_configure(&mut self, geometry: Geometry, override_redirect: bool) -> bool {
        if self.attributes.override_redirect != override_redirect {
            self.attributes.override_redirect = override_redirect;
            self.effective_type.set(None);
        }

        // ConfigureNotify carries no depth.
        let geometry = Geometry {
            depth: self.geometry.depth,
            ..geometry
        };
        let resized = !self.geometry.same_size(&geometry);
        self.geometry = geometry;

        if resized {
            // The server gives the window a new backing pixmap on resize.
            self.redirection.invalidate();
            self.redirection.add_damage(&full_damage(&self.geometry));
        }
        resized
    }

    pub fn on_map(&mut self) {
        self.attributes.map_state = MapState::Viewable;
        self.redirection.invalidate();
        self.redirection.add_damage(&full_damage(&self.geometry));
    }

    /// Marks the window unmapped. The pixmap is kept so its last contents stay paintable.
    pub fn on_unmap(&mut self) {
        self.attributes.map_state = MapState::Unmapped;
    }

    /// Adds a reported damage rectangle to every view. Returns `false` for a damage object
    /// that no longer belongs to this window.
    pub fn on_damage(
        &mut self,
        conn: &mut Connection,
        damage: Damage,
        area: Rect,
        more: bool,
    ) -> bool {
        if self.redirection.damage_object() != Some(damage) {
            trace!("ignoring stale damage {} on {}", xid(damage), xid(self.window));
            return false;
        }

        let bw = self.geometry.border_width;
        self.redirection
            .add_damage(&Region::from_rect(area.translate(bw, bw)));
        if !more {
            conn.send(Request::DamageSubtract(damage));
        }
        true
    }

    /// Records that the window was destroyed on the server.
    ///
    /// Views and an already named pixmap stay usable; everything else is dropped.
    pub fn on_destroyed(&mut self, conn: &mut Connection) {
        self.destroyed = true;
        // Fetches still in flight can only fail now.
        if let Some((extents, rects)) = self.shape_query.take() {
            if let Err(err) = conn.reply(extents) {
                trace!("dropping shape extents fetch: {err}");
            }
            if let Err(err) = conn.reply(rects) {
                trace!("dropping shape rectangles fetch: {err}");
            }
        }
        if self.properties.has_pending() {
            self.properties.drop_pending(conn);
        }
    }

    /// Forgets every fetch in flight, for a proxy about to be dropped while its window lives
    /// on.
    pub fn discard_pending(&mut self, conn: &mut Connection) {
        if let Some((extents, rects)) = self.shape_query.take() {
            conn.discard(extents);
            conn.discard(rects);
        }
        self.properties.discard_pending(conn);
    }

    /// Records that the window was reparented away from the root. Its structure events are
    /// selected directly, since the root no longer reports them.
    pub fn detach(&mut self, conn: &mut Connection) {
        if self.detached {
            return;
        }
        self.detached = true;
        conn.send(Request::SelectInput {
            window: self.window,
            mask: EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY,
        });
    }

    /// Records that the window is a child of the root again.
    pub fn reattach(&mut self) {
        self.detached = false;
    }

    /// Whether the window is no longer a top-level window.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn is_redirected(&self) -> bool {
        self.redirection.is_redirected()
    }

    pub fn redirection(&self) -> &Redirection {
        &self.redirection
    }

    /// Redirects the window off-screen. A no-op for input-only and destroyed windows.
    pub fn redirect(&mut self, conn: &mut Connection) -> Result<(), RequestError> {
        if self.attributes.input_only || self.destroyed {
            return Ok(());
        }
        self.redirection.redirect(conn, self.window, &self.geometry)
    }

    pub fn unredirect(&mut self, conn: &mut Connection) {
        self.redirection
            .unredirect(conn, self.window, !self.destroyed);
    }

    /// Current contents of the window while redirected.
    pub fn pixmap(&mut self, conn: &mut Connection) -> Option<Rc<Pixmap>> {
        if self.destroyed {
            // Whatever was named before the window went away is still good.
            return self.redirection.cached_pixmap();
        }
        self.redirection.pixmap(
            conn,
            self.window,
            &self.geometry,
            self.attributes.visual,
        )
    }

    /// Starts a damage accumulator for a view; a new view has seen nothing yet.
    pub fn add_view(&mut self, view: ViewId) {
        self.redirection.add_view(view, full_damage(&self.geometry));
    }

    /// Returns whether views remain.
    pub fn remove_view(&mut self, view: ViewId) -> bool {
        self.redirection.remove_view(view)
    }

    pub fn view_count(&self) -> usize {
        self.redirection.view_count()
    }

    pub fn damaged(&self, view: ViewId) -> Option<&Region> {
        self.redirection.damaged(view)
    }

    pub fn has_damage(&self, view: ViewId) -> bool {
        self.redirection.has_damage(view)
    }

    pub fn clear_damaged(&mut self, view: ViewId) -> Region {
        self.redirection.clear(view)
    }
}

impl fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProxy")
            .field("window", &format_args!("{:#x}", self.window))
            .field("geometry", &self.geometry)
            .field("redirected", &self.is_redirected())
            .field("detached", &self.detached)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;
    use crate::protocol::{Event, PropertyReply};

    fn setup() -> (Connection, Atoms) {
        let mut conn = Connection::new(Headless::new().into());
        let atoms = Atoms::intern(&mut conn).unwrap();
        let root = conn.root();
        let token = conn.select_input(root, EventMask::SUBSTRUCTURE_NOTIFY);
        conn.reply(token).unwrap();
        (conn, atoms)
    }

    fn new_window(conn: &mut Connection, rect: Rect) -> Window {
        let headless = conn.backend().headless();
        let window = headless.create_window(rect, false);
        headless.map_window(window);
        window
    }

    fn drain(conn: &mut Connection) {
        while conn.next_event().unwrap().is_some() {}
    }

    fn proxy_for(conn: &mut Connection, atoms: &Atoms, window: Window) -> ClientProxy {
        let mut proxy = ClientProxy::new(conn, atoms, window).unwrap();
        proxy.resolve_all(conn, atoms);
        proxy
    }

    #[test]
    fn vanished_window_is_invalid() {
        let (mut conn, atoms) = setup();
        let err = ClientProxy::new(&mut conn, &atoms, 0x40_9999).unwrap_err();
        assert!(matches!(err, InvalidClient::Vanished(0x40_9999, ref e) if e.is_gone()));
    }

    #[test]
    fn pending_destroy_is_invalid() {
        let (mut conn, atoms) = setup();
        let root = conn.root();
        let window = new_window(&mut conn, Rect::new(0, 0, 10, 10));
        drain(&mut conn);

        // The window still answers, but its DestroyNotify is already on the wire.
        conn.backend()
            .headless()
            .push_event(Event::DestroyNotify { event: root, window });
        let err = ClientProxy::new(&mut conn, &atoms, window).unwrap_err();
        assert!(matches!(err, InvalidClient::Destroyed(w) if w == window));
    }

    #[test]
    fn fetches_in_flight_are_collected_on_destroy() {
        let (mut conn, atoms) = setup();
        let window = new_window(&mut conn, Rect::new(0, 0, 10, 10));
        let mut proxy = ClientProxy::new(&mut conn, &atoms, window).unwrap();
        assert!(proxy.has_pending());

        conn.backend().headless().destroy_window(window);
        proxy.on_destroyed(&mut conn);
        assert!(proxy.is_destroyed());
        assert!(!proxy.has_pending());
        assert_eq!(conn.pending_replies(), 0);
    }

    #[test]
    fn fetches_in_flight_can_be_discarded() {
        let (mut conn, atoms) = setup();
        let window = new_window(&mut conn, Rect::new(0, 0, 10, 10));
        let mut proxy = ClientProxy::new(&mut conn, &atoms, window).unwrap();
        assert!(conn.pending_replies() > 0);

        proxy.discard_pending(&mut conn);
        assert!(!proxy.has_pending());
        assert_eq!(conn.pending_replies(), 0);
    }

    #[test]
    fn transient_without_type_is_dialog() {
        let (mut conn, atoms) = setup();
        let parent = new_window(&mut conn, Rect::new(0, 0, 100, 100));
        let window = new_window(&mut conn, Rect::new(10, 10, 50, 50));
        conn.backend().headless().set_property(
            window,
            atoms.WM_TRANSIENT_FOR,
            PropertyReply::from_u32s(atoms.WINDOW, &[parent]),
        );

        let mut proxy = proxy_for(&mut conn, &atoms, window);
        assert_eq!(proxy.effective_type(&atoms), WindowType::Dialog);

        conn.backend()
            .headless()
            .delete_property(window, atoms.WM_TRANSIENT_FOR);
        let event = std::iter::from_fn(|| conn.next_event().unwrap())
            .find(|e| matches!(e, Event::PropertyNotify { deleted: true, .. }));
        let Some(Event::PropertyNotify { atom, .. }) = event else {
            panic!("no PropertyNotify for the deletion");
        };
        assert!(proxy.on_property_changed(&mut conn, &atoms, atom));
        proxy.resolve_all(&mut conn, &atoms);

        assert_eq!(proxy.effective_type(&atoms), WindowType::Normal);
    }

    #[test]
    fn override_redirect_transient_is_normal() {
        let (mut conn, atoms) = setup();
        let root = conn.root();
        let headless = conn.backend().headless();
        let window = headless.create_window(Rect::new(0, 0, 10, 10), true);
        headless.set_property(
            window,
            atoms.WM_TRANSIENT_FOR,
            PropertyReply::from_u32s(atoms.WINDOW, &[root]),
        );

        let proxy = proxy_for(&mut conn, &atoms, window);
        assert_eq!(proxy.effective_type(&atoms), WindowType::Normal);
    }

    #[test]
    fn declared_type_wins_and_unknown_types_collapse() {
        let (mut conn, atoms) = setup();
        let window = new_window(&mut conn, Rect::new(0, 0, 10, 10));
        let unknown = conn.backend().headless().atom("_KDE_NET_WM_WINDOW_TYPE_OVERRIDE");
        conn.backend().headless().set_property(
            window,
            atoms._NET_WM_WINDOW_TYPE,
            PropertyReply::from_u32s(atoms.ATOM, &[unknown, atoms._NET_WM_WINDOW_TYPE_DOCK]),
        );
        let proxy = proxy_for(&mut conn, &atoms, window);
        assert_eq!(proxy.effective_type(&atoms), WindowType::Dock);

        let window = new_window(&mut conn, Rect::new(0, 0, 10, 10));
        conn.backend().headless().set_property(
            window,
            atoms._NET_WM_WINDOW_TYPE,
            PropertyReply::from_u32s(atoms.ATOM, &[unknown]),
        );
        let proxy = proxy_for(&mut conn, &atoms, window);
        assert_eq!(proxy.effective_type(&atoms), WindowType::Normal);
    }

    #[test]
    fn damage_is_offset_by_border_and_subtracted_per_batch() {
        let (mut conn, atoms) = setup();
        let window = new_window(&mut conn, Rect::new(0, 0, 40, 40));
        conn.backend().headless().set_border_width(window, 2);
        let mut proxy = proxy_for(&mut conn, &atoms, window);
        let view = ViewId::from_raw(1);
        proxy.add_view(view);
        proxy.redirect(&mut conn).unwrap();
        proxy.clear_damaged(view);
        drain(&mut conn);
        conn.backend().headless().clear_requests();

        conn.backend()
            .headless()
            .damage_window(window, &[Rect::new(0, 0, 4, 4), Rect::new(10, 10, 4, 4)]);
        while let Some(event) = conn.next_event().unwrap() {
            if let Event::DamageNotify {
                damage, area, more, ..
            } = event
            {
                assert!(proxy.on_damage(&mut conn, damage, area, more));
            }
        }

        assert_eq!(
            proxy.damaged(view),
            Some(&Region::from_rects([
                Rect::new(2, 2, 4, 4),
                Rect::new(12, 12, 4, 4)
            ]))
        );
        let subtracts = conn
            .backend()
            .headless()
            .requests()
            .iter()
            .filter(|r| matches!(r, Request::DamageSubtract(_)))
            .count();
        assert_eq!(subtracts, 1);

        assert!(!proxy.on_damage(&mut conn, 0x1234, Rect::new(0, 0, 1, 1), false));
    }

    #[test]
    fn resize_invalidates_pixmap_and_damages_everything() {
        let (mut conn, atoms) = setup();
        let window = new_window(&mut conn, Rect::new(0, 0, 40, 40));
        let mut proxy = proxy_for(&mut conn, &atoms, window);
        let view = ViewId::from_raw(1);
        proxy.add_view(view);
        proxy.redirect(&mut conn).unwrap();
        let pixmap = proxy.pixmap(&mut conn).unwrap();
        proxy.clear_damaged(view);

        let moved = Geometry {
            x: 5,
            ..*proxy.geometry()
        };
        assert!(!proxy.on_configure(moved, false));
        assert!(proxy.redirection().has_pixmap());
        assert!(!proxy.has_damage(view));

        let resized = Geometry {
            width: 80,
            depth: 0,
            ..moved
        };
        assert!(proxy.on_configure(resized, false));
        assert!(!proxy.redirection().has_pixmap());
        assert_eq!(proxy.geometry().depth, pixmap.depth());
        assert_eq!(
            proxy.damaged(view),
            Some(&Region::from_rect(Rect::new(0, 0, 80, 40)))
        );
    }

    #[test]
    fn shape_follows_notifications() {
        let (mut conn, atoms) = setup();
        let window = new_window(&mut conn, Rect::new(0, 0, 40, 40));
        let mut proxy = proxy_for(&mut conn, &atoms, window);
        assert_eq!(proxy.shape(), None);
        drain(&mut conn);

        let rects = vec![Rect::new(0, 0, 10, 40), Rect::new(10, 0, 30, 10)];
        conn.backend().headless().set_shape(window, Some(rects.clone()));
        assert!(matches!(
            conn.next_event().unwrap(),
            Some(Event::ShapeNotify { shaped: true, .. })
        ));
        proxy.on_shape_changed(&mut conn);
        proxy.resolve_all(&mut conn, &atoms);

        assert_eq!(proxy.shape(), Some(&Region::from_rects(rects)));
    }
}
