use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Context;

use crate::backend::Backend;
use crate::compositor::{Compositor, Pixmap, View};
use crate::connection::{Connection, ManagerRole, Role, RoleError};
use crate::protocol::{
    Atoms, Event, EventMask, Extensions, MapState, Request, Window,
};
use crate::region::Region;
use crate::utils::xid;
use crate::window::{ClientProxy, InvalidClient, WindowInfo};

/// Startup options, from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Replace a running window manager or compositing manager.
    pub replace: bool,
    /// Try to become the compositing manager.
    pub composite: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            replace: false,
            composite: true,
        }
    }
}

pub struct State {
    pub conn: Connection,
    pub atoms: Atoms,
    pub extensions: Extensions,
    pub compositor: Compositor,
    clients: HashMap<Window, ClientProxy>,
    options: Options,
    wm_role: Option<ManagerRole>,
    cm_role: Option<ManagerRole>,
    screen_size: (i32, i32),
    stop: bool,
}

impl State {
    pub fn new(backend: Backend, options: Options) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("State::new");

        let mut conn = Connection::new(backend);
        let extensions = conn
            .discover_extensions()
            .context("error checking X server extensions")?;
        let atoms = Atoms::intern(&mut conn).context("error interning atoms")?;

        let root = conn.root();
        let token = conn.select_input(
            root,
            EventMask::SUBSTRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE,
        );
        conn.reply(token).context("error selecting events on the root window")?;
        conn.send(Request::SelectScreenChange(root));

        let screen = conn.screen();
        Ok(Self {
            conn,
            atoms,
            extensions,
            compositor: Compositor::new(&extensions),
            clients: HashMap::new(),
            options,
            wm_role: None,
            cm_role: None,
            screen_size: (screen.width, screen.height),
            stop: false,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn screen_size(&self) -> (i32, i32) {
        self.screen_size
    }

    /// Whether the main loop should exit.
    pub fn should_stop(&self) -> bool {
        self.stop || self.conn.is_broken()
    }

    pub fn client(&self, window: Window) -> Option<&ClientProxy> {
        self.clients.get(&window)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientProxy> {
        self.clients.values()
    }

    /// Starts tracking every viewable top-level window. Returns how many are tracked.
    pub fn scan_windows(&mut self) -> anyhow::Result<usize> {
        let _span = tracy_client::span!("State::scan_windows");

        let root = self.conn.root();
        let token = self.conn.query_tree(root);
        let tree = self
            .conn
            .reply(token)
            .context("error querying the window tree")?;

        let tokens: Vec<_> = tree
            .children
            .iter()
            .map(|&window| (window, self.conn.get_window_attributes(window)))
            .collect();
        let mut viewable = Vec::new();
        for (window, token) in tokens {
            match self.conn.reply(token) {
                Ok(attributes) if attributes.map_state == MapState::Viewable => {
                    viewable.push(window)
                }
                Ok(_) => (),
                Err(err) => debug!("skipping {}: {err}", xid(window)),
            }
        }

        for window in viewable {
            if let Err(err) = self.manage(window) {
                debug!("not tracking {}: {err}", xid(window));
            }
        }
        self.resolve_all();

        debug!("tracking {} windows", self.clients.len());
        Ok(self.clients.len())
    }

    /// Starts tracking `window` unless already tracked.
    pub fn manage(&mut self, window: Window) -> Result<&mut ClientProxy, InvalidClient> {
        if !self.clients.contains_key(&window) {
            let proxy = ClientProxy::new(&mut self.conn, &self.atoms, window)?;
            self.clients.insert(window, proxy);
        }
        self.clients
            .get_mut(&window)
            .ok_or(InvalidClient::Destroyed(window))
    }

    /// Stops tracking a window that has no views left. Returns whether it was dropped.
    fn unmanage_if_unused(&mut self, window: Window) -> bool {
        let Some(proxy) = self.clients.get_mut(&window) else {
            return false;
        };
        if proxy.view_count() > 0 {
            return false;
        }
        self.unmanage(window);
        true
    }

    fn unmanage(&mut self, window: Window) {
        let Some(mut proxy) = self.clients.remove(&window) else {
            return;
        };
        proxy.unredirect(&mut self.conn);
        proxy.discard_pending(&mut self.conn);
        trace!("stopped tracking {}", xid(window));
    }

    pub fn dispatch(&mut self, event: Event) {
        let _span = tracy_client::span!("State::dispatch");
        trace!("{event:?}");

        let root = self.conn.root();
        match event {
            Event::CreateNotify { .. } => (),
            Event::MapNotify { event, window, .. } => {
                if event != root {
                    return;
                }
                match self.clients.get_mut(&window) {
                    Some(proxy) => proxy.on_map(),
                    None => {
                        if let Err(err) = self.manage(window) {
                            debug!("not tracking {}: {err}", xid(window));
                        }
                    }
                }
            }
            Event::UnmapNotify { event, window } => {
                if event != root {
                    return;
                }
                if let Some(proxy) = self.clients.get_mut(&window) {
                    proxy.on_unmap();
                }
            }
            Event::DestroyNotify { window, .. } => {
                self.compositor.surfaces.on_window_destroyed(window);
                if let Some(proxy) = self.clients.get_mut(&window) {
                    proxy.on_destroyed(&mut self.conn);
                }
                self.unmanage_if_unused(window);
            }
            Event::ReparentNotify { window, parent, .. } => {
                if parent == root {
                    if let Some(proxy) = self.clients.get_mut(&window) {
                        proxy.reattach();
                    }
                    return;
                }
                // Reparented into a frame, it is no longer a top-level window.
                if self.unmanage_if_unused(window) || !self.clients.contains_key(&window) {
                    // The root stops reporting its destruction.
                    self.compositor.surfaces.on_window_destroyed(window);
                } else if let Some(proxy) = self.clients.get_mut(&window) {
                    proxy.detach(&mut self.conn);
                }
            }
            Event::ConfigureNotify {
                window,
                geometry,
                override_redirect,
                ..
            } => {
                if window == root {
                    self.screen_size = (geometry.width, geometry.height);
                } else if let Some(proxy) = self.clients.get_mut(&window) {
                    proxy.on_configure(geometry, override_redirect);
                }
            }
            Event::PropertyNotify { window, atom, .. } => {
                if let Some(proxy) = self.clients.get_mut(&window) {
                    proxy.on_property_changed(&mut self.conn, &self.atoms, atom);
                }
            }
            Event::SelectionClear { .. } => self.on_selection_clear(&event),
            Event::DamageNotify {
                drawable,
                damage,
                area,
                more,
            } => {
                if let Some(proxy) = self.clients.get_mut(&drawable) {
                    proxy.on_damage(&mut self.conn, damage, area, more);
                }
            }
            Event::ShapeNotify { window, .. } => {
                if let Some(proxy) = self.clients.get_mut(&window) {
                    proxy.on_shape_changed(&mut self.conn);
                }
            }
            Event::ScreenChange { width, height, .. } => {
                debug!("screen changed to {width}x{height}");
                self.screen_size = (width, height);
            }
            Event::Error(err) => {
                if err.code.is_gone() {
                    debug!("{err}");
                } else {
                    warn!("{err}");
                }
            }
        }
    }

    fn on_selection_clear(&mut self, event: &Event) {
        if self.wm_role.is_some_and(|role| role.is_lost_by(event)) {
            warn!("replaced by another window manager, exiting");
            self.wm_role = None;
            self.stop = true;
        }
        if self.cm_role.is_some_and(|role| role.is_lost_by(event)) {
            warn!("replaced by another compositing manager, disabling compositing");
            self.cm_role = None;
            self.disable_compositing();
        }
    }

    /// Dispatches every event received so far, then resolves what they asked for.
    pub fn dispatch_pending(&mut self) {
        loop {
            match self.conn.next_event() {
                Ok(Some(event)) => self.dispatch(event),
                Ok(None) => break,
                Err(err) => {
                    error!("error reading X events: {err}");
                    break;
                }
            }
        }
        self.resolve_all();
    }

    fn resolve_all(&mut self) {
        for proxy in self.clients.values_mut() {
            if proxy.has_pending() {
                proxy.resolve_all(&mut self.conn, &self.atoms);
            }
        }
    }

    /// Work done once per frame: catch up with the server and write out requests.
    pub fn refresh(&mut self) {
        let _span = tracy_client::span!("State::refresh");

        self.dispatch_pending();

        for proxy in self.clients.values_mut() {
            let changed = proxy.take_changed();
            if !changed.is_empty() {
                trace!("{} changed {changed:?}", xid(proxy.window()));
            }
            for view in proxy.redirection().views() {
                if let Some(damaged) = proxy.damaged(view).filter(|d| !d.is_empty()) {
                    trace!("{} view {} damaged {damaged}", xid(proxy.window()), view.get());
                }
            }
        }

        if let Err(err) = self.conn.flush() {
            error!("error flushing X connection: {err}");
        }
    }

    /// Tracked windows, ordered by id.
    pub fn windows(&self) -> Vec<WindowInfo> {
        let mut windows: Vec<_> = self
            .clients
            .values()
            .map(|proxy| proxy.info(&self.atoms))
            .collect();
        windows.sort_by_key(|info| info.id);
        windows
    }

    /// Leases the contents of `window`, redirecting it if this is its first view and
    /// compositing is on.
    pub fn create_view(&mut self, window: Window) -> Result<View, InvalidClient> {
        let compositing = self.compositor.is_enabled();
        self.manage(window)?;
        let Some(proxy) = self.clients.get_mut(&window) else {
            return Err(InvalidClient::Destroyed(window));
        };
        if proxy.has_pending() {
            proxy.resolve_all(&mut self.conn, &self.atoms);
        }

        let view = View::new(window);
        proxy.add_view(view.id());
        if compositing {
            if let Err(err) = proxy.redirect(&mut self.conn) {
                debug!("error redirecting {}: {err}", xid(window));
            }
        }
        Ok(view)
    }

    /// Gives back a view. The last view of a window unredirects it.
    pub fn destroy_view(&mut self, view: View) {
        let window = view.window();
        let Some(proxy) = self.clients.get_mut(&window) else {
            return;
        };
        if proxy.remove_view(view.id()) {
            return;
        }

        proxy.unredirect(&mut self.conn);
        if proxy.is_destroyed() {
            self.clients.remove(&window);
        } else if proxy.is_detached() {
            self.unmanage(window);
            self.compositor.surfaces.on_window_destroyed(window);
        }
    }

    /// Damage the view has not consumed yet, relative to the window's outer corner.
    pub fn get_damaged(&self, view: &View) -> Region {
        self.clients
            .get(&view.window())
            .and_then(|proxy| proxy.damaged(view.id()))
            .cloned()
            .unwrap_or_default()
    }

    /// Marks everything the view had as consumed and returns it.
    pub fn clear_damaged(&mut self, view: &View) -> Region {
        self.clients
            .get_mut(&view.window())
            .map(|proxy| proxy.clear_damaged(view.id()))
            .unwrap_or_default()
    }

    pub fn has_damage(&self, view: &View) -> bool {
        self.clients
            .get(&view.window())
            .is_some_and(|proxy| proxy.has_damage(view.id()))
    }

    /// Current contents of the viewed window.
    pub fn view_pixmap(&mut self, view: &View) -> Option<Rc<Pixmap>> {
        self.clients
            .get_mut(&view.window())?
            .pixmap(&mut self.conn)
    }

    /// Turns compositing on and redirects every window that has views.
    pub fn enable_compositing(&mut self) {
        if !self.compositor.enable() {
            return;
        }
        info!("compositing enabled");

        for proxy in self.clients.values_mut() {
            if proxy.view_count() == 0 {
                continue;
            }
            if let Err(err) = proxy.redirect(&mut self.conn) {
                debug!("error redirecting {}: {err}", xid(proxy.window()));
            }
        }
    }

    /// Turns compositing off and unredirects every window.
    pub fn disable_compositing(&mut self) {
        if !self.compositor.disable() {
            return;
        }
        info!("compositing disabled");

        for proxy in self.clients.values_mut() {
            proxy.unredirect(&mut self.conn);
        }
    }

    /// Keeps the surface of `window` alive for a render in flight. Returns the keep count.
    pub fn keep_surface(&mut self, window: Window) -> u32 {
        let proxy = self.clients.get_mut(&window);
        let live = proxy
            .as_ref()
            .is_some_and(|proxy| !proxy.is_destroyed() && !proxy.is_detached());
        let pixmap = proxy.and_then(|proxy| proxy.pixmap(&mut self.conn));

        let count = self.compositor.surfaces.keep(window, pixmap);
        if !live {
            // No DestroyNotify will be routed here anymore.
            self.compositor.surfaces.on_window_destroyed(window);
        }
        count
    }

    /// Drops a reference taken by [`State::keep_surface`]. Returns whether the surface was
    /// evicted.
    pub fn release_surface(&mut self, window: Window) -> bool {
        self.compositor.surfaces.release(window)
    }

    pub fn register_as_window_manager(&mut self, replace: bool) -> Result<(), RoleError> {
        let role = self
            .conn
            .acquire_role(&self.atoms, Role::WindowManager, replace)?;
        self.wm_role = Some(role);
        Ok(())
    }

    /// Takes the compositing manager role and enables compositing.
    pub fn register_as_compositing_manager(&mut self) -> Result<(), RoleError> {
        let role = self.conn.acquire_role(
            &self.atoms,
            Role::CompositingManager,
            self.options.replace,
        )?;
        self.cm_role = Some(role);
        self.enable_compositing();
        Ok(())
    }
}
