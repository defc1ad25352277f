//! In-process simulation of the parts of an X server the core talks to.
//!
//! Replies are computed when a request is sent and handed out when collected. Events are only
//! generated for windows whose event mask asks for them, the same way a real server delivers
//! them to a single client. Time only moves when waiting for events with nothing queued, so
//! deadlines can be tested without sleeping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::clock::Clock;
use crate::connection::RequestError;
use crate::protocol::{
    Atom, Attributes, Damage, ErrorCode, Event, EventMask, ExtensionVersion, Extensions,
    Geometry, MapState, Pixmap, PropertyReply, ProtocolError, Reply, Request, ScreenInfo,
    ShapeExtents, Tree, Window, ANY_PROPERTY_TYPE, NONE,
};
use crate::region::{Rect, Region};

/// Atoms every server predefines, in protocol order starting at 1.
const PREDEFINED_ATOMS: &[&str] = &[
    "PRIMARY",
    "SECONDARY",
    "ARC",
    "ATOM",
    "BITMAP",
    "CARDINAL",
    "COLORMAP",
    "CURSOR",
    "CUT_BUFFER0",
    "CUT_BUFFER1",
    "CUT_BUFFER2",
    "CUT_BUFFER3",
    "CUT_BUFFER4",
    "CUT_BUFFER5",
    "CUT_BUFFER6",
    "CUT_BUFFER7",
    "DRAWABLE",
    "FONT",
    "INTEGER",
    "PIXMAP",
    "POINT",
    "RECTANGLE",
    "RESOURCE_MANAGER",
    "RGB_COLOR_MAP",
    "RGB_BEST_MAP",
    "RGB_BLUE_MAP",
    "RGB_DEFAULT_MAP",
    "RGB_GRAY_MAP",
    "RGB_GREEN_MAP",
    "RGB_RED_MAP",
    "STRING",
    "VISUALID",
    "WINDOW",
    "WM_COMMAND",
    "WM_HINTS",
    "WM_CLIENT_MACHINE",
    "WM_ICON_NAME",
    "WM_ICON_SIZE",
    "WM_NAME",
    "WM_NORMAL_HINTS",
    "WM_SIZE_HINTS",
    "WM_ZOOM_HINTS",
    "MIN_SPACE",
    "NORM_SPACE",
    "MAX_SPACE",
    "END_SPACE",
    "SUPERSCRIPT_X",
    "SUPERSCRIPT_Y",
    "SUBSCRIPT_X",
    "SUBSCRIPT_Y",
    "UNDERLINE_POSITION",
    "UNDERLINE_THICKNESS",
    "STRIKEOUT_ASCENT",
    "STRIKEOUT_DESCENT",
    "ITALIC_ANGLE",
    "X_HEIGHT",
    "QUAD_WIDTH",
    "WEIGHT",
    "POINT_SIZE",
    "RESOLUTION",
    "COPYRIGHT",
    "NOTICE",
    "FONT_NAME",
    "FAMILY_NAME",
    "FULL_NAME",
    "CAP_HEIGHT",
    "WM_CLASS",
    "WM_TRANSIENT_FOR",
];

const ROOT: Window = 0x100;
const CLIENT_ID_BASE: u32 = 0x0020_0000;
const OTHER_CLIENT_ID_BASE: u32 = 0x0040_0000;

struct SimWindow {
    geometry: Geometry,
    attributes: Attributes,
    parent: Window,
    children: Vec<Window>,
    properties: HashMap<Atom, PropertyReply>,
    event_mask: EventMask,
    shape: Option<Vec<Rect>>,
    shape_events: bool,
    redirected: bool,
}

impl SimWindow {
    fn new(parent: Window, geometry: Geometry, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes,
            parent,
            children: Vec::new(),
            properties: HashMap::new(),
            event_mask: EventMask::NO_EVENT,
            shape: None,
            shape_events: false,
            redirected: false,
        }
    }

    fn wants(&self, mask: EventMask) -> bool {
        self.event_mask.contains(mask)
    }

    fn default_shape(&self) -> Rect {
        let bw = self.geometry.border_width;
        Rect::new(
            -bw,
            -bw,
            self.geometry.width + 2 * bw,
            self.geometry.height + 2 * bw,
        )
    }
}

/// How a selection owner belonging to another client reacts to losing its selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerBehavior {
    /// Destroys its owner window, as ICCCM asks of a replaced manager.
    Exits,
    /// Keeps running and never releases anything.
    Stubborn,
}

pub struct Headless {
    screen: ScreenInfo,
    clock: Clock,
    extensions: Extensions,
    seq: u64,
    next_client_id: u32,
    next_other_id: u32,
    atoms: Vec<String>,
    windows: HashMap<Window, SimWindow>,
    selections: HashMap<Atom, Window>,
    other_owners: HashMap<Window, OwnerBehavior>,
    damages: HashMap<Damage, Window>,
    pixmaps: HashSet<Pixmap>,
    replies: HashMap<u64, Result<Reply, ProtocolError>>,
    events: VecDeque<Event>,
    requests: Vec<Request>,
}

impl Headless {
    pub fn new() -> Self {
        let screen = ScreenInfo {
            number: 0,
            root: ROOT,
            width: 1920,
            height: 1080,
            root_depth: 24,
            root_visual: 0x21,
        };

        let geometry = Geometry {
            x: 0,
            y: 0,
            width: screen.width,
            height: screen.height,
            border_width: 0,
            depth: screen.root_depth,
        };
        let attributes = Attributes {
            map_state: MapState::Viewable,
            override_redirect: false,
            input_only: false,
            visual: screen.root_visual,
        };

        let mut windows = HashMap::new();
        windows.insert(ROOT, SimWindow::new(NONE, geometry, attributes));

        let version = |major, minor| Some(ExtensionVersion { major, minor });
        let extensions = Extensions {
            composite: version(0, 4),
            damage: version(1, 1),
            xfixes: version(5, 0),
            shape: version(1, 1),
            randr: version(1, 5),
        };

        Self {
            screen,
            clock: Clock::with_time(Duration::ZERO),
            extensions,
            seq: 0,
            next_client_id: CLIENT_ID_BASE,
            next_other_id: OTHER_CLIENT_ID_BASE,
            atoms: PREDEFINED_ATOMS.iter().map(|s| s.to_string()).collect(),
            windows,
            selections: HashMap::new(),
            other_owners: HashMap::new(),
            damages: HashMap::new(),
            pixmaps: HashSet::new(),
            replies: HashMap::new(),
            events: VecDeque::new(),
            requests: Vec::new(),
        }
    }

    pub fn screen(&self) -> ScreenInfo {
        self.screen
    }

    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    pub fn extensions(&self) -> Extensions {
        self.extensions
    }

    pub fn set_extensions(&mut self, extensions: Extensions) {
        self.extensions = extensions;
    }

    pub fn generate_id(&mut self) -> u32 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    pub fn send(&mut self, request: Request) -> u64 {
        self.seq += 1;
        let reply = self.handle(&request);
        if let Err(err) = &reply {
            trace!("simulated {err}");
        }
        self.replies.insert(self.seq, reply);
        self.requests.push(request);
        self.seq
    }

    pub fn wait_for_reply(&mut self, seq: u64) -> Result<Reply, RequestError> {
        match self.replies.remove(&seq) {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => Err(err.into()),
            None => Err(RequestError::NoReply(seq)),
        }
    }

    pub fn discard_reply(&mut self, seq: u64) {
        if let Some(Err(err)) = self.replies.remove(&seq) {
            self.events.push_back(Event::Error(err));
        }
    }

    pub fn poll_for_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn wait_for_event(&mut self, timeout: Duration) -> Option<Event> {
        let event = self.events.pop_front();
        if event.is_none() {
            self.clock.advance(timeout);
        }
        event
    }

    fn time(&self) -> u32 {
        self.clock.now().as_millis() as u32
    }

    fn intern(&mut self, name: &str, only_if_exists: bool) -> Atom {
        if let Some(idx) = self.atoms.iter().position(|n| n == name) {
            return idx as Atom + 1;
        }
        if only_if_exists {
            return NONE;
        }
        self.atoms.push(name.to_owned());
        self.atoms.len() as Atom
    }

    fn handle(&mut self, request: &Request) -> Result<Reply, ProtocolError> {
        let name = request.name();
        let error = |code, bad_value| ProtocolError {
            code,
            request: Some(name),
            bad_value,
        };
        let missing = |window| error(ErrorCode::Window, window);

        let reply = match request {
            Request::GetGeometry(w) => {
                let win = self.windows.get(w).ok_or_else(|| missing(*w))?;
                Reply::Geometry(win.geometry)
            }
            Request::GetWindowAttributes(w) => {
                let win = self.windows.get(w).ok_or_else(|| missing(*w))?;
                Reply::Attributes(win.attributes)
            }
            Request::QueryTree(w) => {
                let win = self.windows.get(w).ok_or_else(|| missing(*w))?;
                Reply::Tree(Tree {
                    root: ROOT,
                    parent: win.parent,
                    children: win.children.clone(),
                })
            }
            Request::SelectInput { window, mask } => {
                let win = self.windows.get_mut(window).ok_or_else(|| missing(*window))?;
                win.event_mask = *mask;
                Reply::Void
            }
            Request::InternAtom {
                name,
                only_if_exists,
            } => Reply::Atom(self.intern(name, *only_if_exists)),
            Request::GetProperty {
                window,
                property,
                type_,
                long_length,
            } => {
                let win = self.windows.get(window).ok_or_else(|| missing(*window))?;
                let reply = match win.properties.get(property) {
                    None => PropertyReply::absent(),
                    Some(prop) if *type_ != ANY_PROPERTY_TYPE && *type_ != prop.type_ => {
                        PropertyReply {
                            type_: prop.type_,
                            format: prop.format,
                            value: Vec::new(),
                        }
                    }
                    Some(prop) => {
                        let mut prop = prop.clone();
                        prop.value.truncate(*long_length as usize * 4);
                        prop
                    }
                };
                Reply::Property(reply)
            }
            Request::ChangeProperty {
                window,
                property,
                type_,
                format,
                append,
                data,
            } => {
                let time = self.time();
                let win = self.windows.get_mut(window).ok_or_else(|| missing(*window))?;
                match win.properties.get_mut(property) {
                    Some(prop) if *append => {
                        if prop.type_ != *type_ || prop.format != *format {
                            return Err(error(ErrorCode::Match, *window));
                        }
                        prop.value.extend_from_slice(data);
                    }
                    _ => {
                        let prop = PropertyReply {
                            type_: *type_,
                            format: *format,
                            value: data.clone(),
                        };
                        win.properties.insert(*property, prop);
                    }
                }
                if win.wants(EventMask::PROPERTY_CHANGE) {
                    self.events.push_back(Event::PropertyNotify {
                        window: *window,
                        atom: *property,
                        time,
                        deleted: false,
                    });
                }
                Reply::Void
            }
            Request::DeleteProperty { window, property } => {
                if !self.windows.contains_key(window) {
                    return Err(missing(*window));
                }
                self.remove_property(*window, *property);
                Reply::Void
            }
            Request::CreateOwnerWindow { window, root } => {
                if self.windows.contains_key(window) {
                    return Err(error(ErrorCode::IdChoice, *window));
                }
                let geometry = Geometry {
                    x: -1,
                    y: -1,
                    width: 1,
                    height: 1,
                    border_width: 0,
                    depth: 0,
                };
                let attributes = Attributes {
                    override_redirect: true,
                    input_only: true,
                    ..Attributes::default()
                };
                self.insert_window(*window, *root, geometry, attributes)
                    .ok_or_else(|| missing(*root))?;
                Reply::Void
            }
            Request::DestroyWindow(w) => {
                if !self.windows.contains_key(w) {
                    return Err(missing(*w));
                }
                self.destroy_window(*w);
                Reply::Void
            }
            Request::GetSelectionOwner(selection) => {
                Reply::SelectionOwner(self.selections.get(selection).copied().unwrap_or(NONE))
            }
            Request::SetSelectionOwner {
                owner, selection, ..
            } => {
                if *owner != NONE && !self.windows.contains_key(owner) {
                    return Err(missing(*owner));
                }
                self.transfer_selection(*selection, *owner);
                Reply::Void
            }
            Request::SendManagerMessage(_) => Reply::Void,
            Request::RedirectWindow(w) => {
                let win = self.windows.get_mut(w).ok_or_else(|| missing(*w))?;
                if win.redirected {
                    return Err(error(ErrorCode::Access, *w));
                }
                win.redirected = true;
                Reply::Void
            }
            Request::UnredirectWindow(w) => {
                let win = self.windows.get_mut(w).ok_or_else(|| missing(*w))?;
                if !win.redirected {
                    return Err(error(ErrorCode::Value, *w));
                }
                win.redirected = false;
                Reply::Void
            }
            Request::NameWindowPixmap { window, pixmap } => {
                let win = self.windows.get(window).ok_or_else(|| missing(*window))?;
                if !win.redirected || win.attributes.map_state != MapState::Viewable {
                    return Err(error(ErrorCode::Match, *window));
                }
                if !self.pixmaps.insert(*pixmap) {
                    return Err(error(ErrorCode::IdChoice, *pixmap));
                }
                Reply::Void
            }
            Request::FreePixmap(pixmap) => {
                if !self.pixmaps.remove(pixmap) {
                    return Err(error(ErrorCode::Pixmap, *pixmap));
                }
                Reply::Void
            }
            Request::DamageCreate { damage, drawable } => {
                if !self.windows.contains_key(drawable) {
                    return Err(error(ErrorCode::Drawable, *drawable));
                }
                self.damages.insert(*damage, *drawable);
                Reply::Void
            }
            Request::DamageDestroy(damage) => {
                if self.damages.remove(damage).is_none() {
                    return Err(error(ErrorCode::Damage, *damage));
                }
                Reply::Void
            }
            Request::DamageSubtract(damage) => {
                if !self.damages.contains_key(damage) {
                    return Err(error(ErrorCode::Damage, *damage));
                }
                Reply::Void
            }
            Request::ShapeSelectInput { window, enable } => {
                let win = self.windows.get_mut(window).ok_or_else(|| missing(*window))?;
                win.shape_events = *enable;
                Reply::Void
            }
            Request::ShapeQueryExtents(w) => {
                let win = self.windows.get(w).ok_or_else(|| missing(*w))?;
                let extents = match &win.shape {
                    Some(rects) => ShapeExtents {
                        bounding_shaped: true,
                        bounding: Region::from_rects(rects.iter().copied())
                            .bounds()
                            .unwrap_or_default(),
                    },
                    None => ShapeExtents {
                        bounding_shaped: false,
                        bounding: win.default_shape(),
                    },
                };
                Reply::ShapeExtents(extents)
            }
            Request::ShapeGetRectangles(w) => {
                let win = self.windows.get(w).ok_or_else(|| missing(*w))?;
                let rects = win.shape.clone().unwrap_or_else(|| vec![win.default_shape()]);
                Reply::ShapeRectangles(rects)
            }
            Request::SelectScreenChange(w) => {
                if !self.windows.contains_key(w) {
                    return Err(missing(*w));
                }
                Reply::Void
            }
        };

        Ok(reply)
    }

    fn insert_window(
        &mut self,
        window: Window,
        parent: Window,
        geometry: Geometry,
        attributes: Attributes,
    ) -> Option<()> {
        let parent_win = self.windows.get_mut(&parent)?;
        parent_win.children.push(window);
        if parent_win.wants(EventMask::SUBSTRUCTURE_NOTIFY) {
            self.events
                .push_back(Event::CreateNotify { parent, window });
        }
        self.windows
            .insert(window, SimWindow::new(parent, geometry, attributes));
        Some(())
    }

    /// Queues a structure event for the window itself and for its parent, as selected.
    fn structure_event(&mut self, window: Window, make: impl Fn(Window) -> Event) {
        let Some(win) = self.windows.get(&window) else {
            return;
        };
        if win.wants(EventMask::STRUCTURE_NOTIFY) {
            self.events.push_back(make(window));
        }
        if let Some(parent) = self.windows.get(&win.parent) {
            if parent.wants(EventMask::SUBSTRUCTURE_NOTIFY) {
                self.events.push_back(make(win.parent));
            }
        }
    }

    fn remove_property(&mut self, window: Window, property: Atom) {
        let time = self.time();
        let Some(win) = self.windows.get_mut(&window) else {
            return;
        };
        if win.properties.remove(&property).is_some() && win.wants(EventMask::PROPERTY_CHANGE) {
            self.events.push_back(Event::PropertyNotify {
                window,
                atom: property,
                time,
                deleted: true,
            });
        }
    }

    fn transfer_selection(&mut self, selection: Atom, owner: Window) {
        let time = self.time();
        let previous = if owner == NONE {
            self.selections.remove(&selection)
        } else {
            self.selections.insert(selection, owner)
        };

        let Some(previous) = previous.filter(|&p| p != owner) else {
            return;
        };

        match self.other_owners.get(&previous) {
            Some(OwnerBehavior::Exits) => self.destroy_window(previous),
            Some(OwnerBehavior::Stubborn) => (),
            None => self.events.push_back(Event::SelectionClear {
                owner: previous,
                selection,
                time,
            }),
        }
    }

    // Test and simulation helpers, acting as other clients on the same server.

    /// Returns the atom for `name`, interning it if needed.
    pub fn atom(&mut self, name: &str) -> Atom {
        self.intern(name, false)
    }

    /// Creates an unmapped top-level window owned by another client.
    pub fn create_window(&mut self, rect: Rect, override_redirect: bool) -> Window {
        let window = self.next_other_id;
        self.next_other_id += 1;

        let geometry = Geometry {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            border_width: 0,
            depth: self.screen.root_depth,
        };
        let attributes = Attributes {
            map_state: MapState::Unmapped,
            override_redirect,
            input_only: false,
            visual: self.screen.root_visual,
        };
        // The root always exists.
        let _ = self.insert_window(window, ROOT, geometry, attributes);
        window
    }

    pub fn set_border_width(&mut self, window: Window, border_width: i32) {
        if let Some(win) = self.windows.get_mut(&window) {
            win.geometry.border_width = border_width;
        }
    }

    pub fn map_window(&mut self, window: Window) {
        let Some(win) = self.windows.get_mut(&window) else {
            return;
        };
        win.attributes.map_state = MapState::Viewable;
        let override_redirect = win.attributes.override_redirect;
        self.structure_event(window, |event| Event::MapNotify {
            event,
            window,
            override_redirect,
        });
    }

    pub fn unmap_window(&mut self, window: Window) {
        let Some(win) = self.windows.get_mut(&window) else {
            return;
        };
        win.attributes.map_state = MapState::Unmapped;
        self.structure_event(window, |event| Event::UnmapNotify { event, window });
    }

    pub fn configure_window(&mut self, window: Window, rect: Rect) {
        let Some(win) = self.windows.get_mut(&window) else {
            return;
        };
        win.geometry.x = rect.x;
        win.geometry.y = rect.y;
        win.geometry.width = rect.width;
        win.geometry.height = rect.height;
        let geometry = win.geometry;
        let override_redirect = win.attributes.override_redirect;
        self.structure_event(window, |event| Event::ConfigureNotify {
            event,
            window,
            geometry,
            override_redirect,
        });
    }

    /// Moves a window under a new parent, keeping its position.
    pub fn reparent_window(&mut self, window: Window, parent: Window) {
        if !self.windows.contains_key(&parent) {
            return;
        }
        let Some(old_parent) = self.windows.get(&window).map(|w| w.parent) else {
            return;
        };

        let wants = |windows: &HashMap<Window, SimWindow>, receiver: Window, mask: EventMask| {
            windows.get(&receiver).is_some_and(|w| w.wants(mask))
        };
        let mut receivers = Vec::new();
        if wants(&self.windows, window, EventMask::STRUCTURE_NOTIFY) {
            receivers.push(window);
        }
        for receiver in [old_parent, parent] {
            if wants(&self.windows, receiver, EventMask::SUBSTRUCTURE_NOTIFY) {
                receivers.push(receiver);
            }
        }
        for event in receivers {
            self.events.push_back(Event::ReparentNotify {
                event,
                window,
                parent,
            });
        }

        if let Some(old) = self.windows.get_mut(&old_parent) {
            old.children.retain(|&c| c != window);
        }
        if let Some(new) = self.windows.get_mut(&parent) {
            new.children.push(window);
        }
        if let Some(win) = self.windows.get_mut(&window) {
            win.parent = parent;
        }
    }

    /// Destroys a window and its subwindows, children first.
    pub fn destroy_window(&mut self, window: Window) {
        let Some(children) = self.windows.get(&window).map(|w| w.children.clone()) else {
            return;
        };
        for child in children {
            self.destroy_window(child);
        }

        self.structure_event(window, |event| Event::DestroyNotify { event, window });

        if let Some(win) = self.windows.remove(&window) {
            if let Some(parent) = self.windows.get_mut(&win.parent) {
                parent.children.retain(|&c| c != window);
            }
        }
        self.damages.retain(|_, &mut drawable| drawable != window);
        self.selections.retain(|_, &mut owner| owner != window);
        self.other_owners.remove(&window);
    }

    pub fn set_property(&mut self, window: Window, property: Atom, value: PropertyReply) {
        let time = self.time();
        let Some(win) = self.windows.get_mut(&window) else {
            return;
        };
        win.properties.insert(property, value);
        if win.wants(EventMask::PROPERTY_CHANGE) {
            self.events.push_back(Event::PropertyNotify {
                window,
                atom: property,
                time,
                deleted: false,
            });
        }
    }

    pub fn delete_property(&mut self, window: Window, property: Atom) {
        self.remove_property(window, property);
    }

    /// Sets the bounding shape; `None` makes the window rectangular again.
    pub fn set_shape(&mut self, window: Window, rects: Option<Vec<Rect>>) {
        let Some(win) = self.windows.get_mut(&window) else {
            return;
        };
        let shaped = rects.is_some();
        win.shape = rects;
        if win.shape_events {
            self.events.push_back(Event::ShapeNotify { window, shaped });
        }
    }

    /// Reports one batch of raw damage rectangles to every damage object on the window.
    pub fn damage_window(&mut self, window: Window, rects: &[Rect]) {
        let mut damages: Vec<_> = self
            .damages
            .iter()
            .filter(|(_, &drawable)| drawable == window)
            .map(|(&damage, _)| damage)
            .collect();
        damages.sort_unstable();

        for damage in damages {
            for (i, &area) in rects.iter().enumerate() {
                self.events.push_back(Event::DamageNotify {
                    drawable: window,
                    damage,
                    area,
                    more: i + 1 < rects.len(),
                });
            }
        }
    }

    /// Makes another client the owner of `selection`.
    pub fn add_selection_owner(&mut self, selection: &str, behavior: OwnerBehavior) -> Window {
        let atom = self.intern(selection, false);
        let owner = self.create_window(Rect::new(-1, -1, 1, 1), true);
        self.other_owners.insert(owner, behavior);
        self.transfer_selection(atom, owner);
        owner
    }

    pub fn selection_owner(&mut self, selection: &str) -> Window {
        let atom = self.intern(selection, false);
        self.selections.get(&atom).copied().unwrap_or(NONE)
    }

    pub fn push_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn window_exists(&self, window: Window) -> bool {
        self.windows.contains_key(&window)
    }

    pub fn is_redirected(&self, window: Window) -> bool {
        self.windows.get(&window).is_some_and(|w| w.redirected)
    }

    pub fn live_pixmaps(&self) -> usize {
        self.pixmaps.len()
    }

    pub fn live_damages(&self) -> usize {
        self.damages.len()
    }
}

impl Default for Headless {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_are_computed_at_send_time() {
        let mut headless = Headless::new();
        let window = headless.create_window(Rect::new(10, 20, 300, 200), false);

        let seq = headless.send(Request::GetGeometry(window));
        headless.destroy_window(window);

        let Reply::Geometry(geometry) = headless.wait_for_reply(seq).unwrap() else {
            panic!("wrong reply kind");
        };
        assert_eq!(geometry.rect(), Rect::new(10, 20, 300, 200));

        let seq = headless.send(Request::GetGeometry(window));
        let err = headless.wait_for_reply(seq).unwrap_err();
        assert!(matches!(
            err,
            RequestError::Protocol(ProtocolError {
                code: ErrorCode::Window,
                ..
            })
        ));
    }

    #[test]
    fn discarded_errors_become_events() {
        let mut headless = Headless::new();
        let seq = headless.send(Request::FreePixmap(0x1234));
        headless.discard_reply(seq);

        let event = headless.poll_for_event().unwrap();
        assert_eq!(
            event,
            Event::Error(ProtocolError {
                code: ErrorCode::Pixmap,
                request: Some("FreePixmap"),
                bad_value: 0x1234,
            })
        );
    }

    #[test]
    fn events_follow_event_masks() {
        let mut headless = Headless::new();
        let window = headless.create_window(Rect::new(0, 0, 10, 10), false);

        headless.map_window(window);
        assert_eq!(headless.poll_for_event(), None);

        let seq = headless.send(Request::SelectInput {
            window: ROOT,
            mask: EventMask::SUBSTRUCTURE_NOTIFY,
        });
        headless.wait_for_reply(seq).unwrap();

        headless.unmap_window(window);
        assert_eq!(
            headless.poll_for_event(),
            Some(Event::UnmapNotify {
                event: ROOT,
                window
            })
        );
    }

    #[test]
    fn waiting_advances_time_only_when_idle() {
        let mut headless = Headless::new();
        let clock = headless.clock();

        assert_eq!(headless.wait_for_event(Duration::from_millis(100)), None);
        assert_eq!(clock.now(), Duration::from_millis(100));

        headless.push_event(Event::ScreenChange {
            root: ROOT,
            width: 800,
            height: 600,
        });
        assert!(headless.wait_for_event(Duration::from_millis(100)).is_some());
        assert_eq!(clock.now(), Duration::from_millis(100));
    }

    #[test]
    fn exiting_owner_destroys_its_window() {
        let mut headless = Headless::new();
        let old = headless.add_selection_owner("WM_S0", OwnerBehavior::Exits);
        let ours = headless.generate_id();
        headless.send(Request::CreateOwnerWindow {
            window: ours,
            root: ROOT,
        });

        let selection = headless.atom("WM_S0");
        headless.send(Request::SetSelectionOwner {
            owner: ours,
            selection,
            time: 0,
        });

        assert!(!headless.window_exists(old));
        assert_eq!(headless.selection_owner("WM_S0"), ours);
    }
}
