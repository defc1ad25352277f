//! Per-window redirection state machine.

use std::collections::HashMap;
use std::rc::Rc;

use super::pixmap::Pixmap;
use super::ViewId;
use crate::connection::{Connection, RequestError};
use crate::protocol::{Damage, Geometry, Request, Visualid, Window};
use crate::region::{Rect, Region};
use crate::utils::xid;

#[derive(Debug, Default)]
pub enum RedirectState {
    #[default]
    Unredirected,
    Redirected {
        damage: Damage,
        /// `None` until somebody asks for the pixmap, and again after a resize.
        pixmap: Option<Rc<Pixmap>>,
    },
}

/// Redirection of one window plus the damage each of its views has not consumed yet.
#[derive(Debug, Default)]
pub struct Redirection {
    state: RedirectState,
    views: HashMap<ViewId, Region>,
}

/// Damage covering a whole window, border included.
pub fn full_damage(geometry: &Geometry) -> Region {
    let outer = geometry.outer_rect();
    Region::from_rect(Rect::from_size(outer.width, outer.height))
}

impl Redirection {
    pub fn state(&self) -> &RedirectState {
        &self.state
    }

    pub fn is_redirected(&self) -> bool {
        matches!(self.state, RedirectState::Redirected { .. })
    }

    pub fn has_pixmap(&self) -> bool {
        matches!(
            self.state,
            RedirectState::Redirected {
                pixmap: Some(_),
                ..
            }
        )
    }

    /// The pixmap named last, without naming a new one.
    pub fn cached_pixmap(&self) -> Option<Rc<Pixmap>> {
        match &self.state {
            RedirectState::Redirected { pixmap, .. } => pixmap.clone(),
            RedirectState::Unredirected => None,
        }
    }

    /// The damage object reporting for this window, while redirected.
    pub fn damage_object(&self) -> Option<Damage> {
        match self.state {
            RedirectState::Redirected { damage, .. } => Some(damage),
            RedirectState::Unredirected => None,
        }
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn views(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.views.keys().copied()
    }

    /// Redirects the window off-screen and starts tracking its damage.
    ///
    /// Does nothing if already redirected. On failure nothing is left behind on the server.
    pub fn redirect(
        &mut self,
        conn: &mut Connection,
        window: Window,
        geometry: &Geometry,
    ) -> Result<(), RequestError> {
        if self.is_redirected() {
            return Ok(());
        }

        let token = conn.send_checked(Request::RedirectWindow(window));
        conn.reply(token)?;

        let damage = match conn.generate_id() {
            Ok(damage) => damage,
            Err(err) => {
                conn.send(Request::UnredirectWindow(window));
                return Err(err);
            }
        };
        let token = conn.send_checked(Request::DamageCreate {
            damage,
            drawable: window,
        });
        if let Err(err) = conn.reply(token) {
            conn.send(Request::UnredirectWindow(window));
            return Err(err);
        }

        debug!("redirected {} with damage {}", xid(window), xid(damage));
        self.state = RedirectState::Redirected {
            damage,
            pixmap: None,
        };
        self.add_damage(&full_damage(geometry));
        Ok(())
    }

    /// Stops redirecting, dropping the pixmap and the damage object.
    ///
    /// When the window is already destroyed the server has freed both, so nothing is sent.
    pub fn unredirect(&mut self, conn: &mut Connection, window: Window, window_alive: bool) {
        let RedirectState::Redirected { damage, pixmap } = std::mem::take(&mut self.state) else {
            return;
        };
        drop(pixmap);

        if window_alive {
            conn.send(Request::DamageDestroy(damage));
            conn.send(Request::UnredirectWindow(window));
        }
        debug!("unredirected {}", xid(window));
    }

    /// The current contents of the window, naming a new pixmap if needed.
    ///
    /// Returns `None` when not redirected or when the server refuses, typically because the
    /// window is unmapped or already gone. A later call tries again.
    pub fn pixmap(
        &mut self,
        conn: &mut Connection,
        window: Window,
        geometry: &Geometry,
        visual: Visualid,
    ) -> Option<Rc<Pixmap>> {
        let RedirectState::Redirected { pixmap, .. } = &mut self.state else {
            return None;
        };
        if let Some(pixmap) = pixmap {
            return Some(pixmap.clone());
        }

        let id = match conn.generate_id() {
            Ok(id) => id,
            Err(err) => {
                warn!("error allocating a pixmap id: {err}");
                return None;
            }
        };
        let token = conn.send_checked(Request::NameWindowPixmap { window, pixmap: id });
        if let Err(err) = conn.reply(token) {
            debug!("error naming pixmap for {}: {err}", xid(window));
            return None;
        }

        let outer = geometry.outer_rect();
        let named = Rc::new(Pixmap::new(
            id,
            (outer.width, outer.height),
            geometry.depth,
            visual,
            conn.reaper(),
        ));
        *pixmap = Some(named.clone());
        Some(named)
    }

    /// Forgets the pixmap; the next [`Redirection::pixmap`] names a fresh one.
    pub fn invalidate(&mut self) {
        if let RedirectState::Redirected { pixmap, .. } = &mut self.state {
            *pixmap = None;
        }
    }

    /// Adds `region`, in window coordinates, to every view.
    pub fn add_damage(&mut self, region: &Region) {
        if region.is_empty() {
            return;
        }
        for damaged in self.views.values_mut() {
            *damaged = damaged.union(region);
        }
    }

    /// Starts tracking damage for a view, starting with `initial`.
    pub fn add_view(&mut self, view: ViewId, initial: Region) {
        self.views.insert(view, initial);
    }

    /// Stops tracking a view. Returns whether any views remain.
    pub fn remove_view(&mut self, view: ViewId) -> bool {
        self.views.remove(&view);
        !self.views.is_empty()
    }

    pub fn damaged(&self, view: ViewId) -> Option<&Region> {
        self.views.get(&view)
    }

    pub fn has_damage(&self, view: ViewId) -> bool {
        self.views.get(&view).is_some_and(|r| !r.is_empty())
    }

    /// Drains the damage of one view.
    pub fn clear(&mut self, view: ViewId) -> Region {
        self.views
            .get_mut(&view)
            .map(Region::take)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;
    use crate::protocol::EventMask;

    fn setup() -> (Connection, Window, Geometry) {
        let mut conn = Connection::new(Headless::new().into());
        let window = conn
            .backend()
            .headless()
            .create_window(Rect::new(10, 20, 100, 50), false);
        conn.backend().headless().map_window(window);
        let token = conn.get_geometry(window);
        let geometry = conn.reply(token).unwrap();
        (conn, window, geometry)
    }

    fn view(n: u64) -> ViewId {
        ViewId::from_raw(n)
    }

    #[test]
    fn redirect_seeds_full_damage_and_creates_damage_object() {
        let (mut conn, window, geometry) = setup();
        let mut redirection = Redirection::default();
        redirection.add_view(view(1), Region::empty());

        redirection.redirect(&mut conn, window, &geometry).unwrap();

        assert!(redirection.is_redirected());
        assert!(!redirection.has_pixmap());
        assert_eq!(
            redirection.damaged(view(1)),
            Some(&Region::from_rect(Rect::new(0, 0, 100, 50)))
        );
        let headless = conn.backend().headless();
        assert!(headless.is_redirected(window));
        assert_eq!(headless.live_damages(), 1);
    }

    #[test]
    fn redirect_of_missing_window_leaves_nothing() {
        let (mut conn, _, geometry) = setup();
        let mut redirection = Redirection::default();

        let err = redirection.redirect(&mut conn, 0xbad, &geometry).unwrap_err();

        assert!(err.is_gone());
        assert!(!redirection.is_redirected());
        assert_eq!(conn.backend().headless().live_damages(), 0);
    }

    #[test]
    fn pixmap_is_cached_until_invalidated() {
        let (mut conn, window, geometry) = setup();
        let mut redirection = Redirection::default();
        redirection.redirect(&mut conn, window, &geometry).unwrap();

        let first = redirection.pixmap(&mut conn, window, &geometry, 0x21).unwrap();
        let again = redirection.pixmap(&mut conn, window, &geometry, 0x21).unwrap();
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(first.size(), (100, 50));

        redirection.invalidate();
        drop(again);
        let fresh = redirection.pixmap(&mut conn, window, &geometry, 0x21).unwrap();
        assert_ne!(fresh.id(), first.id());

        // The old pixmap lives as long as somebody holds it.
        conn.flush().unwrap();
        assert_eq!(conn.backend().headless().live_pixmaps(), 2);
        drop(first);
        conn.flush().unwrap();
        assert_eq!(conn.backend().headless().live_pixmaps(), 1);
    }

    #[test]
    fn pixmap_failure_does_not_advance() {
        let (mut conn, window, geometry) = setup();
        let mut redirection = Redirection::default();
        redirection.redirect(&mut conn, window, &geometry).unwrap();
        conn.backend().headless().unmap_window(window);

        assert!(redirection
            .pixmap(&mut conn, window, &geometry, 0x21)
            .is_none());
        assert!(redirection.is_redirected());
        assert!(!redirection.has_pixmap());

        conn.backend().headless().map_window(window);
        assert!(redirection
            .pixmap(&mut conn, window, &geometry, 0x21)
            .is_some());
    }

    #[test]
    fn unredirect_frees_everything() {
        let (mut conn, window, geometry) = setup();
        let mut redirection = Redirection::default();
        redirection.redirect(&mut conn, window, &geometry).unwrap();
        let pixmap = redirection.pixmap(&mut conn, window, &geometry, 0x21);
        drop(pixmap);

        redirection.unredirect(&mut conn, window, true);
        conn.flush().unwrap();

        assert!(!redirection.is_redirected());
        let headless = conn.backend().headless();
        assert!(!headless.is_redirected(window));
        assert_eq!(headless.live_damages(), 0);
        assert_eq!(headless.live_pixmaps(), 0);
    }

    #[test]
    fn unredirect_after_destroy_sends_nothing() {
        let (mut conn, window, geometry) = setup();
        let token = conn.select_input(window, EventMask::STRUCTURE_NOTIFY);
        conn.reply(token).unwrap();
        let mut redirection = Redirection::default();
        redirection.redirect(&mut conn, window, &geometry).unwrap();

        conn.backend().headless().destroy_window(window);
        conn.backend().headless().clear_requests();
        redirection.unredirect(&mut conn, window, false);
        conn.flush().unwrap();

        assert!(conn.backend().headless().requests().is_empty());
        assert!(conn.next_event().unwrap().is_some_and(|e| matches!(
            e,
            crate::protocol::Event::DestroyNotify { .. }
        )));
        assert_eq!(conn.next_event().unwrap(), None);
    }

    #[test]
    fn views_drain_independently() {
        let mut redirection = Redirection::default();
        redirection.add_view(view(1), Region::empty());
        redirection.add_view(view(2), Region::empty());

        redirection.add_damage(&Region::from_rect(Rect::new(0, 0, 10, 10)));
        redirection.add_damage(&Region::from_rect(Rect::new(5, 5, 10, 10)));

        let expected = Region::from_rects([Rect::new(0, 0, 10, 10), Rect::new(5, 5, 10, 10)]);
        assert_eq!(redirection.clear(view(1)), expected);
        assert!(!redirection.has_damage(view(1)));
        assert!(redirection.has_damage(view(2)));
        assert_eq!(redirection.damaged(view(2)), Some(&expected));

        assert!(redirection.remove_view(view(1)));
        assert!(!redirection.remove_view(view(2)));
    }
}
