//! Negotiating the window manager and compositing manager roles.
//!
//! Each role is an ICCCM manager selection. Taking over from a running manager means taking its
//! selection and waiting for it to destroy its owner window.

use std::fmt;
use std::time::Duration;

use super::{Connection, RequestError};
use crate::protocol::{
    Atom, Atoms, Event, EventMask, ManagerMessage, Request, Timestamp, Window, NONE,
};
use crate::utils::xid;

/// How long a replaced manager gets to exit.
pub const TAKEOVER_TIMEOUT: Duration = Duration::from_secs(5);

const TIMESTAMP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    WindowManager,
    CompositingManager,
}

impl Role {
    pub fn selection_name(self, screen: usize) -> String {
        match self {
            Role::WindowManager => format!("WM_S{screen}"),
            Role::CompositingManager => format!("_NET_WM_CM_S{screen}"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::WindowManager => "window manager",
            Role::CompositingManager => "compositing manager",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("another {role} is already running (use --replace to replace it)")]
    AlreadyOwned { role: Role, owner: Window },
    #[error("the running {role} did not exit within {} seconds", .waited.as_secs())]
    Timeout { role: Role, waited: Duration },
    #[error("another client took the {role} selection at the same time")]
    VerifyFailed { role: Role },
    #[error("the X server did not report a timestamp")]
    NoTimestamp,
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// A role this connection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerRole {
    pub role: Role,
    pub selection: Atom,
    /// Our window owning the selection.
    pub owner: Window,
    pub time: Timestamp,
}

impl ManagerRole {
    /// Whether `event` says another client took this role away.
    pub fn is_lost_by(&self, event: &Event) -> bool {
        matches!(
            *event,
            Event::SelectionClear { owner, selection, .. }
                if owner == self.owner && selection == self.selection
        )
    }
}

impl Connection {
    /// Claims a manager role, replacing the current holder if `replace` is set.
    ///
    /// Fails right away if the role is held and `replace` is not set. When replacing, waits up to
    /// [`TAKEOVER_TIMEOUT`] for the previous holder to go away.
    pub fn acquire_role(
        &mut self,
        atoms: &Atoms,
        role: Role,
        replace: bool,
    ) -> Result<ManagerRole, RoleError> {
        let _span = tracy_client::span!("Connection::acquire_role");

        let name = role.selection_name(self.screen().number);
        let token = self.intern_atom(&name, false);
        let selection = self.reply(token)?.0;

        let owner = self.generate_id()?;
        let root = self.root();
        let token = self.send_checked(Request::CreateOwnerWindow {
            window: owner,
            root,
        });
        self.reply(token)?;

        let result = self.take_selection(atoms, role, selection, owner, replace);
        if result.is_err() {
            // Destroying the owner window also gives up the selection if we got that far.
            self.send(Request::DestroyWindow(owner));
        }
        result
    }

    fn take_selection(
        &mut self,
        atoms: &Atoms,
        role: Role,
        selection: Atom,
        owner: Window,
        replace: bool,
    ) -> Result<ManagerRole, RoleError> {
        let time = self.server_time(atoms, owner)?;

        let token = self.get_selection_owner(selection);
        let previous = self.reply(token)?.0;

        let mut watching = false;
        if previous != NONE {
            if !replace {
                return Err(RoleError::AlreadyOwned {
                    role,
                    owner: previous,
                });
            }

            info!("replacing the running {role} ({})", xid(previous));
            let token = self.select_input(previous, EventMask::STRUCTURE_NOTIFY);
            match self.reply(token) {
                Ok(()) => watching = true,
                Err(err) if err.is_gone() => debug!("previous {role} is already gone"),
                Err(err) => return Err(err.into()),
            }
        }

        self.send(Request::SetSelectionOwner {
            owner,
            selection,
            time,
        });
        let token = self.get_selection_owner(selection);
        if self.reply(token)?.0 != owner {
            return Err(RoleError::VerifyFailed { role });
        }

        if watching {
            let deadline = self.clock().now() + TAKEOVER_TIMEOUT;
            let destroyed = self
                .wait_for_queued(
                    |e| matches!(*e, Event::DestroyNotify { window, .. } if window == previous),
                    deadline,
                )
                .map_err(RequestError::from)?;
            if destroyed.is_none() {
                return Err(RoleError::Timeout {
                    role,
                    waited: TAKEOVER_TIMEOUT,
                });
            }
            debug!("previous {role} exited");
        }

        self.send(Request::SendManagerMessage(ManagerMessage {
            root: self.root(),
            manager_atom: atoms.MANAGER,
            time,
            selection,
            owner,
        }));

        info!("acquired the {role} role");
        Ok(ManagerRole {
            role,
            selection,
            owner,
            time,
        })
    }

    /// Gets a server timestamp from the PropertyNotify of an empty append to `window`.
    fn server_time(&mut self, atoms: &Atoms, window: Window) -> Result<Timestamp, RoleError> {
        let token = self.select_input(window, EventMask::PROPERTY_CHANGE);
        self.reply(token)?;

        let property = atoms._CAIRN_TIMESTAMP;
        let token = self.send_checked(Request::ChangeProperty {
            window,
            property,
            type_: atoms.STRING,
            format: 8,
            append: true,
            data: Vec::new(),
        });
        self.reply(token)?;

        let deadline = self.clock().now() + TIMESTAMP_TIMEOUT;
        let event = self
            .wait_for_queued(
                |e| {
                    matches!(*e, Event::PropertyNotify { window: w, atom, .. }
                        if w == window && atom == property)
                },
                deadline,
            )
            .map_err(RequestError::from)?;

        match event {
            Some(Event::PropertyNotify { time, .. }) => Ok(time),
            _ => Err(RoleError::NoTimestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::OwnerBehavior;
    use crate::backend::Headless;

    fn setup() -> (Connection, Atoms) {
        let mut conn = Connection::new(Headless::new().into());
        let atoms = Atoms::intern(&mut conn).unwrap();
        (conn, atoms)
    }

    #[test]
    fn free_role_is_claimed_and_announced() {
        let (mut conn, atoms) = setup();

        let role = conn
            .acquire_role(&atoms, Role::WindowManager, false)
            .unwrap();

        let headless = conn.backend().headless();
        assert_eq!(headless.selection_owner("WM_S0"), role.owner);
        assert!(headless.requests().iter().any(|r| matches!(
            r,
            Request::SendManagerMessage(msg) if msg.owner == role.owner && msg.selection == role.selection
        )));
    }

    #[test]
    fn held_role_without_replace_fails_immediately() {
        let (mut conn, atoms) = setup();
        let other = conn
            .backend()
            .headless()
            .add_selection_owner("WM_S0", OwnerBehavior::Exits);
        let start = conn.clock().now();

        let err = conn
            .acquire_role(&atoms, Role::WindowManager, false)
            .unwrap_err();

        assert!(matches!(err, RoleError::AlreadyOwned { owner, .. } if owner == other));
        assert_eq!(conn.clock().now(), start);
        assert_eq!(conn.backend().headless().selection_owner("WM_S0"), other);
    }

    #[test]
    fn replace_waits_for_previous_owner_to_exit() {
        let (mut conn, atoms) = setup();
        let other = conn
            .backend()
            .headless()
            .add_selection_owner("_NET_WM_CM_S0", OwnerBehavior::Exits);

        let role = conn
            .acquire_role(&atoms, Role::CompositingManager, true)
            .unwrap();

        let headless = conn.backend().headless();
        assert!(!headless.window_exists(other));
        assert_eq!(headless.selection_owner("_NET_WM_CM_S0"), role.owner);
    }

    #[test]
    fn stubborn_owner_times_out_at_deadline() {
        let (mut conn, atoms) = setup();
        conn.backend()
            .headless()
            .add_selection_owner("WM_S0", OwnerBehavior::Stubborn);
        let start = conn.clock().now();

        let err = conn
            .acquire_role(&atoms, Role::WindowManager, true)
            .unwrap_err();

        assert!(matches!(err, RoleError::Timeout { .. }));
        assert_eq!(conn.clock().now() - start, TAKEOVER_TIMEOUT);

        // The half-acquired selection is given up again.
        conn.flush().unwrap();
        assert_eq!(conn.backend().headless().selection_owner("WM_S0"), NONE);
    }

    #[test]
    fn selection_clear_marks_role_lost() {
        let (mut conn, atoms) = setup();
        let role = conn
            .acquire_role(&atoms, Role::CompositingManager, false)
            .unwrap();

        let clear = Event::SelectionClear {
            owner: role.owner,
            selection: role.selection,
            time: 0,
        };
        assert!(role.is_lost_by(&clear));

        let unrelated = Event::SelectionClear {
            owner: role.owner,
            selection: atoms.WM_NAME,
            time: 0,
        };
        assert!(!role.is_lost_by(&unrelated));
    }
}
