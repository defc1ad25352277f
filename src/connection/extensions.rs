use x11rb::errors::ConnectionError;

use super::Connection;
use crate::protocol::{ExtensionVersion, Extensions};

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("the X server lacks the {name} extension (version {major}.{minor} or newer is required)")]
    Missing {
        name: &'static str,
        major: u32,
        minor: u32,
    },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// NameWindowPixmap appeared in Composite 0.2.
const COMPOSITE_MIN: (u32, u32) = (0, 2);

fn at_least(version: Option<ExtensionVersion>, (major, minor): (u32, u32)) -> bool {
    version.is_some_and(|v| (v.major, v.minor) >= (major, minor))
}

impl Extensions {
    /// Whether windows can be redirected and their pixmaps named.
    pub fn can_composite(&self) -> bool {
        at_least(self.composite, COMPOSITE_MIN)
    }
}

impl Connection {
    /// Finds out which extensions the server supports.
    ///
    /// A missing mandatory extension is an error. A missing or too old Composite only disables
    /// compositing.
    pub fn discover_extensions(&mut self) -> Result<Extensions, ExtensionError> {
        let extensions = self.backend().query_extensions()?;

        // Extensions without which nothing works, with the oldest usable version.
        let mandatory = [
            ("DAMAGE", extensions.damage, (1, 1)),
            ("XFIXES", extensions.xfixes, (2, 0)),
            ("SHAPE", extensions.shape, (1, 0)),
            ("RANDR", extensions.randr, (1, 2)),
        ];

        for (name, version, (major, minor)) in mandatory {
            if !at_least(version, (major, minor)) {
                return Err(ExtensionError::Missing { name, major, minor });
            }
        }

        match extensions.composite {
            Some(v) if extensions.can_composite() => {
                debug!("Composite {}.{} available", v.major, v.minor);
            }
            Some(v) => {
                warn!(
                    "Composite {}.{} is too old, compositing disabled",
                    v.major, v.minor
                );
            }
            None => warn!("no Composite extension, compositing disabled"),
        }

        Ok(extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;

    fn discover(edit: impl FnOnce(&mut Extensions)) -> Result<Extensions, ExtensionError> {
        let mut headless = Headless::new();
        let mut extensions = headless.extensions();
        edit(&mut extensions);
        headless.set_extensions(extensions);
        Connection::new(headless.into()).discover_extensions()
    }

    #[test]
    fn all_present() {
        let extensions = discover(|_| ()).unwrap();
        assert!(extensions.can_composite());
    }

    #[test]
    fn missing_composite_only_disables_compositing() {
        let extensions = discover(|e| e.composite = None).unwrap();
        assert!(!extensions.can_composite());

        let extensions = discover(|e| {
            e.composite = Some(ExtensionVersion { major: 0, minor: 1 })
        })
        .unwrap();
        assert!(!extensions.can_composite());
    }

    #[test]
    fn missing_mandatory_is_fatal() {
        let err = discover(|e| e.damage = None).unwrap_err();
        assert!(matches!(err, ExtensionError::Missing { name: "DAMAGE", .. }));

        let err = discover(|e| e.xfixes = Some(ExtensionVersion { major: 1, minor: 0 }))
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Missing { name: "XFIXES", .. }));
    }
}
