//! Typed decoding of window properties.
//!
//! A property that is missing, has an unexpected type, or has the wrong format decodes to a
//! [`PropertyError`]; callers store that as "absent" and never fail because of it.

use bitflags::bitflags;
use serde::Serialize;

use super::{Atom, Atoms, Window, NONE};
use crate::utils::{latin1_to_string, split_nul};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("property is not set")]
    Absent,
    #[error("unexpected property type {found}")]
    BadType { found: Atom },
    #[error("unexpected property format {found}, wanted {expected}")]
    BadFormat { expected: u8, found: u8 },
    #[error("property holds {found} items, wanted at least {expected}")]
    TooShort { expected: usize, found: usize },
}

/// Raw GetProperty reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyReply {
    pub type_: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

impl PropertyReply {
    /// Reply for a property that does not exist.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn from_bytes(type_: Atom, value: impl Into<Vec<u8>>) -> Self {
        Self {
            type_,
            format: 8,
            value: value.into(),
        }
    }

    pub fn from_u32s(type_: Atom, values: &[u32]) -> Self {
        Self {
            type_,
            format: 32,
            value: values.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.type_ == NONE
    }

    fn check(&self, types: &[Atom], format: u8) -> Result<(), PropertyError> {
        if self.is_absent() {
            return Err(PropertyError::Absent);
        }
        if !types.contains(&self.type_) {
            return Err(PropertyError::BadType { found: self.type_ });
        }
        if self.format != format {
            return Err(PropertyError::BadFormat {
                expected: format,
                found: self.format,
            });
        }
        Ok(())
    }

    fn u32s(&self) -> Vec<u32> {
        self.value
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn u32s_of(&self, type_: Atom, min_len: usize) -> Result<Vec<u32>, PropertyError> {
        self.check(&[type_], 32)?;
        let values = self.u32s();
        if values.len() < min_len {
            return Err(PropertyError::TooShort {
                expected: min_len,
                found: values.len(),
            });
        }
        Ok(values)
    }

    fn decode_text(&self, atoms: &Atoms, bytes: &[u8]) -> String {
        if self.type_ == atoms.UTF8_STRING {
            String::from_utf8_lossy(bytes).into_owned()
        } else {
            // COMPOUND_TEXT is only decoded for its Latin-1 subset.
            latin1_to_string(bytes)
        }
    }

    /// Single text property (WM_NAME, _NET_WM_NAME, ...).
    pub fn text(&self, atoms: &Atoms) -> Result<String, PropertyError> {
        self.check(&[atoms.STRING, atoms.UTF8_STRING, atoms.COMPOUND_TEXT], 8)?;
        let bytes = self.value.strip_suffix(&[0]).unwrap_or(&self.value);
        Ok(self.decode_text(atoms, bytes))
    }

    /// NUL-separated list of strings (WM_CLASS).
    pub fn text_list(&self, atoms: &Atoms) -> Result<Vec<String>, PropertyError> {
        self.check(&[atoms.STRING, atoms.UTF8_STRING, atoms.COMPOUND_TEXT], 8)?;
        Ok(split_nul(&self.value)
            .into_iter()
            .map(|s| self.decode_text(atoms, s))
            .collect())
    }

    pub fn atoms(&self, atoms: &Atoms) -> Result<Vec<Atom>, PropertyError> {
        self.u32s_of(atoms.ATOM, 0)
    }

    pub fn cardinals(&self, atoms: &Atoms) -> Result<Vec<u32>, PropertyError> {
        self.u32s_of(atoms.CARDINAL, 0)
    }

    pub fn cardinal(&self, atoms: &Atoms) -> Result<u32, PropertyError> {
        Ok(self.u32s_of(atoms.CARDINAL, 1)?[0])
    }

    pub fn window(&self, atoms: &Atoms) -> Result<Window, PropertyError> {
        Ok(self.u32s_of(atoms.WINDOW, 1)?[0])
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SizeHintsFlags: u32 {
        const US_POSITION = 1 << 0;
        const US_SIZE = 1 << 1;
        const P_POSITION = 1 << 2;
        const P_SIZE = 1 << 3;
        const P_MIN_SIZE = 1 << 4;
        const P_MAX_SIZE = 1 << 5;
        const P_RESIZE_INC = 1 << 6;
        const P_ASPECT = 1 << 7;
        const P_BASE_SIZE = 1 << 8;
        const P_WIN_GRAVITY = 1 << 9;
    }
}

/// WM_NORMAL_HINTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WmSizeHints {
    pub user_position: bool,
    pub program_position: bool,
    pub min_size: Option<(i32, i32)>,
    pub max_size: Option<(i32, i32)>,
    pub resize_inc: Option<(i32, i32)>,
    pub aspect: Option<((i32, i32), (i32, i32))>,
    pub base_size: Option<(i32, i32)>,
    pub win_gravity: Option<u32>,
}

impl WmSizeHints {
    pub fn from_reply(reply: &PropertyReply, atoms: &Atoms) -> Result<Self, PropertyError> {
        // Pre-ICCCM clients send 15 fields, without base size and gravity.
        let mut v = reply.u32s_of(atoms.WM_SIZE_HINTS, 15)?;
        v.resize(18, 0);

        let flags = SizeHintsFlags::from_bits_truncate(v[0]);
        let pair = |flag, a: usize| flags.contains(flag).then(|| (v[a] as i32, v[a + 1] as i32));

        Ok(Self {
            user_position: flags.contains(SizeHintsFlags::US_POSITION),
            program_position: flags.contains(SizeHintsFlags::P_POSITION),
            min_size: pair(SizeHintsFlags::P_MIN_SIZE, 5),
            max_size: pair(SizeHintsFlags::P_MAX_SIZE, 7),
            resize_inc: pair(SizeHintsFlags::P_RESIZE_INC, 9),
            aspect: flags
                .contains(SizeHintsFlags::P_ASPECT)
                .then(|| ((v[11] as i32, v[12] as i32), (v[13] as i32, v[14] as i32))),
            base_size: pair(SizeHintsFlags::P_BASE_SIZE, 15),
            win_gravity: flags.contains(SizeHintsFlags::P_WIN_GRAVITY).then_some(v[17]),
        })
    }

    /// Whether the client asks for a fixed size.
    pub fn is_fixed_size(&self) -> bool {
        matches!((self.min_size, self.max_size), (Some(min), Some(max)) if min == max && min.0 > 0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WmHintsFlags: u32 {
        const INPUT = 1 << 0;
        const STATE = 1 << 1;
        const ICON_PIXMAP = 1 << 2;
        const ICON_WINDOW = 1 << 3;
        const ICON_POSITION = 1 << 4;
        const ICON_MASK = 1 << 5;
        const WINDOW_GROUP = 1 << 6;
        const URGENCY = 1 << 8;
    }
}

/// WM_HINTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WmHints {
    pub input: Option<bool>,
    pub initial_state: Option<u32>,
    pub icon_pixmap: Option<u32>,
    pub icon_window: Option<Window>,
    pub window_group: Option<Window>,
    pub urgent: bool,
}

impl WmHints {
    pub fn from_reply(reply: &PropertyReply, atoms: &Atoms) -> Result<Self, PropertyError> {
        // Some toolkits omit the trailing window group.
        let mut v = reply.u32s_of(atoms.WM_HINTS, 8)?;
        v.resize(9, 0);

        let flags = WmHintsFlags::from_bits_truncate(v[0]);
        Ok(Self {
            input: flags.contains(WmHintsFlags::INPUT).then_some(v[1] != 0),
            initial_state: flags.contains(WmHintsFlags::STATE).then_some(v[2]),
            icon_pixmap: flags.contains(WmHintsFlags::ICON_PIXMAP).then_some(v[3]),
            icon_window: flags.contains(WmHintsFlags::ICON_WINDOW).then_some(v[4]),
            window_group: flags.contains(WmHintsFlags::WINDOW_GROUP).then_some(v[8]),
            urgent: flags.contains(WmHintsFlags::URGENCY),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IcccmState {
    Withdrawn,
    Normal,
    Iconic,
}

/// WM_STATE: the state/icon pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WmState {
    pub state: IcccmState,
    pub icon: Window,
}

impl WmState {
    pub fn from_reply(reply: &PropertyReply, atoms: &Atoms) -> Result<Self, PropertyError> {
        let v = reply.u32s_of(atoms.WM_STATE, 1)?;
        let state = match v[0] {
            1 => IcccmState::Normal,
            3 => IcccmState::Iconic,
            _ => IcccmState::Withdrawn,
        };
        Ok(Self {
            state,
            icon: v.get(1).copied().unwrap_or(NONE),
        })
    }
}

/// _MOTIF_WM_HINTS, of which only the decoration request matters here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotifHints {
    pub decorations: Option<bool>,
}

impl MotifHints {
    const DECORATIONS: u32 = 1 << 1;

    pub fn from_reply(reply: &PropertyReply, atoms: &Atoms) -> Result<Self, PropertyError> {
        let v = reply.u32s_of(atoms._MOTIF_WM_HINTS, 3)?;
        Ok(Self {
            decorations: (v[0] & Self::DECORATIONS != 0).then_some(v[2] != 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;
    use crate::connection::Connection;

    fn atoms() -> Atoms {
        let mut conn = Connection::new(Headless::new().into());
        Atoms::intern(&mut conn).unwrap()
    }

    #[test]
    fn text_decoding_by_type() {
        let atoms = atoms();

        let utf8 = PropertyReply::from_bytes(atoms.UTF8_STRING, "Привет".as_bytes());
        assert_eq!(utf8.text(&atoms).unwrap(), "Привет");

        let latin1 = PropertyReply::from_bytes(atoms.STRING, &b"caf\xe9\0"[..]);
        assert_eq!(latin1.text(&atoms).unwrap(), "café");

        let class = PropertyReply::from_bytes(atoms.STRING, &b"xterm\0XTerm\0"[..]);
        assert_eq!(class.text_list(&atoms).unwrap(), ["xterm", "XTerm"]);
    }

    #[test]
    fn wrong_type_or_format_is_rejected() {
        let atoms = atoms();

        assert_eq!(
            PropertyReply::absent().text(&atoms),
            Err(PropertyError::Absent)
        );

        let cardinal = PropertyReply::from_u32s(atoms.CARDINAL, &[5]);
        assert_eq!(
            cardinal.window(&atoms),
            Err(PropertyError::BadType {
                found: atoms.CARDINAL
            })
        );

        let mut bytes = PropertyReply::from_bytes(atoms.CARDINAL, vec![1, 2, 3, 4]);
        bytes.format = 8;
        assert_eq!(
            bytes.cardinal(&atoms),
            Err(PropertyError::BadFormat {
                expected: 32,
                found: 8
            })
        );

        let empty = PropertyReply::from_u32s(atoms.WINDOW, &[]);
        assert!(matches!(
            empty.window(&atoms),
            Err(PropertyError::TooShort { .. })
        ));
    }

    #[test]
    fn size_hints() {
        let atoms = atoms();
        let flags = SizeHintsFlags::P_MIN_SIZE | SizeHintsFlags::P_MAX_SIZE;
        let mut raw = [0u32; 18];
        raw[0] = flags.bits();
        raw[5] = 300;
        raw[6] = 200;
        raw[7] = 300;
        raw[8] = 200;

        let reply = PropertyReply::from_u32s(atoms.WM_SIZE_HINTS, &raw);
        let hints = WmSizeHints::from_reply(&reply, &atoms).unwrap();
        assert_eq!(hints.min_size, Some((300, 200)));
        assert_eq!(hints.base_size, None);
        assert!(hints.is_fixed_size());

        // Old 15-field layout still decodes.
        let reply = PropertyReply::from_u32s(atoms.WM_SIZE_HINTS, &raw[..15]);
        assert!(WmSizeHints::from_reply(&reply, &atoms).is_ok());
    }

    #[test]
    fn wm_hints_and_state() {
        let atoms = atoms();

        let flags = WmHintsFlags::INPUT | WmHintsFlags::URGENCY | WmHintsFlags::WINDOW_GROUP;
        let reply = PropertyReply::from_u32s(
            atoms.WM_HINTS,
            &[flags.bits(), 1, 0, 0, 0, 0, 0, 0, 0x400001],
        );
        let hints = WmHints::from_reply(&reply, &atoms).unwrap();
        assert_eq!(hints.input, Some(true));
        assert_eq!(hints.window_group, Some(0x400001));
        assert!(hints.urgent);

        let reply = PropertyReply::from_u32s(atoms.WM_STATE, &[3, 0]);
        let state = WmState::from_reply(&reply, &atoms).unwrap();
        assert_eq!(state.state, IcccmState::Iconic);
    }

    #[test]
    fn motif_decorations() {
        let atoms = atoms();
        let reply = PropertyReply::from_u32s(atoms._MOTIF_WM_HINTS, &[2, 0, 0, 0, 0]);
        let hints = MotifHints::from_reply(&reply, &atoms).unwrap();
        assert_eq!(hints.decorations, Some(false));
    }
}
