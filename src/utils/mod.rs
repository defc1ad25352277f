use std::time::Duration;

use git_version::git_version;

pub mod id;

pub fn version() -> String {
    if let Some(v) = option_env!("CAIRN_BUILD_VERSION_STRING") {
        return String::from(v);
    }

    const MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
    const MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
    const PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");

    let commit =
        option_env!("CAIRN_BUILD_COMMIT").unwrap_or(git_version!(fallback = "unknown commit"));

    if PATCH == "0" {
        format!("{MAJOR}.{MINOR} ({commit})")
    } else {
        format!("{MAJOR}.{MINOR}.{PATCH} ({commit})")
    }
}

pub fn get_monotonic_time() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid timespec and CLOCK_MONOTONIC is always available on Linux.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Formats an X resource id the way xprop and xwininfo do.
pub fn xid(id: u32) -> String {
    format!("{id:#x}")
}

/// Decodes Latin-1 bytes, which map one-to-one onto the first 256 code points.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Splits NUL-separated property data into strings, dropping the trailing terminator.
pub fn split_nul(bytes: &[u8]) -> Vec<&[u8]> {
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    if bytes.is_empty() {
        return Vec::new();
    }
    bytes.split(|&b| b == 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_decoding() {
        assert_eq!(latin1_to_string(b"caf\xe9"), "café");
    }

    #[test]
    fn nul_splitting() {
        assert_eq!(split_nul(b"xterm\0XTerm\0"), vec![&b"xterm"[..], &b"XTerm"[..]]);
        assert_eq!(split_nul(b"one"), vec![&b"one"[..]]);
        assert!(split_nul(b"").is_empty());
        assert!(split_nul(b"\0").is_empty());
    }

    #[test]
    fn xid_formatting() {
        assert_eq!(xid(0x1c00003), "0x1c00003");
    }
}
