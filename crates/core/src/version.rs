//! Firmware version of a YubiKey

use std::str::FromStr;

use derive_more::Display;

use crate::{Error, Result};

/// Firmware version (major.minor.micro), ordered component by component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("{major}.{minor}.{micro}")]
pub struct Version {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Micro version
    pub micro: u8,
}

impl Version {
    /// Create a version
    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Read a version from its three byte encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [major, minor, micro, ..] => Ok(Self::new(*major, *minor, *micro)),
            _ => Err(Error::bad_response(format!(
                "Version needs 3 bytes, got {}",
                bytes.len()
            ))),
        }
    }

    /// Three byte encoding
    pub const fn to_bytes(&self) -> [u8; 3] {
        [self.major, self.minor, self.micro]
    }

    /// Whether this version is `major.minor.micro` or newer
    pub fn is_at_least(&self, major: u8, minor: u8, micro: u8) -> bool {
        *self >= Self::new(major, minor, micro)
    }

    /// Whether this version is older than `major.minor.micro`
    pub fn is_less_than(&self, major: u8, minor: u8, micro: u8) -> bool {
        *self < Self::new(major, minor, micro)
    }

    /// Fail with [`Error::NotSupported`] unless this version is at least `required`
    pub fn require_at_least(&self, required: Self, feature: &str) -> Result<()> {
        if *self >= required {
            Ok(())
        } else {
            Err(Error::NotSupported(format!(
                "{feature} requires version {required}, device has {self}"
            )))
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Extract the first `a.b.c` triple from a string such as
    /// `"YubiKey NEO version 3.4.0"`
    fn from_str(s: &str) -> Result<Self> {
        s.split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .map(|token| token.trim_matches('.'))
            .find_map(parse_triple)
            .ok_or_else(|| Error::invalid_argument(format!("No version number in {s:?}")))
    }
}

fn parse_triple(token: &str) -> Option<Version> {
    let mut parts = token.split('.');
    let mut next = || {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 {
            return None;
        }
        // Components are limited to 0..=127
        part.parse::<u8>().ok().filter(|v| *v <= 0x7F)
    };
    let version = Version::new(next()?, next()?, next()?);
    parts.next().is_none().then_some(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let v = Version::new(4, 2, 6);
        assert!(v.is_at_least(4, 2, 0));
        assert!(v.is_less_than(4, 2, 7));
        assert!(!v.is_at_least(4, 3, 0));
        assert!(Version::new(5, 0, 0) > Version::new(4, 3, 7));
        assert!(Version::new(4, 10, 0) > Version::new(4, 9, 9));
    }

    #[test]
    fn test_display_and_bytes() {
        let v = Version::from_bytes(&[5, 4, 3]).unwrap();
        assert_eq!(v.to_string(), "5.4.3");
        assert_eq!(v.to_bytes(), [5, 4, 3]);
        assert!(Version::from_bytes(&[5, 4]).is_err());
    }

    #[test]
    fn test_parse_from_string() {
        assert_eq!(
            "Firmware version 5.2.1".parse::<Version>().unwrap(),
            Version::new(5, 2, 1)
        );
        assert_eq!(
            "YubiKey NEO 3.4.9.".parse::<Version>().unwrap(),
            Version::new(3, 4, 9)
        );
        assert!("no digits here".parse::<Version>().is_err());
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.300".parse::<Version>().is_err());
    }

    #[test]
    fn test_require_at_least() {
        let v = Version::new(5, 2, 0);
        assert!(v.require_at_least(Version::new(5, 0, 0), "SCP03").is_ok());
        assert!(matches!(
            v.require_at_least(Version::new(5, 7, 2), "SCP11"),
            Err(Error::NotSupported(_))
        ));
    }
}
