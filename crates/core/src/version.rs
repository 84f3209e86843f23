//! Client protocol versions and the wire dialects they speak

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiated client protocol version (`168` = 1.68, `1124` = 1.124)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientVersion(pub u16);

impl ClientVersion {
    pub const V168: Self = Self(168);
    pub const V171: Self = Self(171);
    pub const V172: Self = Self(172);
    pub const V188: Self = Self(188);
    pub const V190: Self = Self(190);
    pub const V199: Self = Self(199);
    pub const V1100: Self = Self(1100);
    pub const V1127: Self = Self(1127);

    pub const MIN: Self = Self::V168;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    /// Whether the server speaks this version at all.
    pub fn is_supported(&self) -> bool {
        (Self::V168.0..=Self::V199.0).contains(&self.0)
            || (Self::V1100.0..=Self::V1127.0).contains(&self.0)
    }

    /// Every supported version, oldest first.
    pub fn supported() -> impl Iterator<Item = ClientVersion> {
        (Self::V168.0..=Self::V199.0)
            .chain(Self::V1100.0..=Self::V1127.0)
            .map(ClientVersion)
    }

    /// Decode the two version bytes a client sends at login (`1`, `68` / `1`, `124`).
    ///
    /// Byte pairs that do not fit a u16 decode to `0`, which is unsupported.
    pub fn from_major_minor(major: u8, minor: u8) -> Self {
        let scale: u32 = if minor >= 100 { 1000 } else { 100 };
        let raw = major as u32 * scale + minor as u32;
        Self(u16::try_from(raw).unwrap_or(0))
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::for_version(*self)
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = if self.0 >= 1000 {
            (self.0 / 1000, self.0 % 1000)
        } else {
            (self.0 / 100, self.0 % 100)
        };
        write!(f, "{}.{}", major, minor)
    }
}

/// Wire layout family of the position-update message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dialect {
    /// Zone id in one byte followed by a pad byte
    V168,
    /// Zone id as a big-endian u16
    V172,
    /// 172 layout plus mana/endurance/class trailer
    V190,
}

impl Dialect {
    pub fn for_version(version: ClientVersion) -> Self {
        if version >= ClientVersion::V190 {
            Self::V190
        } else if version >= ClientVersion::V172 {
            Self::V172
        } else {
            Self::V168
        }
    }

    /// Inbound frames only come in two layouts; 190 clients send 172 frames.
    pub fn inbound(self) -> Self {
        match self {
            Self::V190 => Self::V172,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V168 => "168",
            Self::V172 => "172",
            Self::V190 => "190",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_boundaries() {
        assert_eq!(ClientVersion::V168.dialect(), Dialect::V168);
        assert_eq!(ClientVersion::V171.dialect(), Dialect::V168);
        assert_eq!(ClientVersion::V172.dialect(), Dialect::V172);
        assert_eq!(ClientVersion::new(189).dialect(), Dialect::V172);
        assert_eq!(ClientVersion::V190.dialect(), Dialect::V190);
        assert_eq!(ClientVersion::new(1124).dialect(), Dialect::V190);
        assert_eq!(Dialect::V190.inbound(), Dialect::V172);
    }

    #[test]
    fn test_major_minor() {
        assert_eq!(ClientVersion::from_major_minor(1, 68), ClientVersion::V168);
        assert_eq!(ClientVersion::from_major_minor(1, 124), ClientVersion::new(1124));
        assert_eq!(ClientVersion::new(1124).to_string(), "1.124");
        assert_eq!(ClientVersion::V172.to_string(), "1.72");
    }

    #[test]
    fn test_out_of_range_bytes() {
        let huge = ClientVersion::from_major_minor(255, 200);
        assert_eq!(huge, ClientVersion::new(0));
        assert!(!huge.is_supported());
        assert_eq!(ClientVersion::from_major_minor(65, 200), ClientVersion::new(65200));

        let tiny = ClientVersion::from_major_minor(0, 5);
        assert!(!tiny.is_supported());
        assert_eq!(tiny.to_string(), "0.5");
        assert_eq!(ClientVersion::new(0).to_string(), "0.0");
        assert_eq!(ClientVersion::new(u16::MAX).to_string(), "65.535");
    }

    #[test]
    fn test_supported_range() {
        assert!(ClientVersion::V168.is_supported());
        assert!(!ClientVersion::new(167).is_supported());
        assert!(!ClientVersion::new(200).is_supported());
        assert!(ClientVersion::new(1110).is_supported());
        let all: Vec<_> = ClientVersion::supported().collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all.first(), Some(&ClientVersion::V168));
    }
}
