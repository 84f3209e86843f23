//! Core error types for realmd

#[derive(thiserror::Error, Debug)]
pub enum RealmError {
    /// Malformed or truncated packet. The packet is dropped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Opcode arrived while the session was in a state that cannot accept it.
    #[error("State violation: {0}")]
    StateViolation(String),

    /// A position resolved to no zone or sub-zone.
    #[error("Spatial inconsistency: {0}")]
    SpatialInconsistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Two handlers declared for the same (version, opcode).
    #[error("Duplicate handler for version {version} opcode 0x{opcode:02X}")]
    DuplicateHandler { version: u16, opcode: u8 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl RealmError {
    /// Whether the error should only drop the offending packet
    /// rather than the whole connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::StateViolation(_) | Self::NotFound(_) | Self::InvalidData(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RealmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classes() {
        assert!(RealmError::Protocol("short".into()).is_recoverable());
        assert!(RealmError::StateViolation("login twice".into()).is_recoverable());
        assert!(!RealmError::Network("reset".into()).is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(!RealmError::from(io).is_recoverable());
    }

    #[test]
    fn test_duplicate_handler_message() {
        let err = RealmError::DuplicateHandler { version: 168, opcode: 0xA9 };
        assert_eq!(err.to_string(), "Duplicate handler for version 168 opcode 0xA9");
    }
}
