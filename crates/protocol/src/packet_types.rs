//! Opcode tables
//!
//! Client opcodes are declared by their logical value XORed with the protocol
//! family key. The wire carries the XORed byte, so changing [`FAMILY_KEY`]
//! moves every client opcode at once. Server opcodes are sent as-is.

use serde::{Deserialize, Serialize};

/// Protocol family constant mixed into every client opcode
pub const FAMILY_KEY: u8 = 168;

/// Messages sent by the client (logical values, before XOR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClientOpcode {
    PositionUpdate = 0x01,
    PingRequest = 0x0B,
    LoginRequest = 0x0F,
    UseAbility = 0x13,
    AbilityListRequest = 0x2A,
    QuitRequest = 0x3B,
    WorldInitRequest = 0x7C,
}

impl ClientOpcode {
    pub const ALL: [ClientOpcode; 7] = [
        Self::PositionUpdate,
        Self::PingRequest,
        Self::LoginRequest,
        Self::UseAbility,
        Self::AbilityListRequest,
        Self::QuitRequest,
        Self::WorldInitRequest,
    ];

    #[inline]
    pub fn logical(self) -> u8 {
        self as u8
    }

    /// The byte as it appears on the wire and in the registry
    #[inline]
    pub fn wire(self) -> u8 {
        self as u8 ^ FAMILY_KEY
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        Self::from_logical(code ^ FAMILY_KEY)
    }

    pub fn from_logical(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.logical() == code)
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServerOpcode {
    PositionAndObjectId = 0x20,
    PingReply = 0x29,
    LoginGranted = 0x2A,
    LoginDenied = 0x2C,
    AbilityList = 0x16,
    Quit = 0xA4,
    PlayerPosition = 0xA9,
    Message = 0xAF,
    CombatAnimation = 0xBC,
    ObjectDelete = 0xE1,
}

impl ServerOpcode {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Reasons a login can be refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoginDenial {
    WrongPassword = 0x01,
    AccountInvalid = 0x02,
    AccountAlreadyLoggedIn = 0x0B,
    TooManyPlayersLoggedIn = 0x0C,
    AccountIsInLogoutProcedure = 0x11,
    ServiceNotAvailable = 0xAA,
}

impl LoginDenial {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WrongPassword => "wrong password",
            Self::AccountInvalid => "account invalid",
            Self::AccountAlreadyLoggedIn => "account already logged in",
            Self::TooManyPlayersLoggedIn => "too many players logged in",
            Self::AccountIsInLogoutProcedure => "account is in logout procedure",
            Self::ServiceNotAvailable => "service not available",
        }
    }
}

/// Chat channel of a server message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChatType {
    System = 0x00,
    Damaged = 0x03,
    ScreenCenterSmaller = 0x1E,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_update_wire_byte() {
        assert_eq!(ClientOpcode::PositionUpdate.wire(), 0xA9);
        assert_eq!(ClientOpcode::from_wire(0xA9), Some(ClientOpcode::PositionUpdate));
        assert_eq!(ClientOpcode::from_wire(0x01), None);
    }

    #[test]
    fn test_wire_bytes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for op in ClientOpcode::ALL {
            assert!(seen.insert(op.wire()));
            assert_eq!(ClientOpcode::from_wire(op.wire()), Some(op));
        }
    }

    #[test]
    fn test_denial_codes() {
        assert_eq!(LoginDenial::AccountAlreadyLoggedIn.code(), 0x0B);
        assert_eq!(LoginDenial::AccountIsInLogoutProcedure.code(), 0x11);
    }
}
