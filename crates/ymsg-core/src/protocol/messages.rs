//! Service types, status codes, and wire constants of the YMSG protocol.
//!
//! A YMSG packet carries two classifiers in its header:
//!
//! - the **service type** – which operation the packet belongs to (login,
//!   message, roster list, conference invite, ...), and
//! - the **status** – a secondary 32-bit code whose meaning depends on the
//!   service type (an acknowledgement, a presence value, or a marker saying
//!   "more fragments follow").
//!
//! Only the engine-relevant part of the catalogue is named here.  Servers
//! routinely send informational or legacy service types that a client does
//! not act on, so an unrecognised code is preserved as
//! [`ServiceType::Unknown`] instead of failing the decode.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Magic token opening every frame.
pub const MAGIC: [u8; 4] = *b"YMSG";

/// Protocol version written into outbound headers.
pub const PROTOCOL_VERSION: u16 = 0x000C;

/// Total size of the frame header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Separator terminating every key and every value in a packet body.
///
/// `0xC0` never occurs in well-formed UTF-8, so the separator cannot collide
/// with field content.
pub const FIELD_SEPARATOR: [u8; 2] = [0xC0, 0x80];

/// Largest body that fits the two-byte length field.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

// ── Service types ─────────────────────────────────────────────────────────────

/// Operation tag carried in the two-byte service field of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Logon,
    Logoff,
    IsAway,
    IsBack,
    Message,
    UserStat,
    NewMail,
    ContactNew,
    Ping,
    GotGroupRename,
    ConfInvite,
    ConfLogon,
    ConfDecline,
    ConfLogoff,
    ConfAddInvite,
    ConfMsg,
    FileTransfer,
    Notify,
    AuthResp,
    List,
    Auth,
    FriendAdd,
    FriendRemove,
    ContactReject,
    KeepAlive,
    ChatJoin,
    StatusUpdate,
    /// A code this client has no name for.  Kept verbatim so it re-encodes
    /// identically and can still be routed by the dispatch registry.
    Unknown(u16),
}

impl ServiceType {
    /// Returns the on-the-wire code.
    pub fn code(self) -> u16 {
        match self {
            ServiceType::Logon => 0x01,
            ServiceType::Logoff => 0x02,
            ServiceType::IsAway => 0x03,
            ServiceType::IsBack => 0x04,
            ServiceType::Message => 0x06,
            ServiceType::UserStat => 0x0A,
            ServiceType::NewMail => 0x0B,
            ServiceType::ContactNew => 0x0F,
            ServiceType::Ping => 0x12,
            ServiceType::GotGroupRename => 0x13,
            ServiceType::ConfInvite => 0x18,
            ServiceType::ConfLogon => 0x19,
            ServiceType::ConfDecline => 0x1A,
            ServiceType::ConfLogoff => 0x1B,
            ServiceType::ConfAddInvite => 0x1C,
            ServiceType::ConfMsg => 0x1D,
            ServiceType::FileTransfer => 0x46,
            ServiceType::Notify => 0x4B,
            ServiceType::AuthResp => 0x54,
            ServiceType::List => 0x55,
            ServiceType::Auth => 0x57,
            ServiceType::FriendAdd => 0x83,
            ServiceType::FriendRemove => 0x84,
            ServiceType::ContactReject => 0x86,
            ServiceType::KeepAlive => 0x8A,
            ServiceType::ChatJoin => 0x98,
            ServiceType::StatusUpdate => 0xC6,
            ServiceType::Unknown(code) => code,
        }
    }
}

impl From<u16> for ServiceType {
    fn from(code: u16) -> Self {
        match code {
            0x01 => ServiceType::Logon,
            0x02 => ServiceType::Logoff,
            0x03 => ServiceType::IsAway,
            0x04 => ServiceType::IsBack,
            0x06 => ServiceType::Message,
            0x0A => ServiceType::UserStat,
            0x0B => ServiceType::NewMail,
            0x0F => ServiceType::ContactNew,
            0x12 => ServiceType::Ping,
            0x13 => ServiceType::GotGroupRename,
            0x18 => ServiceType::ConfInvite,
            0x19 => ServiceType::ConfLogon,
            0x1A => ServiceType::ConfDecline,
            0x1B => ServiceType::ConfLogoff,
            0x1C => ServiceType::ConfAddInvite,
            0x1D => ServiceType::ConfMsg,
            0x46 => ServiceType::FileTransfer,
            0x4B => ServiceType::Notify,
            0x54 => ServiceType::AuthResp,
            0x55 => ServiceType::List,
            0x57 => ServiceType::Auth,
            0x83 => ServiceType::FriendAdd,
            0x84 => ServiceType::FriendRemove,
            0x86 => ServiceType::ContactReject,
            0x8A => ServiceType::KeepAlive,
            0x98 => ServiceType::ChatJoin,
            0xC6 => ServiceType::StatusUpdate,
            other => ServiceType::Unknown(other),
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Unknown(code) => write!(f, "Unknown(0x{code:02X})"),
            named => write!(f, "{named:?}(0x{:02X})", named.code()),
        }
    }
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// Well-known values of the header status field.
///
/// The field is kept as a raw `u32` on [`crate::Packet`] because its meaning
/// is service-type-dependent; these constants name the values the engine
/// itself interprets.
pub mod status {
    /// Default status for client-originated packets; also "online".
    pub const AVAILABLE: u32 = 0;
    /// Server acknowledgement.
    pub const SERVER_ACK: u32 = 1;
    /// Marks a packet as one fragment of a larger logical response.
    pub const FRAGMENT_IN_PROGRESS: u32 = 5;
    /// Typing notification carried on NOTIFY.
    pub const TYPING: u32 = 0x16;
    /// Offline message delivered at login.
    pub const OFFLINE: u32 = 0x5A55_AA56;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_code_round_trips_for_named_types() {
        let named = [
            ServiceType::Logon,
            ServiceType::Logoff,
            ServiceType::Message,
            ServiceType::Ping,
            ServiceType::ConfInvite,
            ServiceType::ConfLogon,
            ServiceType::AuthResp,
            ServiceType::List,
            ServiceType::Auth,
            ServiceType::KeepAlive,
            ServiceType::StatusUpdate,
        ];
        for service in named {
            assert_eq!(ServiceType::from(service.code()), service);
        }
    }

    #[test]
    fn test_unknown_service_code_is_preserved() {
        // Arrange / Act
        let service = ServiceType::from(0x4242);

        // Assert
        assert_eq!(service, ServiceType::Unknown(0x4242));
        assert_eq!(service.code(), 0x4242);
    }

    #[test]
    fn test_display_includes_hex_code() {
        assert_eq!(ServiceType::Auth.to_string(), "Auth(0x57)");
        assert_eq!(ServiceType::Unknown(0xEE).to_string(), "Unknown(0xEE)");
    }

    #[test]
    fn test_separator_is_not_valid_utf8() {
        assert!(std::str::from_utf8(&FIELD_SEPARATOR).is_err());
    }
}
