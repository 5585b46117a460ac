//! # ymsg-core
//!
//! Shared library for the YMSG client containing the packet model, the
//! binary codec, fragment reassembly, and the login challenge-response.
//!
//! It has zero dependencies on sockets or an async runtime.  The session
//! engine in `ymsg-client` drives it.
//!
//! # Architecture overview (for beginners)
//!
//! YMSG is a binary instant-messaging protocol.  Every message on the wire is
//! a *packet*: a fixed 20-byte header followed by a body of key/value text
//! fields.  This crate defines:
//!
//! - **`protocol`** – How bytes travel over the network.  [`Packet`] is the
//!   typed form, [`encode_packet`] / [`decode_packet`] convert to and from
//!   bytes, and [`FragmentBuffer`] stitches together responses the server
//!   split across several packets.
//!
//! - **`auth`** – The two challenge-response algorithms used during login.
//!   The server picks one; [`AuthVersion::from_flag`] reads its choice and
//!   [`compute_response`] produces the two response strings.

pub mod auth;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `ymsg_core::Packet` instead of `ymsg_core::protocol::packet::Packet`.
pub use auth::{compute_response, AuthError, AuthVersion, ChallengeResponse};
pub use protocol::codec::{body_length, declared_body_length, decode_packet, encode_packet, ProtocolError};
pub use protocol::fragment::FragmentBuffer;
pub use protocol::messages::{status, ServiceType};
pub use protocol::packet::{merge, MergePolicy, MergeRule, Packet, PacketBody};
