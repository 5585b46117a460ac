//! Protocol module containing the packet model, service catalogue, binary
//! codec, and fragment reassembly.

pub mod codec;
pub mod fragment;
pub mod messages;
pub mod packet;

pub use codec::{body_length, declared_body_length, decode_packet, encode_packet, ProtocolError};
pub use fragment::FragmentBuffer;
pub use messages::*;
pub use packet::{merge, MergePolicy, MergeRule, Packet, PacketBody};
