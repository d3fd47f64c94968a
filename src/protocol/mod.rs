//! Wire protocol: control channel messages and the binary voice packet

pub mod message;
pub mod packet;

pub use message::{ControlMessage, MessageType};
pub use packet::{parse_packet, serialize_packet, VoicePacket};
