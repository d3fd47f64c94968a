//! Notifications emitted by the session

use crate::protocol::{ControlMessage, VoicePacket};
use crate::session::state::ConnectionState;

/// Broadcast channel depth; slow subscribers lag instead of blocking emitters
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Every inbound control message, before type-specific handling
    MessageReceived(ControlMessage),
    /// An authorized voice packet was queued for playback
    VoiceReceived(VoicePacket),
    /// A voice packet left for the server
    VoiceSent,
    /// Active transmit frequency changed (0 = none)
    FrequencyChanged(u32),
    Error(String),
}
