//! Network subsystem: TCP control channel and UDP voice channel

pub mod transport;
pub mod udp;

pub use transport::{NetworkTransport, ServerEndpoint, Transport, TransportEvent, TransportStatsSnapshot};
pub use udp::create_voice_socket;
