//! # ATC Voice Client
//!
//! Real-time radio voice client for simulated aviation communication.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        UI / front end (external)                         │
//! │  connect · switch frequency · PTT · receive flags · text messages        │
//! └──────────────┬──────────────────────────────────────────▲────────────────┘
//!                │ operations                                │ SessionEvent
//!                ▼                                           │ (broadcast)
//! ┌──────────────────────────────────────────────────────────┴───────────────┐
//! │                   Session Controller (session::controller)               │
//! │   Disconnected → Connecting → Connected → Ready   · heartbeat (15s)      │
//! │   active frequency/transmitter · receive-authorization table             │
//! └───────┬─────────────────────────▲───────────────────┬─────────▲──────────┘
//!         │ send control / voice    │ TransportEvent    │ enqueue │ encoded
//!         ▼                         │ (mpsc)            ▼         │ frames
//! ┌─────────────────────────────────┴─────┐  ┌─────────────────────┴─────────┐
//! │  Network Transport (network)          │  │  Audio Pipeline (audio)       │
//! │  ┌───────────────┐ ┌───────────────┐  │  │  ┌──────────┐  ┌───────────┐  │
//! │  │ TCP control   │ │ UDP voice     │  │  │  │ Capture  │  │ Playback  │  │
//! │  │ JSON lines    │ │ voice packets │  │  │  │ resample │  │ queue     │  │
//! │  │ recv loop     │ │ recv loop     │  │  │  │ → Opus   │  │ Opus →    │  │
//! │  └───────────────┘ └───────────────┘  │  │  │ encode   │  │ resample  │  │
//! └───────────────────────────────────────┘  │  └──────────┘  └───────────┘  │
//!                                            └───────────────────────────────┘
//! ```
//!
//! Four contexts run concurrently during a session: the control receive loop,
//! the voice receive loop, the capture callback and the playback callback.
//! They hand off only through the bounded playback queue and fire-and-forget
//! event channels.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Fixed codec sample rate; all encoding and decoding happens here
    pub const CODEC_SAMPLE_RATE: u32 = 48000;

    /// Codec frame duration in milliseconds
    pub const FRAME_TIME_MS: u32 = 10;

    /// Samples per codec frame at the codec rate
    pub const CODEC_FRAME_SIZE: usize = (CODEC_SAMPLE_RATE / (1000 / FRAME_TIME_MS)) as usize;

    /// Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 24_000;

    /// Fallback device rate when a device does not report one
    pub const DEFAULT_DEVICE_SAMPLE_RATE: u32 = 44100;

    /// Default control channel (TCP) port
    pub const DEFAULT_TCP_PORT: u16 = 6808;

    /// Default voice channel (UDP) port
    pub const DEFAULT_UDP_PORT: u16 = 6807;

    /// Largest datagram the voice channel will receive
    pub const MAX_DATAGRAM_SIZE: usize = 65507;

    /// Heartbeat period in seconds
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

    /// Playback queue capacity (in encoded frames)
    pub const PLAYBACK_QUEUE_CAPACITY: usize = 64;

    /// Well-known UNICOM frequency
    pub const UNICOM_FREQUENCY: u32 = 122_800;

    /// Well-known emergency frequency
    pub const EMERGENCY_FREQUENCY: u32 = 121_500;
}
