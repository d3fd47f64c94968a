//! Opus codec wrapper
//!
//! Mono voice encoding and decoding at the fixed codec rate.

pub mod decoder;
pub mod encoder;

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;
