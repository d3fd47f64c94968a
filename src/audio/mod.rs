//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod pipeline;
pub mod playback;
pub mod resample;
pub mod stream;

pub use buffer::PlaybackQueue;
pub use capture::EncodedSink;
pub use device::{find_device_index, list_devices, AudioDeviceInfo, Direction};
pub use pipeline::{AudioEngine, AudioPipeline};
