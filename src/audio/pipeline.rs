//! Audio pipeline: owns the capture and playback streams
//!
//! Both directions are independently clocked and independently restartable.
//! Device changes only affect their own direction.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{create_playback_queue, SharedPlaybackQueue};
use crate::audio::capture::{build_capture_stream, CaptureProcessor, EncodedSink, SharedSink};
use crate::audio::device::{get_device, Direction};
use crate::audio::playback::{build_playback_stream, PlaybackProcessor};
use crate::audio::resample::frame_size_for_rate;
use crate::audio::stream::StreamWorker;
use crate::constants::{CODEC_FRAME_SIZE, CODEC_SAMPLE_RATE, DEFAULT_DEVICE_SAMPLE_RATE};
use crate::error::AudioError;

/// Audio capture/playback as seen by the session
pub trait AudioEngine: Send + Sync {
    fn start_capture(&self) -> Result<(), AudioError>;
    fn stop_capture(&self);
    fn start_playback(&self) -> Result<(), AudioError>;
    fn stop_playback(&self);
    /// Queue an encoded frame for playback without blocking
    fn enqueue_for_playback(&self, frame: Bytes);
    fn set_ptt(&self, active: bool);
    /// Register (or clear) the receiver of encoded capture frames
    fn set_encoded_sink(&self, sink: Option<EncodedSink>);
}

/// Pipeline counters, updated from the audio callbacks
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_encoded: AtomicU64,
    frames_played: AtomicU64,
    decode_failures: AtomicU64,
}

impl PipelineStats {
    pub fn record_encoded(&self) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_played(&self) {
        self.frames_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            queue_overflows: 0,
            queue_underruns: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineStatsSnapshot {
    pub frames_encoded: u64,
    pub frames_played: u64,
    pub decode_failures: u64,
    pub queue_overflows: u64,
    pub queue_underruns: u64,
}

/// Device selection and running stream for one direction
struct DirectionState {
    device: Option<usize>,
    sample_rate: u32,
    frame_size: usize,
    worker: Option<StreamWorker>,
}

impl DirectionState {
    fn new(device: Option<usize>) -> Self {
        Self {
            device,
            sample_rate: DEFAULT_DEVICE_SAMPLE_RATE,
            frame_size: frame_size_for_rate(CODEC_FRAME_SIZE, DEFAULT_DEVICE_SAMPLE_RATE, CODEC_SAMPLE_RATE),
            worker: None,
        }
    }

    fn set_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.frame_size = frame_size_for_rate(CODEC_FRAME_SIZE, sample_rate, CODEC_SAMPLE_RATE);
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().map(|w| w.is_running()).unwrap_or(false)
    }
}

/// cpal-backed audio pipeline
pub struct AudioPipeline {
    input: Mutex<DirectionState>,
    output: Mutex<DirectionState>,
    ptt: Arc<AtomicBool>,
    sink: SharedSink,
    queue: SharedPlaybackQueue,
    stats: Arc<PipelineStats>,
}

impl AudioPipeline {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            input: Mutex::new(DirectionState::new(None)),
            output: Mutex::new(DirectionState::new(None)),
            ptt: Arc::new(AtomicBool::new(false)),
            sink: Arc::new(RwLock::new(None)),
            queue: create_playback_queue(queue_capacity),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Select the input device (`None` = host default), restarting capture if
    /// it is running
    pub fn set_input_device(&self, index: Option<usize>) -> Result<(), AudioError> {
        let device = get_device(Direction::Input, index)?;
        let mut input = self.input.lock();
        input.device = index;
        input.set_rate(device.sample_rate());
        tracing::info!(
            device = %device.name,
            sample_rate = input.sample_rate,
            frame_size = input.frame_size,
            "Input device changed"
        );

        if input.is_running() {
            Self::stop_direction(&mut input);
            drop(input);
            self.start_capture()?;
        }
        Ok(())
    }

    /// Select the output device (`None` = host default), restarting playback
    /// if it is running
    pub fn set_output_device(&self, index: Option<usize>) -> Result<(), AudioError> {
        let device = get_device(Direction::Output, index)?;
        let mut output = self.output.lock();
        output.device = index;
        output.set_rate(device.sample_rate());
        tracing::info!(
            device = %device.name,
            sample_rate = output.sample_rate,
            frame_size = output.frame_size,
            "Output device changed"
        );

        if output.is_running() {
            Self::stop_direction(&mut output);
            drop(output);
            self.start_playback()?;
        }
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.input.lock().is_running()
    }

    pub fn is_playing(&self) -> bool {
        self.output.lock().is_running()
    }

    pub fn ptt_active(&self) -> bool {
        self.ptt.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &SharedPlaybackQueue {
        &self.queue
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.queue_overflows = self.queue.overflow_count() as u64;
        snapshot.queue_underruns = self.queue.underrun_count() as u64;
        snapshot
    }

    fn stop_direction(state: &mut DirectionState) {
        if let Some(mut worker) = state.worker.take() {
            if let Some(err) = worker.check_errors() {
                tracing::warn!("Stream reported error before stop: {}", err);
            }
            worker.stop();
        }
    }
}

impl AudioEngine for AudioPipeline {
    fn start_capture(&self) -> Result<(), AudioError> {
        let mut input = self.input.lock();
        if input.is_running() {
            return Ok(());
        }

        let device = get_device(Direction::Input, input.device)?;
        input.set_rate(device.sample_rate());
        let sample_rate = input.sample_rate;
        let frame_size = input.frame_size;
        let channels = device.channels();
        let sample_format = device.config.sample_format();
        let ptt = self.ptt.clone();
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        let cpal_device = device.into_inner();

        let worker = StreamWorker::spawn("capture", move |error_tx| {
            build_capture_stream(
                &cpal_device,
                sample_format,
                channels,
                sample_rate,
                frame_size,
                || CaptureProcessor::new(sample_rate, channels, ptt.clone(), sink.clone(), stats.clone()),
                error_tx,
            )
        })
        .map_err(|e| {
            tracing::error!("Failed to start recording: {}", e);
            e
        })?;

        input.worker = Some(worker);
        tracing::info!(sample_rate, frame_size, "Started audio recording");
        Ok(())
    }

    fn stop_capture(&self) {
        let mut input = self.input.lock();
        if input.worker.is_some() {
            Self::stop_direction(&mut input);
            tracing::info!("Stopped audio recording");
        }
    }

    fn start_playback(&self) -> Result<(), AudioError> {
        let mut output = self.output.lock();
        if output.is_running() {
            return Ok(());
        }

        let device = get_device(Direction::Output, output.device)?;
        output.set_rate(device.sample_rate());
        let sample_rate = output.sample_rate;
        let frame_size = output.frame_size;
        let channels = device.channels();
        let sample_format = device.config.sample_format();
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        let cpal_device = device.into_inner();

        let worker = StreamWorker::spawn("playback", move |error_tx| {
            build_playback_stream(
                &cpal_device,
                sample_format,
                channels,
                sample_rate,
                frame_size,
                || PlaybackProcessor::new(sample_rate, queue.clone(), stats.clone()),
                error_tx,
            )
        })
        .map_err(|e| {
            tracing::error!("Failed to start playback: {}", e);
            e
        })?;

        output.worker = Some(worker);
        tracing::info!(sample_rate, frame_size, "Started audio playback");
        Ok(())
    }

    fn stop_playback(&self) {
        let mut output = self.output.lock();
        if output.worker.is_some() {
            Self::stop_direction(&mut output);
            self.queue.clear();
            tracing::info!("Stopped audio playback");
        }
    }

    fn enqueue_for_playback(&self, frame: Bytes) {
        if !self.queue.push(frame) {
            tracing::warn!("Output queue full, dropping audio packet");
        }
    }

    fn set_ptt(&self, active: bool) {
        self.ptt.store(active, Ordering::Relaxed);
        tracing::debug!("PTT state: {}", active);
    }

    fn set_encoded_sink(&self, sink: Option<EncodedSink>) {
        *self.sink.write() = sink;
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop_capture();
        self.stop_playback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_never_blocks_and_respects_capacity() {
        let pipeline = AudioPipeline::new(8);

        for i in 0..100u32 {
            pipeline.enqueue_for_playback(Bytes::copy_from_slice(&i.to_le_bytes()));
        }

        assert_eq!(pipeline.queue().len(), 8);
        let stats = pipeline.stats();
        assert_eq!(stats.queue_overflows, 92);
    }

    #[test]
    fn test_ptt_gate() {
        let pipeline = AudioPipeline::new(8);
        assert!(!pipeline.ptt_active());
        pipeline.set_ptt(true);
        assert!(pipeline.ptt_active());
        pipeline.set_ptt(false);
        assert!(!pipeline.ptt_active());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let pipeline = AudioPipeline::new(8);
        pipeline.stop_capture();
        pipeline.stop_playback();
        assert!(!pipeline.is_capturing());
        assert!(!pipeline.is_playing());
    }

    #[test]
    fn test_direction_frame_size_follows_rate() {
        let mut state = DirectionState::new(None);
        state.set_rate(16000);
        assert_eq!(state.frame_size, 160);
        state.set_rate(96000);
        assert_eq!(state.frame_size, 960);
    }
}
