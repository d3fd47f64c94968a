//! Dedicated thread owning one cpal stream
//!
//! cpal streams are not `Send` on every host, so the stream is built, played
//! and dropped on its own thread. Stopping joins that thread, which guarantees
//! the hardware callback has stopped firing by the time `stop` returns.

use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::StreamTrait;

use crate::error::AudioError;

pub struct StreamWorker {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    /// Channel for stream errors
    error_rx: Receiver<AudioError>,
}

impl StreamWorker {
    /// Spawn the stream thread and wait until the stream is playing.
    ///
    /// `build` receives a sender for asynchronous stream errors.
    pub fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce(crossbeam_channel::Sender<AudioError>) -> Result<cpal::Stream, AudioError>
            + Send
            + 'static,
    {
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name(format!("audio-{}", name))
            .spawn(move || {
                let stream = match build(error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping the callback
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let startup = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("stream thread exited".to_string())));

        if let Err(e) = startup {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        Ok(Self {
            running,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Stop the stream and wait for its thread to finish
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check for errors reported by the stream
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
