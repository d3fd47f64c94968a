//! Lock-free playback queue for encoded frames
//!
//! Written by the network side, drained by the playback callback. Neither side
//! ever blocks: a full queue drops the incoming frame, an empty queue yields
//! silence.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded queue of encoded audio frames
pub struct PlaybackQueue {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl PlaybackQueue {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame. Returns false and drops the frame if the queue is full.
    pub fn push(&self, frame: Bytes) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame, counting an underrun when empty
    pub fn pop(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop everything still queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a playback queue
pub type SharedPlaybackQueue = Arc<PlaybackQueue>;

pub fn create_playback_queue(capacity: usize) -> SharedPlaybackQueue {
    Arc::new(PlaybackQueue::new(capacity))
}
