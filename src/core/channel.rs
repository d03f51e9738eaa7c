//! Single-slot frame handoff between exactly one producer and one consumer.
//!
//! The slot is guarded by two counting semaphores: `ready` (initially 0)
//! counts frames waiting to be read, `capacity` (initially 1) counts free
//! slots. `send` takes capacity, fills the slot, then releases ready;
//! `receive` takes ready, drains the slot, then releases capacity. A sender
//! blocks while the slot is full and a receiver blocks while it is empty.
//! Nothing is dropped and nothing times out.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::frame::Frame;
use crate::error::{PipelineError, Result};

struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }
}

struct Slot {
    data: Mutex<Frame>,
    ready: Semaphore,
    capacity: Semaphore,
}

/// Producing half. Not `Clone`: a channel has exactly one writer.
pub struct FrameSender {
    slot: Arc<Slot>,
}

/// Consuming half. Not `Clone`: a channel has exactly one reader.
pub struct FrameReceiver {
    slot: Arc<Slot>,
}

/// Create a channel whose slot holds frames of exactly `frame_len` bytes.
pub fn channel(name: &'static str, frame_len: usize) -> Result<(FrameSender, FrameReceiver)> {
    let slot = Arc::new(Slot {
        data: Mutex::new(Frame::alloc(name, frame_len).map_err(|e| PipelineError::SyncInit {
            what: name,
            reason: e.to_string(),
        })?),
        ready: Semaphore::new(0),
        capacity: Semaphore::new(1),
    });
    Ok((
        FrameSender {
            slot: Arc::clone(&slot),
        },
        FrameReceiver { slot },
    ))
}

impl FrameSender {
    /// Block until the previous frame has been received, then publish a
    /// copy of `frame`.
    ///
    /// # Panics
    ///
    /// If `frame` is not the size this channel was created for.
    pub fn send(&self, frame: &Frame) {
        self.slot.capacity.acquire();
        self.slot
            .data
            .lock()
            .as_mut_slice()
            .copy_from_slice(frame.as_slice());
        self.slot.ready.release();
    }
}

impl FrameReceiver {
    /// Block until a frame is published, then copy it into `frame` and free
    /// the slot.
    ///
    /// # Panics
    ///
    /// If `frame` is not the size this channel was created for.
    pub fn receive(&self, frame: &mut Frame) {
        self.slot.ready.acquire();
        frame
            .as_mut_slice()
            .copy_from_slice(self.slot.data.lock().as_slice());
        self.slot.capacity.release();
    }
}
