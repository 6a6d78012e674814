//! Frame supplier contract and its hand-off to the render thread.
//!
//! The control thread owns a [`ReaderPublisher`]; the render step owns the
//! matching [`ReaderSlot`]. New readers travel over a channel the render step
//! drains without blocking, and replaced readers travel back so they are
//! dropped on the control thread. Both channels are bounded, so their slots
//! are allocated up front and the render step never frees channel memory.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

/// Supplies interleaved `f32` frames to the render step.
///
/// Called on the device's real-time thread. Implementations fill up to
/// `frames * channels` samples of `out` and return how many whole frames they
/// wrote; anything short of `frames` is padded with silence. They must not
/// block for long and must not call back into the output manager.
pub trait FrameReader: Send + Sync {
    fn read_frames(&self, out: &mut [f32], frames: usize, channels: usize) -> usize;
}

impl<F> FrameReader for F
where
    F: Fn(&mut [f32], usize, usize) -> usize + Send + Sync,
{
    fn read_frames(&self, out: &mut [f32], frames: usize, channels: usize) -> usize {
        self(out, frames, channels)
    }
}

pub type SharedFrameReader = Arc<dyn FrameReader>;

/// Replaced readers queued for the control thread; any beyond this are
/// dropped on the render thread.
const RETIRED_CAPACITY: usize = 8;

/// Updates that can wait for the render step. When full, the publisher drops
/// the oldest pending ones itself, since only the newest is ever applied.
const UPDATE_CAPACITY: usize = 4;

/// Control-thread end of the reader hand-off.
pub struct ReaderPublisher {
    updates: Sender<Option<SharedFrameReader>>,
    // Same queue the slot drains; used to discard superseded updates.
    pending: Receiver<Option<SharedFrameReader>>,
    retired: Receiver<SharedFrameReader>,
}

/// Render-thread end of the reader hand-off.
pub struct ReaderSlot {
    current: Option<SharedFrameReader>,
    updates: Receiver<Option<SharedFrameReader>>,
    retired: Sender<SharedFrameReader>,
}

pub fn reader_channel(initial: Option<SharedFrameReader>) -> (ReaderPublisher, ReaderSlot) {
    let (update_tx, update_rx) = bounded(UPDATE_CAPACITY);
    let (retired_tx, retired_rx) = bounded(RETIRED_CAPACITY);
    (
        ReaderPublisher {
            updates: update_tx,
            pending: update_rx.clone(),
            retired: retired_rx,
        },
        ReaderSlot {
            current: initial,
            updates: update_rx,
            retired: retired_tx,
        },
    )
}

impl ReaderPublisher {
    /// Queues `reader` for the render step without blocking. Fails once the
    /// render side is gone.
    pub fn publish(&self, reader: Option<SharedFrameReader>) -> Result<(), String> {
        self.collect_retired();
        if let Err(TryRecvError::Disconnected) = self.retired.try_recv() {
            return Err("render side disconnected".to_string());
        }
        let mut reader = reader;
        loop {
            match self.updates.try_send(reader) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    // The render step is not pulling; supersede the oldest.
                    let _ = self.pending.try_recv();
                    reader = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err("render side disconnected".to_string())
                }
            }
        }
    }

    /// Drops readers the render step has let go of. Returns how many.
    pub fn collect_retired(&self) -> usize {
        self.retired.try_iter().count()
    }

    /// Drains the retired queue and checks that the render side has been
    /// released along with the device.
    pub fn shutdown(self) -> Result<(), String> {
        loop {
            match self.retired.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => {
                    return Err("render side still holds the reader".to_string())
                }
            }
        }
    }
}

impl ReaderSlot {
    /// Applies pending updates. Wait-free.
    pub fn refresh(&mut self) {
        while let Ok(next) = self.updates.try_recv() {
            if let Some(old) = std::mem::replace(&mut self.current, next) {
                let _ = self.retired.try_send(old);
            }
        }
    }

    pub fn current(&self) -> Option<&dyn FrameReader> {
        self.current.as_deref()
    }
}
