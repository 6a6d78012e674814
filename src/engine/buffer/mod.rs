//! Lock-free Single-Producer Single-Consumer (SPSC) sample queue between a
//! decoder thread and the render step.

use std::sync::{Arc, Mutex};
use ringbuf::{
    traits::{Consumer, Producer, Split, Observer},
    HeapRb,
    CachingProd,
    CachingCons,
};

use crate::engine::reader::FrameReader;

/// Producer handle for the queue. Used by the decoder thread.
pub struct AudioBufferProducer {
    inner: CachingProd<Arc<HeapRb<f32>>>,
}

/// Consumer handle for the queue. Registered with the output manager as its
/// frame reader.
pub struct AudioBufferConsumer {
    // Locked only by `read_frames` on the render thread; fill level is read
    // through `rb` so other threads never contend for it.
    inner: Mutex<CachingCons<Arc<HeapRb<f32>>>>,
    rb: Arc<HeapRb<f32>>,
}

impl AudioBufferProducer {
    /// Pushes a single sample into the buffer.
    /// Returns Err if the buffer is full.
    pub fn push(&mut self, sample: f32) -> Result<(), f32> {
        self.inner.try_push(sample)
    }

    /// Pushes a slice of samples into the buffer.
    /// Returns the number of samples successfully pushed.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }

    /// Returns the number of free spaces in the buffer.
    pub fn vacant_len(&self) -> usize {
        self.inner.vacant_len()
    }

    /// Returns the number of samples waiting to be rendered.
    pub fn occupied_len(&self) -> usize {
        self.inner.occupied_len()
    }
}

impl AudioBufferConsumer {
    /// Returns the number of samples available in the buffer. Safe to call
    /// from any thread while the render step is reading.
    pub fn occupied_len(&self) -> usize {
        self.rb.occupied_len()
    }
}

impl FrameReader for AudioBufferConsumer {
    /// Pops whole frames only, so a partially written frame never reaches
    /// the device out of channel order.
    fn read_frames(&self, out: &mut [f32], frames: usize, channels: usize) -> usize {
        if channels == 0 {
            return 0;
        }
        let Ok(mut cons) = self.inner.try_lock() else {
            return 0;
        };
        let ready = frames
            .min(cons.occupied_len() / channels)
            .min(out.len() / channels);
        cons.pop_slice(&mut out[..ready * channels]) / channels
    }
}

/// Creates a new sample queue holding `capacity` samples.
/// Returns a (Producer, Consumer) pair.
pub fn create_audio_buffer(capacity: usize) -> (AudioBufferProducer, AudioBufferConsumer) {
    let rb = Arc::new(HeapRb::<f32>::new(capacity));
    let (prod, cons) = rb.clone().split();
    (
        AudioBufferProducer { inner: prod },
        AudioBufferConsumer {
            inner: Mutex::new(cons),
            rb,
        },
    )
}
