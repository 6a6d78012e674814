//! Audio output manager.
//!
//! Owns an output device, pulls interleaved `f32` frames from a caller-supplied
//! [`FrameReader`] on the device's real-time thread, and applies volume and
//! mute on the way out.

pub mod engine;

pub use engine::buffer::{create_audio_buffer, AudioBufferConsumer, AudioBufferProducer};
pub use engine::clock::{Clock, DeviceSampleFormat, PlaybackState, StreamFormat};
pub use engine::config::{OutputConfig, OutputSettings};
pub use engine::error::{OutputError, Resource, Result, TeardownErrors};
pub use engine::output::output_manager::OutputManager;
pub use engine::output::{AudioOutput, OutputBackend, StreamRequest};
pub use engine::reader::{FrameReader, SharedFrameReader};
pub use engine::render::Renderer;
