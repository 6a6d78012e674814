pub mod cpal_backend;
pub mod output_manager;

use std::time::Duration;

use crate::engine::clock::StreamFormat;
use crate::engine::error::Result;
use crate::engine::render::Renderer;

/// What the manager asks of the device when opening it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Target hardware buffer length.
    pub buffer_duration: Duration,
    /// Device name, or `None` for the system default.
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// An opened output stream. Owned by the manager while the device is open.
pub trait AudioOutput {
    /// Starts or resumes the render callback.
    fn start(&mut self) -> Result<()>;

    /// Suspends the render callback, keeping the device claimed.
    fn pause(&mut self) -> Result<()>;

    /// Stops the render callback ahead of teardown.
    fn stop(&mut self) -> Result<()>;

    /// Releases the hardware unit. The render callback, and the renderer it
    /// owns, are gone once this returns, even if it reports an error.
    fn release(&mut self) -> Result<()>;

    /// Format negotiated when the stream was built.
    fn format(&self) -> StreamFormat;

    /// False once the stream reported an error or the device went away.
    fn is_healthy(&self) -> bool;
}

/// Claims a device and builds a stream driving `renderer`.
pub trait OutputBackend {
    fn name(&self) -> &'static str;

    /// Opens the device. Implementations call [`Renderer::prepare`] with the
    /// negotiated format before handing the renderer to the device thread,
    /// and report every failure as `OutputError::DeviceUnavailable`.
    fn open(&mut self, request: &StreamRequest, renderer: Renderer) -> Result<Box<dyn AudioOutput>>;
}

/// Frames covering `duration` at `sample_rate`, at least one.
pub fn frames_for_duration(duration: Duration, sample_rate: u32) -> u32 {
    let frames = (duration.as_secs_f64() * sample_rate as f64).round();
    frames.clamp(1.0, u32::MAX as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_frames_follow_duration() {
        assert_eq!(frames_for_duration(Duration::from_millis(10), 48_000), 480);
        assert_eq!(frames_for_duration(Duration::from_millis(20), 44_100), 882);
        assert_eq!(frames_for_duration(Duration::ZERO, 44_100), 1);
    }
}
