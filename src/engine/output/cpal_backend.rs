use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, Stream, StreamConfig, SupportedBufferSize, SupportedStreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::engine::clock::{DeviceSampleFormat, StreamFormat};
use crate::engine::error::{OutputError, Result};
use crate::engine::output::{frames_for_duration, AudioOutput, OutputBackend, StreamRequest};
use crate::engine::render::Renderer;

/// Opens output streams on the platform's default cpal host.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn find_device(&self, name: Option<&str>) -> Result<Device> {
        if let Some(name) = name {
            let mut devices = self
                .host
                .output_devices()
                .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?;
            return devices
                .find(|d| device_name(d) == name)
                .ok_or_else(|| OutputError::DeviceUnavailable(format!("Device '{}' not found", name)));
        }
        self.host
            .default_output_device()
            .ok_or_else(|| OutputError::DeviceUnavailable("No output device available".to_string()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&mut self, request: &StreamRequest, mut renderer: Renderer) -> Result<Box<dyn AudioOutput>> {
        let device = self.find_device(request.device.as_deref())?;
        let device_id = device_name(&device);

        let supported = negotiate(&device, request)?;
        let sample_format = supported.sample_format();
        let device_format = match sample_format {
            SampleFormat::F32 => DeviceSampleFormat::F32,
            SampleFormat::I16 => DeviceSampleFormat::I16,
            SampleFormat::U16 => DeviceSampleFormat::U16,
            other => {
                return Err(OutputError::DeviceUnavailable(format!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        };

        let mut config: StreamConfig = supported.config();
        let buffer_frames = fixed_buffer_frames(supported.buffer_size(), request, config.sample_rate);
        if let Some(frames) = buffer_frames {
            config.buffer_size = BufferSize::Fixed(frames);
        }

        let format = StreamFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_frames,
            sample_format: device_format,
        };
        renderer.prepare(&format);

        debug!(
            "Opening '{}': {} Hz, {} ch, {:?}, buffer {:?}",
            device_id, format.sample_rate, format.channels, sample_format, config.buffer_size
        );

        let is_healthy = Arc::new(AtomicBool::new(true));
        let is_healthy_err = is_healthy.clone();
        let err_fn = move |err: cpal::StreamError| {
            error!("Audio stream error: {}", err);
            is_healthy_err.store(false, Ordering::SeqCst);
        };

        let stream_res = match device_format {
            DeviceSampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _| renderer.render(data),
                err_fn,
                None,
            ),
            DeviceSampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _| renderer.render_converted(data),
                err_fn,
                None,
            ),
            DeviceSampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _| renderer.render_converted(data),
                err_fn,
                None,
            ),
        };
        let stream = stream_res.map_err(|e| OutputError::DeviceUnavailable(e.to_string()))?;

        // Some hosts start streams as soon as they are built.
        if let Err(e) = stream.pause() {
            debug!("Stream could not be held paused after build: {}", e);
        }

        info!("Audio device '{}' opened", device_id);
        Ok(Box::new(CpalOutput {
            stream: Some(stream),
            host: cpal::default_host(),
            device_id,
            follow_default: request.device.is_none(),
            is_healthy,
            format,
        }))
    }
}

pub struct CpalOutput {
    stream: Option<Stream>,
    host: Host,
    device_id: String,
    /// Reconnect when the system default device changes.
    follow_default: bool,
    is_healthy: Arc<AtomicBool>,
    format: StreamFormat,
}

impl CpalOutput {
    fn stream(&self) -> Result<&Stream> {
        self.stream
            .as_ref()
            .ok_or_else(|| OutputError::Stream("stream already released".to_string()))
    }
}

impl AudioOutput for CpalOutput {
    fn start(&mut self) -> Result<()> {
        self.stream()?
            .play()
            .map_err(|e| OutputError::Stream(e.to_string()))
    }

    fn pause(&mut self) -> Result<()> {
        self.stream()?
            .pause()
            .map_err(|e| OutputError::Stream(e.to_string()))
    }

    fn stop(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.pause().map_err(|e| OutputError::Stream(e.to_string())),
            None => Ok(()),
        }
    }

    fn release(&mut self) -> Result<()> {
        // Dropping the stream joins the callback and drops the renderer.
        if self.stream.take().is_some() {
            debug!("Audio device '{}' released", self.device_id);
        }
        Ok(())
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn is_healthy(&self) -> bool {
        if !self.is_healthy.load(Ordering::SeqCst) {
            return false;
        }
        if self.follow_default {
            if let Some(device) = self.host.default_output_device() {
                let name = device_name(&device);
                if name != self.device_id {
                    warn!("Default output device changed: '{}' -> '{}'", self.device_id, name);
                    return false;
                }
            }
        }
        true
    }
}

#[allow(deprecated)]
fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

fn is_renderable(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Picks a stream config honouring the requested rate and channel count when
/// the device supports them, preferring `f32` samples, else the device default.
fn negotiate(device: &Device, request: &StreamRequest) -> Result<SupportedStreamConfig> {
    let default = device
        .default_output_config()
        .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to get default config: {}", e)))?;

    let rate = request.sample_rate.unwrap_or(default.sample_rate());
    let channels = request.channels.unwrap_or(default.channels());

    let candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to get device configs: {}", e)))?
        .filter(|c| is_renderable(c.sample_format()))
        .filter(|c| c.channels() == channels)
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .collect();

    let preferred = candidates
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
        .or_else(|| candidates.first());

    if let Some(range) = preferred {
        return Ok(range.clone().with_sample_rate(rate));
    }

    if request.sample_rate.is_some() || request.channels.is_some() {
        warn!(
            "Device does not support {} Hz / {} ch, using its default {} Hz / {} ch",
            rate,
            channels,
            default.sample_rate(),
            default.channels()
        );
    }

    if is_renderable(default.sample_format()) {
        Ok(default)
    } else {
        Err(OutputError::DeviceUnavailable(format!(
            "Unsupported sample format {:?}",
            default.sample_format()
        )))
    }
}

/// Hardware buffer size for the requested duration, clamped to what the
/// device accepts. `None` leaves the device default in place.
fn fixed_buffer_frames(supported: &SupportedBufferSize, request: &StreamRequest, sample_rate: u32) -> Option<u32> {
    match supported {
        SupportedBufferSize::Range { min, max } => {
            let wanted = frames_for_duration(request.buffer_duration, sample_rate);
            Some(wanted.clamp(*min, (*max).max(*min)))
        }
        SupportedBufferSize::Unknown => None,
    }
}
