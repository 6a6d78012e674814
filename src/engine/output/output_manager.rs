//! Lifecycle of the audio output device.
//!
//! `OutputManager` is driven from a single control thread. The device invokes
//! the render step on its own thread; the two meet only through the atomics
//! in [`Clock`] and [`OutputConfig`] and the reader hand-off channel.
//!
//! Frame readers must not call back into the manager. Control operations
//! issued from inside a render step fail with `OutputError::ReentrantCall`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::clock::{Clock, PlaybackState, StreamFormat};
use crate::engine::config::{OutputConfig, OutputSettings};
use crate::engine::error::{OutputError, Resource, Result, TeardownErrors};
use crate::engine::output::cpal_backend::CpalBackend;
use crate::engine::output::{AudioOutput, OutputBackend, StreamRequest};
use crate::engine::reader::{reader_channel, ReaderPublisher, SharedFrameReader};
use crate::engine::render::{in_render_context, Renderer};

pub struct OutputManager {
    backend: Box<dyn OutputBackend>,
    output: Option<Box<dyn AudioOutput>>,
    publisher: Option<ReaderPublisher>,
    reader: Option<SharedFrameReader>,
    clock: Arc<Clock>,
    config: Arc<OutputConfig>,
    device: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
}

impl OutputManager {
    /// Manager for the system default device with default settings.
    pub fn new() -> Self {
        Self::with_settings(&OutputSettings::default())
    }

    pub fn with_settings(settings: &OutputSettings) -> Self {
        Self::with_backend(Box::new(CpalBackend::new()), settings)
    }

    pub fn with_backend(backend: Box<dyn OutputBackend>, settings: &OutputSettings) -> Self {
        Self {
            backend,
            output: None,
            publisher: None,
            reader: None,
            clock: Arc::new(Clock::new()),
            config: Arc::new(OutputConfig::from_settings(settings)),
            device: settings.device.clone(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
        }
    }

    // --- configuration -------------------------------------------------

    pub fn is_muted(&self) -> bool {
        self.config.is_muted()
    }

    pub fn set_mute(&self, mute: bool) {
        self.config.set_mute(mute);
    }

    pub fn volume(&self) -> f32 {
        self.config.volume()
    }

    /// Takes effect from the next rendered buffer.
    pub fn set_volume(&self, volume: f32) {
        self.config.set_volume(volume);
    }

    pub fn buffer_duration(&self) -> Duration {
        self.config.buffer_duration()
    }

    /// Used by the next `open`.
    pub fn set_buffer_duration(&self, duration: Duration) {
        self.config.set_buffer_duration(duration);
    }

    /// Live configuration, for sharing with other control threads.
    pub fn config(&self) -> Arc<OutputConfig> {
        self.config.clone()
    }

    pub fn clock(&self) -> Arc<Clock> {
        self.clock.clone()
    }

    /// Registers the frame supplier. `None` makes the device render silence.
    pub fn set_frame_reader(&mut self, reader: Option<SharedFrameReader>) -> Result<()> {
        ensure_control_context("set_frame_reader")?;
        self.reader = reader.clone();
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(reader) {
                warn!("Frame reader not delivered to render thread: {}", e);
            }
        }
        Ok(())
    }

    pub fn set_frame_reader_fn<F>(&mut self, reader: F) -> Result<()>
    where
        F: Fn(&mut [f32], usize, usize) -> usize + Send + Sync + 'static,
    {
        self.set_frame_reader(Some(Arc::new(reader)))
    }

    pub fn has_frame_reader(&self) -> bool {
        self.reader.is_some()
    }

    // --- lifecycle -----------------------------------------------------

    /// Claims the output device. A no-op when the device is already open.
    pub fn try_open(&mut self) -> Result<()> {
        ensure_control_context("open")?;
        let state = self.clock.get_state();
        if state != PlaybackState::Closed {
            debug!("open ignored, device already {}", state);
            return Ok(());
        }

        let request = StreamRequest {
            buffer_duration: self.config.buffer_duration(),
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        };
        let (publisher, slot) = reader_channel(self.reader.clone());
        let renderer = Renderer::new(self.clock.clone(), self.config.clone(), slot);

        let mut output = self.backend.open(&request, renderer).map_err(|e| {
            let e = match e {
                OutputError::DeviceUnavailable(_) => e,
                other => OutputError::DeviceUnavailable(other.to_string()),
            };
            warn!("Failed to open audio output via {}: {}", self.backend.name(), e);
            e
        })?;

        let format = output.format();
        if format.sample_rate == 0 || format.channels == 0 {
            warn!("Backend {} negotiated an empty format", self.backend.name());
            if let Err(e) = output.release() {
                warn!("Failed to release rejected audio output: {}", e);
            }
            return Err(OutputError::DeviceUnavailable(format!(
                "invalid format {} Hz / {} ch",
                format.sample_rate, format.channels
            )));
        }

        self.clock.set_format(&format);
        self.output = Some(output);
        self.publisher = Some(publisher);
        self.clock.set_state(PlaybackState::Opened);
        info!(
            "Audio output opened: {} Hz, {} ch, buffer {:?} frames",
            format.sample_rate, format.channels, format.buffer_frames
        );
        Ok(())
    }

    pub fn open(&mut self) -> bool {
        self.try_open().is_ok()
    }

    /// Starts or resumes rendering. Requires Opened or Paused.
    pub fn try_play(&mut self) -> Result<()> {
        ensure_control_context("play")?;
        self.collect_retired();
        let state = self.clock.get_state();
        let output = match (state, self.output.as_mut()) {
            (PlaybackState::Opened | PlaybackState::Paused, Some(output)) => output,
            _ => {
                return Err(OutputError::InvalidStateTransition {
                    operation: "play",
                    state,
                })
            }
        };

        output.start().map_err(|e| {
            warn!("Failed to start audio output: {}", e);
            e
        })?;
        self.clock.set_state(PlaybackState::Playing);
        info!("Audio output playing");
        Ok(())
    }

    pub fn play(&mut self) -> bool {
        self.try_play().is_ok()
    }

    /// Suspends rendering without releasing the device. Requires Playing.
    ///
    /// Once this returns the render step no longer pulls from the reader.
    pub fn try_pause(&mut self) -> Result<()> {
        ensure_control_context("pause")?;
        let state = self.clock.get_state();
        let output = match (state, self.output.as_mut()) {
            (PlaybackState::Playing, Some(output)) => output,
            _ => {
                return Err(OutputError::InvalidStateTransition {
                    operation: "pause",
                    state,
                })
            }
        };

        self.clock.set_state(PlaybackState::Paused);
        self.clock.wait_for_render_idle();
        if let Err(e) = output.pause() {
            // The callback keeps running but renders silence while Paused.
            warn!("Device did not pause, rendering silence instead: {}", e);
        }
        self.collect_retired();
        info!("Audio output paused");
        Ok(())
    }

    pub fn pause(&mut self) -> bool {
        self.try_pause().is_ok()
    }

    /// Releases the device. Every teardown step is attempted and every
    /// failure is returned; the manager ends up Closed regardless.
    pub fn try_close(&mut self) -> std::result::Result<(), TeardownErrors> {
        if let Err(e) = ensure_control_context("close") {
            let mut errors = TeardownErrors::new();
            errors.push(e);
            return Err(errors);
        }
        if self.clock.get_state() == PlaybackState::Closed && self.output.is_none() {
            return Ok(());
        }

        let mut errors = TeardownErrors::new();
        self.clock.set_state(PlaybackState::Closed);

        if let Some(mut output) = self.output.take() {
            errors.record(Resource::RenderCallback, output.stop());
            self.clock.wait_for_render_idle();
            errors.record(Resource::HardwareUnit, output.release());
        }
        if let Some(publisher) = self.publisher.take() {
            errors.record(Resource::ReaderQueue, publisher.shutdown());
        }
        self.clock.clear_format();

        for error in errors.iter() {
            warn!("{}", error);
        }
        info!("Audio output closed with {} teardown failure(s)", errors.len());
        errors.into_result()
    }

    pub fn close(&mut self) -> bool {
        self.try_close().is_ok()
    }

    /// Reopens the device if it reported an error or the default device
    /// changed, restoring the previous playing/paused state.
    pub fn check_connection(&mut self) -> Result<()> {
        ensure_control_context("check_connection")?;
        self.collect_retired();
        let healthy = match &self.output {
            Some(output) => output.is_healthy(),
            None => return Ok(()),
        };
        if healthy {
            return Ok(());
        }

        let previous_state = self.clock.get_state();
        warn!("Audio output unhealthy while {}, reopening", previous_state);
        if let Err(errors) = self.try_close() {
            warn!("Reconnect teardown: {}", errors);
        }
        self.try_open()?;
        match previous_state {
            PlaybackState::Playing => self.try_play()?,
            PlaybackState::Paused => self.clock.set_state(PlaybackState::Paused),
            _ => {}
        }
        Ok(())
    }

    /// Periodic housekeeping from the control thread.
    pub fn tick(&mut self) {
        if let Err(e) = self.check_connection() {
            warn!("Audio output reconnect failed: {}", e);
        }
    }

    // --- queries -------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.clock.get_state()
    }

    pub fn is_opened(&self) -> bool {
        self.state() != PlaybackState::Closed
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Negotiated sample rate, or 0.0 before `open`.
    pub fn sample_rate(&self) -> f64 {
        self.clock.get_sample_rate() as f64
    }

    /// Negotiated channel count, or 0 before `open`.
    pub fn channels(&self) -> u32 {
        self.clock.get_channels()
    }

    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.output.as_ref().map(|o| o.format())
    }

    /// Hardware buffer latency, when the device buffer size is known.
    pub fn output_latency(&self) -> Option<Duration> {
        let format = self.stream_format()?;
        let frames = format.buffer_frames?;
        Some(Duration::from_secs_f64(frames as f64 / format.sample_rate as f64))
    }

    pub fn frames_rendered(&self) -> u64 {
        self.clock.frames_rendered()
    }

    pub fn underrun_frames(&self) -> u64 {
        self.clock.underrun_frames()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn collect_retired(&self) {
        if let Some(publisher) = &self.publisher {
            let dropped = publisher.collect_retired();
            if dropped > 0 {
                debug!("Dropped {} retired frame reader(s)", dropped);
            }
        }
    }
}

impl Default for OutputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OutputManager {
    fn drop(&mut self) {
        let _ = self.try_close();
    }
}

fn ensure_control_context(operation: &'static str) -> Result<()> {
    if in_render_context() {
        return Err(OutputError::ReentrantCall(operation));
    }
    Ok(())
}
