use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Closed = 0,
    Opened = 1,
    Playing = 2,
    Paused = 3,
}

impl From<u8> for PlaybackState {
    fn from(value: u8) -> Self {
        match value {
            1 => PlaybackState::Opened,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            _ => PlaybackState::Closed,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlaybackState::Closed => "closed",
            PlaybackState::Opened => "opened",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Sample type the device consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSampleFormat {
    F32,
    I16,
    U16,
}

/// Format negotiated with the device when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Hardware buffer size in frames, when the device lets us choose it.
    pub buffer_frames: Option<u32>,
    pub sample_format: DeviceSampleFormat,
}

/// The Clock is the shared timing authority between the control thread and
/// the device's render thread. Every field is atomic so the render step never
/// has to take a lock to read it.
pub struct Clock {
    state: AtomicU8,
    sample_rate: AtomicU32,
    channels: AtomicU16,
    /// Frames handed to the device since the last open.
    frames_rendered: AtomicU64,
    /// Frames padded with silence because the reader came up short.
    underrun_frames: AtomicU64,
    /// Set for the duration of a render step.
    render_active: AtomicBool,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Closed as u8),
            sample_rate: AtomicU32::new(0),
            channels: AtomicU16::new(0),
            frames_rendered: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            render_active: AtomicBool::new(false),
        }
    }

    pub fn get_state(&self) -> PlaybackState {
        PlaybackState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Publishes the negotiated format and resets the counters.
    pub fn set_format(&self, format: &StreamFormat) {
        self.sample_rate.store(format.sample_rate, Ordering::SeqCst);
        self.channels.store(format.channels, Ordering::SeqCst);
        self.frames_rendered.store(0, Ordering::SeqCst);
        self.underrun_frames.store(0, Ordering::SeqCst);
    }

    /// Returns the sample rate to the 0 sentinel.
    pub fn clear_format(&self) {
        self.sample_rate.store(0, Ordering::SeqCst);
        self.channels.store(0, Ordering::SeqCst);
    }

    pub fn get_sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn get_channels(&self) -> u32 {
        self.channels.load(Ordering::Relaxed) as u32
    }

    pub fn add_rendered(&self, frames: u64) {
        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn add_underrun(&self, frames: u64) {
        self.underrun_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }

    /// Seconds of audio rendered since the device was opened.
    pub fn get_time_secs(&self) -> f64 {
        let rate = self.get_sample_rate() as f64;
        if rate > 0.0 {
            self.frames_rendered() as f64 / rate
        } else {
            0.0
        }
    }

    pub(crate) fn begin_render(&self) {
        self.render_active.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_render(&self) {
        self.render_active.store(false, Ordering::Release);
    }

    pub fn is_rendering(&self) -> bool {
        self.render_active.load(Ordering::SeqCst)
    }

    /// Spins until no render step is in flight.
    ///
    /// Callers publish the new state first. A render step that starts after
    /// the store sees the new state, and one that started before it is
    /// waited out here, so nothing observes the old state once this returns.
    pub fn wait_for_render_idle(&self) {
        let mut spins = 0u32;
        while self.is_rendering() {
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
