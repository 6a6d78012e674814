//! The real-time render step.
//!
//! A [`Renderer`] is moved into the device callback when the device is opened
//! and runs on the device's own thread from then on. It never blocks, never
//! allocates and never logs.

use std::cell::Cell;
use std::sync::Arc;

use cpal::{FromSample, Sample};

use crate::engine::clock::{Clock, DeviceSampleFormat, PlaybackState, StreamFormat};
use crate::engine::config::OutputConfig;
use crate::engine::reader::ReaderSlot;

/// Scratch frames reserved for non-`f32` devices that do not report a buffer size.
const MIN_SCRATCH_FRAMES: usize = 4096;

thread_local! {
    static IN_RENDER: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is inside a render step.
pub fn in_render_context() -> bool {
    IN_RENDER.with(|flag| flag.get())
}

struct RenderGuard<'a> {
    clock: &'a Clock,
}

impl<'a> RenderGuard<'a> {
    fn enter(clock: &'a Clock) -> Self {
        clock.begin_render();
        IN_RENDER.with(|flag| flag.set(true));
        Self { clock }
    }
}

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        IN_RENDER.with(|flag| flag.set(false));
        self.clock.end_render();
    }
}

pub struct Renderer {
    clock: Arc<Clock>,
    config: Arc<OutputConfig>,
    reader: ReaderSlot,
    channels: usize,
    scratch: Vec<f32>,
}

impl Renderer {
    pub(crate) fn new(clock: Arc<Clock>, config: Arc<OutputConfig>, reader: ReaderSlot) -> Self {
        Self {
            clock,
            config,
            reader,
            channels: 0,
            scratch: Vec::new(),
        }
    }

    /// Binds the renderer to the negotiated format. Must be called by the
    /// backend before the first render step.
    pub fn prepare(&mut self, format: &StreamFormat) {
        self.channels = format.channels as usize;
        self.scratch = match format.sample_format {
            DeviceSampleFormat::F32 => Vec::new(),
            _ => {
                let frames = format
                    .buffer_frames
                    .map(|f| f as usize)
                    .unwrap_or(0)
                    .max(MIN_SCRATCH_FRAMES);
                vec![0.0; frames * self.channels]
            }
        };
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fills `out` with one buffer of interleaved output.
    pub fn render(&mut self, out: &mut [f32]) {
        let clock = self.clock.clone();
        let _guard = RenderGuard::enter(&clock);
        self.reader.refresh();
        let muted = self.config.is_muted();
        let volume = self.config.volume();
        self.render_with(out, muted, volume);
    }

    /// Pull, pad and gain for one run of samples. Mute and volume are passed
    /// in so a device buffer split across scratch chunks uses one gain.
    fn render_with(&mut self, out: &mut [f32], muted: bool, volume: f32) {
        let channels = self.channels;
        if channels == 0 || self.clock.get_state() != PlaybackState::Playing {
            out.fill(0.0);
            return;
        }
        let Some(reader) = self.reader.current() else {
            out.fill(0.0);
            return;
        };

        let frames = out.len() / channels;
        let samples = frames * channels;

        let written = reader.read_frames(&mut out[..samples], frames, channels).min(frames);
        if written < frames {
            self.clock.add_underrun((frames - written) as u64);
        }
        out[written * channels..].fill(0.0);

        if muted {
            out.fill(0.0);
        } else if volume != 1.0 {
            for sample in out[..written * channels].iter_mut() {
                *sample *= volume;
            }
        }

        self.clock.add_rendered(frames as u64);
    }

    /// Renders into a device buffer of another sample type through the
    /// pre-allocated scratch buffer.
    pub fn render_converted<T: Sample + FromSample<f32>>(&mut self, out: &mut [T]) {
        let clock = self.clock.clone();
        let _guard = RenderGuard::enter(&clock);
        self.reader.refresh();
        let muted = self.config.is_muted();
        let volume = self.config.volume();

        let mut scratch = std::mem::take(&mut self.scratch);
        let chunk_len = if self.channels == 0 {
            0
        } else {
            scratch.len() / self.channels * self.channels
        };

        if chunk_len == 0 {
            for sample in out.iter_mut() {
                *sample = T::from_sample(0.0f32);
            }
        } else {
            for chunk in out.chunks_mut(chunk_len) {
                let staged = &mut scratch[..chunk.len()];
                self.render_with(staged, muted, volume);
                for (dst, src) in chunk.iter_mut().zip(staged.iter()) {
                    *dst = T::from_sample(*src);
                }
            }
        }

        self.scratch = scratch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reader::{reader_channel, ReaderPublisher, SharedFrameReader};

    fn format(sample_format: DeviceSampleFormat) -> StreamFormat {
        StreamFormat {
            sample_rate: 48_000,
            channels: 2,
            buffer_frames: Some(64),
            sample_format,
        }
    }

    fn renderer(reader: Option<SharedFrameReader>) -> (Renderer, ReaderPublisher, Arc<Clock>, Arc<OutputConfig>) {
        let clock = Arc::new(Clock::new());
        let config = Arc::new(OutputConfig::new());
        let (publisher, slot) = reader_channel(reader);
        let mut renderer = Renderer::new(clock.clone(), config.clone(), slot);
        renderer.prepare(&format(DeviceSampleFormat::F32));
        clock.set_state(PlaybackState::Playing);
        (renderer, publisher, clock, config)
    }

    fn ramp() -> SharedFrameReader {
        Arc::new(|out: &mut [f32], frames: usize, channels: usize| {
            for (i, s) in out[..frames * channels].iter_mut().enumerate() {
                *s = (i + 1) as f32 / 1000.0;
            }
            frames
        })
    }

    #[test]
    fn silence_unless_playing() {
        let (mut r, _p, clock, _c) = renderer(Some(ramp()));
        for state in [PlaybackState::Closed, PlaybackState::Opened, PlaybackState::Paused] {
            clock.set_state(state);
            let mut out = [1.0f32; 8];
            r.render(&mut out);
            assert!(out.iter().all(|s| *s == 0.0), "{state} should render silence");
        }
        assert_eq!(clock.frames_rendered(), 0);
    }

    #[test]
    fn short_read_is_padded_and_counted() {
        let half: SharedFrameReader = Arc::new(|out: &mut [f32], frames: usize, channels: usize| {
            let supplied = frames / 2;
            out[..supplied * channels].fill(0.5);
            supplied
        });
        let (mut r, _p, clock, _c) = renderer(Some(half));
        let mut out = [9.0f32; 16];
        r.render(&mut out);
        assert!(out[..8].iter().all(|s| *s == 0.5));
        assert!(out[8..].iter().all(|s| *s == 0.0));
        assert_eq!(clock.underrun_frames(), 4);
        assert_eq!(clock.frames_rendered(), 8);
    }

    #[test]
    fn overlong_reader_count_is_clamped() {
        let liar: SharedFrameReader = Arc::new(|out: &mut [f32], _frames: usize, _channels: usize| {
            out.fill(0.25);
            usize::MAX
        });
        let (mut r, _p, clock, _c) = renderer(Some(liar));
        let mut out = [0.0f32; 7];
        r.render(&mut out);
        assert!(out[..6].iter().all(|s| *s == 0.25));
        assert_eq!(out[6], 0.0);
        assert_eq!(clock.underrun_frames(), 0);
    }

    #[test]
    fn mute_and_volume_apply_per_buffer() {
        let (mut r, _p, _clock, config) = renderer(Some(ramp()));
        config.set_volume(0.5);
        let mut out = [0.0f32; 4];
        r.render(&mut out);
        assert_eq!(out, [0.0005, 0.001, 0.0015, 0.002]);

        config.set_mute(true);
        r.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn converted_render_uses_scratch_in_chunks() {
        let full_scale: SharedFrameReader = Arc::new(|out: &mut [f32], frames: usize, channels: usize| {
            out[..frames * channels].fill(1.0);
            frames
        });
        let (mut r, _p, clock, config) = renderer(Some(full_scale));
        r.prepare(&format(DeviceSampleFormat::I16));
        let mut out = vec![0i16; MIN_SCRATCH_FRAMES * 2 * 3];
        r.render_converted(&mut out);
        let full = i16::from_sample(1.0f32);
        assert!(full > 0);
        assert!(out.iter().all(|s| *s == full));
        assert_eq!(clock.frames_rendered(), (MIN_SCRATCH_FRAMES * 3) as u64);

        let mut unsigned = vec![0u16; 8];
        r.prepare(&format(DeviceSampleFormat::U16));
        config.set_mute(true);
        r.render_converted(&mut unsigned);
        let silence = u16::from_sample(0.0f32);
        assert!(unsigned.iter().all(|s| *s == silence));
    }

    #[test]
    fn converted_buffer_keeps_one_gain_across_chunks() {
        let clock = Arc::new(Clock::new());
        let config = Arc::new(OutputConfig::new());
        config.set_volume(0.5);
        let live = config.clone();
        let turns_down: SharedFrameReader = Arc::new(move |out: &mut [f32], frames: usize, channels: usize| {
            out[..frames * channels].fill(1.0);
            live.set_volume(0.25);
            frames
        });
        let (_p, slot) = reader_channel(Some(turns_down));
        let mut r = Renderer::new(clock.clone(), config.clone(), slot);
        r.prepare(&format(DeviceSampleFormat::I16));
        clock.set_state(PlaybackState::Playing);

        let mut out = vec![0i16; MIN_SCRATCH_FRAMES * 2 * 2];
        r.render_converted(&mut out);
        let half = i16::from_sample(0.5f32);
        assert!(out.iter().all(|s| *s == half));
        assert_eq!(clock.frames_rendered(), (MIN_SCRATCH_FRAMES * 2) as u64);

        r.render_converted(&mut out);
        let quarter = i16::from_sample(0.25f32);
        assert!(out.iter().all(|s| *s == quarter));
    }

    #[test]
    fn reentrancy_flag_is_scoped_to_render() {
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen_in_reader = seen.clone();
        let probe: SharedFrameReader = Arc::new(move |_out: &mut [f32], frames: usize, _channels: usize| {
            seen_in_reader.store(in_render_context(), std::sync::atomic::Ordering::SeqCst);
            frames
        });
        let (mut r, _p, clock, _c) = renderer(Some(probe));
        let mut out = [0.0f32; 2];
        r.render(&mut out);
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!in_render_context());
        assert!(!clock.is_rendering());
    }
}
