//! In-memory output backend for driving the manager without hardware.
//!
//! The test keeps a [`MockDevice`] handle and pulls buffers through the
//! renderer the way a device thread would, and can make individual device
//! operations fail.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mewo_output::engine::output::frames_for_duration;
use mewo_output::{
    AudioOutput, DeviceSampleFormat, OutputBackend, OutputError, Renderer, Result,
    StreamFormat, StreamRequest,
};

/// Value a device buffer holds before the render step touches it.
pub const STALE: f32 = 7.0;

#[derive(Default)]
pub struct Faults {
    pub refuse_open: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_pause: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_release: AtomicBool,
    pub unhealthy: AtomicBool,
}

struct Shared {
    renderer: Mutex<Option<Renderer>>,
    faults: Faults,
    sample_rate: u32,
    channels: u16,
    running: AtomicBool,
    opens: AtomicUsize,
    last_request: Mutex<Option<StreamRequest>>,
}

/// Test-side view of the mock device.
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

struct MockBackend {
    shared: Arc<Shared>,
}

struct MockStream {
    shared: Arc<Shared>,
    format: StreamFormat,
}

pub fn mock_backend(sample_rate: u32, channels: u16) -> (Box<dyn OutputBackend>, MockDevice) {
    let shared = Arc::new(Shared {
        renderer: Mutex::new(None),
        faults: Faults::default(),
        sample_rate,
        channels,
        running: AtomicBool::new(false),
        opens: AtomicUsize::new(0),
        last_request: Mutex::new(None),
    });
    (
        Box::new(MockBackend {
            shared: shared.clone(),
        }),
        MockDevice { shared },
    )
}

impl MockDevice {
    pub fn faults(&self) -> &Faults {
        &self.shared.faults
    }

    /// Runs one render step for `frames` frames. `None` once the device has
    /// been released.
    pub fn render(&self, frames: usize) -> Option<Vec<f32>> {
        let mut guard = self.shared.renderer.lock().unwrap();
        let renderer = guard.as_mut()?;
        let mut buffer = vec![STALE; frames * renderer.channels()];
        renderer.render(&mut buffer);
        Some(buffer)
    }

    pub fn has_renderer(&self) -> bool {
        self.shared.renderer.lock().unwrap().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<StreamRequest> {
        self.shared.last_request.lock().unwrap().clone()
    }
}

fn fail(flag: &AtomicBool, what: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        Err(OutputError::Stream(format!("{} refused", what)))
    } else {
        Ok(())
    }
}

impl OutputBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&mut self, request: &StreamRequest, mut renderer: Renderer) -> Result<Box<dyn AudioOutput>> {
        if self.shared.faults.refuse_open.load(Ordering::SeqCst) {
            return Err(OutputError::DeviceUnavailable("device busy".to_string()));
        }
        let sample_rate = request.sample_rate.unwrap_or(self.shared.sample_rate);
        let channels = request.channels.unwrap_or(self.shared.channels);
        let format = StreamFormat {
            sample_rate,
            channels,
            buffer_frames: Some(frames_for_duration(request.buffer_duration, sample_rate)),
            sample_format: DeviceSampleFormat::F32,
        };
        renderer.prepare(&format);

        *self.shared.renderer.lock().unwrap() = Some(renderer);
        *self.shared.last_request.lock().unwrap() = Some(request.clone());
        self.shared.faults.unhealthy.store(false, Ordering::SeqCst);
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            shared: self.shared.clone(),
            format,
        }))
    }
}

impl AudioOutput for MockStream {
    fn start(&mut self) -> Result<()> {
        fail(&self.shared.faults.fail_start, "start")?;
        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        fail(&self.shared.faults.fail_pause, "pause")?;
        self.shared.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        fail(&self.shared.faults.fail_stop, "stop")?;
        self.shared.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.shared.renderer.lock().unwrap().take();
        self.shared.running.store(false, Ordering::SeqCst);
        fail(&self.shared.faults.fail_release, "release")
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn is_healthy(&self) -> bool {
        !self.shared.faults.unhealthy.load(Ordering::SeqCst)
    }
}
