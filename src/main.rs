use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use mewo_output::{create_audio_buffer, OutputManager, OutputSettings};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TONE_HZ: f32 = 440.0;
const PLAY_SECS: u64 = 4;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mewo_output=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Optional path to a TOML settings file.
    let settings = match std::env::args().nth(1) {
        Some(path) => OutputSettings::load(&path).with_context(|| format!("loading {}", path))?,
        None => OutputSettings::default(),
    };

    let mut output = OutputManager::with_settings(&settings);
    output.try_open().context("opening audio output")?;

    let sample_rate = output.sample_rate() as f32;
    let channels = output.channels() as usize;
    info!("Output ready: {} Hz, {} channels, latency {:?}", sample_rate, channels, output.output_latency());

    // Half a second of audio between the tone thread and the device.
    let (mut producer, consumer) = create_audio_buffer(sample_rate as usize * channels / 2);
    output.set_frame_reader(Some(Arc::new(consumer)))?;

    let running = Arc::new(AtomicBool::new(true));
    let generating = running.clone();
    let generator = thread::spawn(move || {
        let mut phase = 0.0f32;
        let step = TONE_HZ / sample_rate;
        let mut frame = vec![0.0f32; channels];
        while generating.load(Ordering::Relaxed) {
            if producer.vacant_len() < channels {
                thread::sleep(Duration::from_millis(5));
                continue;
            }
            let value = (phase * std::f32::consts::TAU).sin() * 0.2;
            frame.fill(value);
            producer.push_slice(&frame);
            phase = (phase + step).fract();
        }
    });

    output.try_play()?;
    for second in 0..PLAY_SECS {
        thread::sleep(Duration::from_secs(1));
        output.tick();
        if second == 1 {
            output.set_volume(0.5);
        }
        info!(
            "Playback time: {:.2} s, underrun frames: {}",
            output.clock().get_time_secs(),
            output.underrun_frames()
        );
    }

    output.try_pause()?;
    running.store(false, Ordering::Relaxed);
    generator
        .join()
        .map_err(|_| anyhow!("tone generator panicked"))?;

    output.try_close()?;
    info!("Example finished.");
    Ok(())
}
