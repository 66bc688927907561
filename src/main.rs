// src/main.rs
use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use eeg_cascade::detection::{
    Burst, CascadeConfig, FrameSource, ScreenerConfig, ScreenerEvent, SeizureCascade,
    SimulatedSource, SpectralConfig, SpectralEvent,
};
use log::{debug, error, info, warn};
use serde::Serialize;

const DEMO_SECONDS: f64 = 10.0;
const FRAMES_PER_TICK: u64 = 25;

/// Thresholds tuned for the simulated source (10 uV noise, 150 uV bursts).
fn demo_config() -> CascadeConfig {
    CascadeConfig {
        screener: ScreenerConfig {
            rms_min: 60.0,
            line_length_min: 10.0,
            ..ScreenerConfig::default()
        },
        spectral: SpectralConfig {
            min_channels_to_trigger: 3,
            ..SpectralConfig::default()
        },
    }
}

fn emit<T: Serialize>(stage: &str, event: &T) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{stage} {line}"),
        Err(err) => error!("{stage} event not serialisable: {err}"),
    }
}

fn spawn_stage1_printer(rx: Receiver<ScreenerEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            match &event {
                ScreenerEvent::Evaluated(report) => {
                    debug!("stage1 window {} passed {}", report.window_end, report.passed)
                }
                ScreenerEvent::Fault { message } => warn!("stage1 fault: {message}"),
                _ => emit("stage1", &event),
            }
        }
    })
}

fn spawn_stage2_printer(rx: Receiver<SpectralEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            match &event {
                SpectralEvent::Evaluated(report) => debug!(
                    "stage2 block {}..={} ratios {:?}",
                    report.window_start, report.window_end, report.ratios
                ),
                SpectralEvent::Fault { message } => warn!("stage2 fault: {message}"),
                SpectralEvent::Triggered(_) => emit("stage2", &event),
            }
        }
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => CascadeConfig::from_json_file(&path)?,
        None => demo_config(),
    };
    let channels = config.screener.channel_count;
    let rate = config.screener.sample_rate_hz;

    let mut cascade = SeizureCascade::new(config).context("invalid cascade configuration")?;
    let stage1 = spawn_stage1_printer(cascade.subscribe_screener());
    let stage2 = spawn_stage2_printer(cascade.subscribe_spectral());
    cascade.start().context("starting cascade")?;

    let total = (rate * DEMO_SECONDS) as u64;
    let burst_channels: Vec<usize> = (0..channels.min(4)).collect();
    let mut source = SimulatedSource::new(channels, rate, total, 42)
        .with_burst(Burst {
            start_sample: (rate * 3.0) as u64,
            len_samples: (rate * 2.0) as u64,
            channels: burst_channels.clone(),
            freq_hz: 10.5,
            amplitude: 150.0,
        })
        .with_burst(Burst {
            start_sample: (rate * 7.0) as u64,
            len_samples: rate as u64,
            channels: burst_channels,
            freq_hz: 6.0,
            amplitude: 200.0,
        });

    info!("feeding {total} simulated frames ({channels} channels @ {rate} Hz)");
    let mut dropped = 0u64;
    while let Some(frame) = source.next_frame() {
        if cascade.ingest(&frame).is_err() {
            dropped += 1;
        }
        if source.position() % FRAMES_PER_TICK == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    // let the workers catch up before abandoning their queues
    thread::sleep(Duration::from_millis(500));

    info!(
        "stage1 accepted {} frames ({dropped} dropped), stage2 accepted {} blocks ({} dropped)",
        cascade.screener().accepted(),
        cascade.spectral().accepted(),
        cascade.spectral().dropped()
    );
    if let Err(err) = cascade.stop() {
        warn!("cascade stop: {err}");
    }
    drop(cascade);

    stage1.join().ok();
    stage2.join().ok();
    Ok(())
}
