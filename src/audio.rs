//! Microphone capture and speaker playback
//!
//! Both run on dedicated OS threads since the device APIs block. Captured audio
//! is 16-bit little-endian mono PCM at 16 kHz, the format the Live API expects;
//! playback takes the 24 kHz PCM produced by speech synthesis.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::queue::{Interrupt, OutboundFrame, OutboundMultiplexer, PlaybackChunk, RunFlag};

/// Pause after a failed device read before trying again.
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio backend not available (build with the `pulse` feature)")]
    Unavailable,

    #[error("PulseAudio error: {0}")]
    Pulse(String),
}

/// A blocking source of PCM audio.
pub trait AudioSource {
    /// Fill `buffer` completely.
    fn read(&mut self, buffer: &mut [u8]) -> Result<(), AudioError>;
}

/// A blocking PCM output device.
pub trait AudioSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Block until queued audio has been played.
    fn drain(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

#[cfg(feature = "pulse")]
mod pulse {
    use super::{AudioError, AudioSink, AudioSource};
    use libpulse_binding::sample::{Format, Spec};
    use libpulse_binding::stream::Direction;
    use libpulse_simple_binding::Simple;

    fn open(app_name: &str, direction: Direction, rate: u32, description: &str) -> Result<Simple, AudioError> {
        let spec = Spec {
            format: Format::S16le,
            channels: 1,
            rate,
        };
        Simple::new(
            None,     // default server
            app_name, // application name
            direction,
            None, // default device
            description,
            &spec,
            None, // default channel map
            None, // default buffering
        )
        .map_err(|e| AudioError::Pulse(e.to_string()))
    }

    /// Default PulseAudio input.
    pub struct PulseSource {
        simple: Simple,
    }

    impl PulseSource {
        pub fn new(app_name: &str, rate: u32) -> Result<Self, AudioError> {
            Ok(Self {
                simple: open(app_name, Direction::Record, rate, "record")?,
            })
        }
    }

    impl AudioSource for PulseSource {
        fn read(&mut self, buffer: &mut [u8]) -> Result<(), AudioError> {
            self.simple
                .read(buffer)
                .map_err(|e| AudioError::Pulse(e.to_string()))
        }
    }

    /// Default PulseAudio output.
    pub struct PulseSink {
        simple: Simple,
    }

    impl PulseSink {
        pub fn new(app_name: &str, rate: u32) -> Result<Self, AudioError> {
            Ok(Self {
                simple: open(app_name, Direction::Playback, rate, "playback")?,
            })
        }
    }

    impl AudioSink for PulseSink {
        fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
            self.simple
                .write(pcm)
                .map_err(|e| AudioError::Pulse(e.to_string()))
        }

        fn drain(&mut self) -> Result<(), AudioError> {
            self.simple
                .drain()
                .map_err(|e| AudioError::Pulse(e.to_string()))
        }
    }
}

/// Open the default microphone at `rate` Hz.
#[cfg(feature = "pulse")]
pub fn open_microphone(app_name: &str, rate: u32) -> Result<Box<dyn AudioSource>, AudioError> {
    info!("Opening PulseAudio microphone at {} Hz", rate);
    Ok(Box::new(pulse::PulseSource::new(app_name, rate)?))
}

#[cfg(not(feature = "pulse"))]
pub fn open_microphone(_app_name: &str, _rate: u32) -> Result<Box<dyn AudioSource>, AudioError> {
    Err(AudioError::Unavailable)
}

/// Open the default speaker at `rate` Hz.
#[cfg(feature = "pulse")]
pub fn open_speaker(app_name: &str, rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
    info!("Opening PulseAudio speaker at {} Hz", rate);
    Ok(Box::new(pulse::PulseSink::new(app_name, rate)?))
}

#[cfg(not(feature = "pulse"))]
pub fn open_speaker(_app_name: &str, _rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
    Err(AudioError::Unavailable)
}

/// Start the microphone thread. The device is opened on the thread itself.
///
/// Chunks of `chunk_bytes` are pushed with backpressure, so a slow session
/// throttles capture instead of dropping audio.
pub fn spawn_capture<F>(
    open: F,
    chunk_bytes: usize,
    outbound: OutboundMultiplexer,
    running: RunFlag,
) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() -> Result<Box<dyn AudioSource>, AudioError> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("mic-capture".into())
        .spawn(move || {
            if let Err(e) = capture_loop(open, chunk_bytes, outbound, running) {
                error!("Audio capture error: {:#}", e);
            }
        })
        .context("spawning capture thread")?;
    Ok(handle)
}

fn capture_loop<F>(
    open: F,
    chunk_bytes: usize,
    outbound: OutboundMultiplexer,
    running: RunFlag,
) -> anyhow::Result<()>
where
    F: FnOnce() -> Result<Box<dyn AudioSource>, AudioError>,
{
    let mut source = open().context("opening microphone")?;
    info!("Audio capture started ({} byte chunks)", chunk_bytes);

    let mut buffer = vec![0u8; chunk_bytes];
    while running.is_running() {
        if let Err(e) = source.read(&mut buffer) {
            warn!("Microphone read failed: {}", e);
            thread::sleep(READ_RETRY_DELAY);
            continue;
        }
        if !running.is_running() {
            break;
        }
        if !outbound.blocking_push(OutboundFrame::Audio(buffer.clone())) {
            debug!("Outbound queue closed, stopping capture");
            break;
        }
    }

    info!("Audio capture stopped");
    Ok(())
}

/// Start the speaker thread. Chunks from an interrupted epoch are skipped.
pub fn spawn_playback<F>(
    open: F,
    playback: mpsc::UnboundedReceiver<PlaybackChunk>,
    interrupt: Interrupt,
    running: RunFlag,
) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() -> Result<Box<dyn AudioSink>, AudioError> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("speaker".into())
        .spawn(move || {
            if let Err(e) = playback_loop(open, playback, interrupt, running) {
                error!("Audio playback error: {:#}", e);
            }
        })
        .context("spawning playback thread")?;
    Ok(handle)
}

fn playback_loop<F>(
    open: F,
    mut playback: mpsc::UnboundedReceiver<PlaybackChunk>,
    interrupt: Interrupt,
    running: RunFlag,
) -> anyhow::Result<()>
where
    F: FnOnce() -> Result<Box<dyn AudioSink>, AudioError>,
{
    let mut sink = open().context("opening speaker")?;
    info!("Audio playback started");

    while let Some(chunk) = playback.blocking_recv() {
        if !running.is_running() {
            break;
        }
        if interrupt.is_stale(chunk.epoch) {
            debug!("Dropping interrupted audio chunk ({} bytes)", chunk.item.len());
            continue;
        }
        if let Err(e) = sink.write(&chunk.item) {
            warn!("Speaker write failed: {}", e);
        }
    }

    if let Err(e) = sink.drain() {
        debug!("Speaker drain failed: {}", e);
    }
    info!("Audio playback stopped");
    Ok(())
}
