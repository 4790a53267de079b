//! Video frame sampling: screen or webcam.
//!
//! A sampler thread grabs frames at preview rate into a `watch` channel. A
//! downsampler task forwards the latest frame to the session once per send
//! interval as a bounded JPEG thumbnail.

use std::io::Cursor;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use image::{DynamicImage, ImageFormat, RgbImage};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::queue::{OutboundFrame, OutboundMultiplexer, RunFlag};

/// Back-off after a failed grab.
const GRAB_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{0} capture not available (build with the `{1}` feature)")]
    Unavailable(&'static str, &'static str),

    #[error("No monitors found")]
    NoMonitor,

    #[error("Capture failed: {0}")]
    Capture(String),
}

/// A blocking source of video frames.
pub trait FrameSource {
    fn grab(&mut self) -> Result<RgbImage, FrameError>;
}

/// Most recent frame, shared with the preview consumer and the downsampler.
pub type LatestFrame = Option<Arc<RgbImage>>;

/// Rebuild an RGBA/RGB buffer as an [`RgbImage`].
fn rgb_from_raw(width: u32, height: u32, raw: Vec<u8>, channels: usize) -> Result<RgbImage, FrameError> {
    let rgb = match channels {
        3 => raw,
        4 => raw
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        n => return Err(FrameError::Capture(format!("unsupported channel count {}", n))),
    };
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| FrameError::Capture("frame buffer size mismatch".to_string()))
}

/// Captures the primary monitor using the `xcap` crate.
#[cfg(feature = "capture")]
pub struct ScreenSource {
    monitor: xcap::Monitor,
}

#[cfg(feature = "capture")]
impl ScreenSource {
    pub fn new() -> Result<Self, FrameError> {
        let monitors = xcap::Monitor::all().map_err(|e| FrameError::Capture(e.to_string()))?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| monitors.first())
            .cloned()
            .ok_or(FrameError::NoMonitor)?;

        info!(
            "Using monitor: {} ({}x{})",
            monitor.name().unwrap_or_else(|_| "Unknown".to_string()),
            monitor.width().unwrap_or(0),
            monitor.height().unwrap_or(0)
        );
        Ok(Self { monitor })
    }
}

#[cfg(feature = "capture")]
impl FrameSource for ScreenSource {
    fn grab(&mut self) -> Result<RgbImage, FrameError> {
        let image = self
            .monitor
            .capture_image()
            .map_err(|e| FrameError::Capture(e.to_string()))?;
        let (width, height) = (image.width(), image.height());
        rgb_from_raw(width, height, image.into_raw(), 4)
    }
}

/// Opens the screen capturer.
#[cfg(feature = "capture")]
pub fn open_screen() -> Result<Box<dyn FrameSource>, FrameError> {
    Ok(Box::new(ScreenSource::new()?))
}

#[cfg(not(feature = "capture"))]
pub fn open_screen() -> Result<Box<dyn FrameSource>, FrameError> {
    Err(FrameError::Unavailable("Screen", "capture"))
}

/// Default webcam via `nokhwa`.
#[cfg(feature = "camera")]
pub struct CameraSource {
    camera: nokhwa::Camera,
}

#[cfg(feature = "camera")]
impl CameraSource {
    pub fn new() -> Result<Self, FrameError> {
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = nokhwa::Camera::new(CameraIndex::Index(0), requested)
            .map_err(|e| FrameError::Capture(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| FrameError::Capture(e.to_string()))?;
        info!("Using camera: {}", camera.info().human_name());
        Ok(Self { camera })
    }
}

#[cfg(feature = "camera")]
impl FrameSource for CameraSource {
    fn grab(&mut self) -> Result<RgbImage, FrameError> {
        use nokhwa::pixel_format::RgbFormat;

        let frame = self
            .camera
            .frame()
            .map_err(|e| FrameError::Capture(e.to_string()))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| FrameError::Capture(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        rgb_from_raw(width, height, decoded.into_raw(), 3)
    }
}

#[cfg(feature = "camera")]
impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to stop camera stream: {}", e);
        }
    }
}

/// Opens the default webcam.
#[cfg(feature = "camera")]
pub fn open_camera() -> Result<Box<dyn FrameSource>, FrameError> {
    Ok(Box::new(CameraSource::new()?))
}

#[cfg(not(feature = "camera"))]
pub fn open_camera() -> Result<Box<dyn FrameSource>, FrameError> {
    Err(FrameError::Unavailable("Camera", "camera"))
}

/// Downscale to fit within `max_edge` (never upscales, keeps aspect ratio)
/// and encode as JPEG.
pub fn encode_thumbnail(frame: &RgbImage, max_edge: u32) -> Result<Vec<u8>, image::ImageError> {
    let mut image = DynamicImage::ImageRgb8(frame.clone());
    if image.width() > max_edge || image.height() > max_edge {
        image = image.thumbnail(max_edge, max_edge);
    }
    let mut jpeg = Vec::new();
    image.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    Ok(jpeg)
}

/// Start the sampler thread publishing into `latest`.
pub fn spawn_sampler<F>(
    open: F,
    latest: watch::Sender<LatestFrame>,
    interval: Duration,
    running: RunFlag,
) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() -> Result<Box<dyn FrameSource>, FrameError> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("frame-sampler".into())
        .spawn(move || {
            let mut source = match open() {
                Ok(source) => source,
                Err(e) => {
                    error!("Failed to open video source: {}", e);
                    return;
                }
            };
            info!("Frame sampler started");

            while running.is_running() {
                match source.grab() {
                    Ok(frame) => {
                        latest.send_replace(Some(Arc::new(frame)));
                        thread::sleep(interval);
                    }
                    Err(e) => {
                        warn!("Frame grab failed: {}", e);
                        thread::sleep(GRAB_RETRY_DELAY);
                    }
                }
            }
            info!("Frame sampler stopped");
        })
        .context("spawning frame sampler thread")?;
    Ok(handle)
}

/// Forward the latest frame to the session once per `interval`.
pub async fn run_downsampler(
    latest: watch::Receiver<LatestFrame>,
    outbound: OutboundMultiplexer,
    interval: Duration,
    max_edge: u32,
    running: RunFlag,
) {
    info!("Frame downsampler started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; wait a full interval like every other.
    ticker.tick().await;

    while running.is_running() {
        tokio::select! {
            _ = running.stopped() => break,
            _ = ticker.tick() => {}
        }

        let Some(frame) = latest.borrow().clone() else {
            continue;
        };

        let encoded = tokio::task::spawn_blocking(move || encode_thumbnail(&frame, max_edge)).await;
        match encoded {
            Ok(Ok(jpeg)) => {
                debug!("Sending {} byte thumbnail", jpeg.len());
                if !outbound.push(OutboundFrame::Image(jpeg)).await {
                    break;
                }
            }
            Ok(Err(e)) => warn!("Failed to encode frame: {}", e),
            Err(e) => error!("Frame encoder task failed: {}", e),
        }
    }
    info!("Frame downsampler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    struct SolidSource {
        width: u32,
        height: u32,
    }

    impl FrameSource for SolidSource {
        fn grab(&mut self) -> Result<RgbImage, FrameError> {
            Ok(RgbImage::from_pixel(self.width, self.height, image::Rgb([10, 200, 30])))
        }
    }

    #[test]
    fn test_thumbnail_bounded_and_aspect_kept() {
        let frame = RgbImage::from_pixel(2048, 1024, image::Rgb([0, 0, 0]));
        let jpeg = encode_thumbnail(&frame, 1024).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 512));
    }

    #[test]
    fn test_small_frames_not_upscaled() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([1, 2, 3]));
        let decoded = image::load_from_memory(&encode_thumbnail(&frame, 1024).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (320, 240));
    }

    #[test]
    fn test_rgba_conversion() {
        let rgb = rgb_from_raw(1, 2, vec![1, 2, 3, 255, 4, 5, 6, 255], 4).unwrap();
        assert_eq!(rgb.into_raw(), vec![1, 2, 3, 4, 5, 6]);
        assert!(rgb_from_raw(2, 2, vec![0; 3], 3).is_err());
    }

    #[tokio::test]
    async fn test_sampler_and_downsampler_send_jpeg() {
        let (latest_tx, latest_rx) = watch::channel(None);
        let (mux, mut rx) = OutboundMultiplexer::new(4);
        let running = RunFlag::new();

        let sampler = spawn_sampler(
            || Ok(Box::new(SolidSource { width: 64, height: 48 }) as Box<dyn FrameSource>),
            latest_tx,
            Duration::from_millis(5),
            running.clone(),
        )
        .unwrap();
        let downsampler = tokio::spawn(run_downsampler(
            latest_rx,
            mux,
            Duration::from_millis(20),
            1024,
            running.clone(),
        ));

        match rx.recv().await {
            Some(OutboundFrame::Image(jpeg)) => assert_eq!(&jpeg[..2], &[0xff, 0xd8]),
            other => panic!("unexpected frame {:?}", other),
        }

        running.stop();
        downsampler.await.unwrap();
        tokio::task::spawn_blocking(move || sampler.join().unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_unavailable_backends() {
        if cfg!(not(feature = "capture")) {
            assert!(matches!(open_screen(), Err(FrameError::Unavailable(_, "capture"))));
        }
        if cfg!(not(feature = "camera")) {
            assert!(matches!(open_camera(), Err(FrameError::Unavailable(_, "camera"))));
        }
    }
}
