use crate::config::CameraConfig;
use image::{ImageBuffer, RgbImage};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as V4lCapture;
use v4l::{Device, FourCC};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open camera device {device}: {reason}")]
    DeviceOpen { device: String, reason: String },
    #[error("Failed to read frame: {0}")]
    Read(String),
    #[error("Frame conversion failed: {0}")]
    Conversion(String),
    #[error("Camera initialization did not complete")]
    InitAborted,
}

/// Anything that yields a stream of RGB frames
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// V4L2 webcam. The device is closed when the camera is dropped.
pub struct Camera {
    device: Device,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let open_err = |reason: String| CaptureError::DeviceOpen {
            device: config.device.clone(),
            reason,
        };

        let index = device_index(&config.device);
        let device = Device::new(index).map_err(|e| open_err(e.to_string()))?;

        let mut format = device.format().map_err(|e| open_err(e.to_string()))?;
        format.width = config.width;
        format.height = config.height;

        // MJPEG keeps USB bandwidth down; YUYV is the universal fallback
        for fourcc in [FourCC::new(b"MJPG"), FourCC::new(b"YUYV")] {
            format.fourcc = fourcc;
            if device.set_format(&format).is_ok() {
                break;
            }
        }

        let actual = device.format().map_err(|e| open_err(e.to_string()))?;
        log::info!(
            "Camera {} ready: {}x{} {}",
            config.device,
            actual.width,
            actual.height,
            actual.fourcc
        );

        Ok(Self {
            device,
            width: actual.width,
            height: actual.height,
            format: actual.fourcc,
        })
    }

    fn decode(&self, buf: &[u8]) -> Result<RgbImage, CaptureError> {
        match self.format.str() {
            Ok("MJPG") => image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map(|img| img.to_rgb8())
                .map_err(|e| CaptureError::Conversion(format!("MJPEG decode failed: {}", e))),
            Ok("YUYV") => yuyv_to_rgb(buf, self.width, self.height),
            _ => Err(CaptureError::Conversion(format!(
                "Unsupported pixel format: {}",
                self.format
            ))),
        }
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let mut stream = MmapStream::with_buffers(&self.device, v4l::buffer::Type::VideoCapture, 4)
            .map_err(|e| CaptureError::Read(format!("Failed to create stream: {}", e)))?;
        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        self.decode(buf)
    }
}

/// "/dev/video2" and "2" both select device 2
fn device_index(device: &str) -> usize {
    device
        .trim_start_matches("/dev/video")
        .parse::<usize>()
        .unwrap_or(0)
}

/// Convert packed YUYV (Y0 U Y1 V per pixel pair) to RGB
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let (w, h) = (width as usize, height as usize);
    if data.len() < w * h * 2 {
        return Err(CaptureError::Conversion("YUYV buffer too small".to_string()));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for chunk in data[..w * h * 2].chunks_exact(4) {
        let u = chunk[1] as i32 - 128;
        let v = chunk[3] as i32 - 128;
        for luma in [chunk[0] as i32, chunk[2] as i32] {
            rgb.push((luma + ((1436 * v) >> 10)).clamp(0, 255) as u8);
            rgb.push((luma - ((354 * u + 732 * v) >> 10)).clamp(0, 255) as u8);
            rgb.push((luma + ((1814 * u) >> 10)).clamp(0, 255) as u8);
        }
    }

    ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Conversion("Failed to create RGB image".to_string()))
}

/// Work running on a helper thread whose result is handed back to the
/// caller's thread. The worker owns everything it touches.
pub struct BackgroundTask<T> {
    receiver: Receiver<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    pub fn spawn<F>(name: &str, work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let task_name = name.to_string();
        let handle = thread::Builder::new()
            .name(task_name.clone())
            .spawn(move || {
                log::debug!("{}: started", task_name);
                // The receiver may be gone if the caller gave up
                let _ = sender.send(work());
            })
            .ok();

        if handle.is_none() {
            log::warn!("Could not start {} worker", name);
        }

        Self { receiver, handle }
    }

    /// Non-blocking check for the result
    pub fn poll(&mut self) -> Option<Result<T, CaptureError>> {
        match self.receiver.try_recv() {
            Ok(value) => {
                self.join();
                Some(Ok(value))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(Err(CaptureError::InitAborted))
            }
        }
    }

    /// Block until the result arrives, calling `on_tick` every `tick` while waiting
    pub fn wait_with<F: FnMut()>(mut self, tick: Duration, mut on_tick: F) -> Result<T, CaptureError> {
        loop {
            if let Some(result) = self.poll() {
                return result;
            }
            on_tick();
            thread::sleep(tick);
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Background worker panicked");
            }
        }
    }
}

/// Open the camera on a worker thread
pub fn open_in_background(config: &CameraConfig) -> BackgroundTask<Result<Camera, CaptureError>> {
    let config = config.clone();
    BackgroundTask::spawn("camera-init", move || Camera::open(&config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_device_index() {
        assert_eq!(device_index("/dev/video2"), 2);
        assert_eq!(device_index("3"), 3);
        assert_eq!(device_index("webcam"), 0);
    }

    #[test]
    fn test_yuyv_grey() {
        // Neutral chroma: every pixel keeps its luma
        let data = [100u8, 128, 200, 128];
        let rgb = yuyv_to_rgb(&data, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(matches!(
            yuyv_to_rgb(&[0u8; 6], 2, 2),
            Err(CaptureError::Conversion(_))
        ));
    }

    #[test]
    fn test_background_task_delivers_result() {
        let ticks = Cell::new(0);
        let task = BackgroundTask::spawn("test-worker", || {
            thread::sleep(Duration::from_millis(30));
            42
        });
        let value = task
            .wait_with(Duration::from_millis(5), || ticks.set(ticks.get() + 1))
            .unwrap();
        assert_eq!(value, 42);
        assert!(ticks.get() > 0);
    }

    #[test]
    fn test_background_task_panic_is_reported() {
        let task = BackgroundTask::<u32>::spawn("test-panic", || panic!("boom"));
        let result = task.wait_with(Duration::from_millis(5), || {});
        assert!(matches!(result, Err(CaptureError::InitAborted)));
    }

    #[test]
    #[ignore] // Requires actual camera hardware
    fn test_camera_capture() {
        let config = CameraConfig::default();
        let mut camera = open_in_background(&config)
            .wait_with(Duration::from_millis(50), || {})
            .unwrap()
            .expect("Failed to open camera");
        let frame = camera.next_frame().expect("Failed to capture frame");
        assert!(frame.width() > 0);
    }
}
