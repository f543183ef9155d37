//! Live frames from a V4L2 capture device.

use crate::frame::{Frame, PixelFormat};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const PREFERRED_FOURCC: &[u8; 4] = b"YUYV";
const PREFERRED_SIZE: (u32, u32) = (640, 480);
const MMAP_BUFFERS: u32 = 4;
const MAX_PROBED_NODES: u32 = 16;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    Missing(PathBuf),
    #[error("camera {0} is in use by another process")]
    Busy(PathBuf),
    #[error("cannot open camera {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a video capture device")]
    NotCapture(PathBuf),
    #[error("camera format: {0}")]
    Format(String),
    #[error("capture: {0}")]
    Capture(String),
}

/// Anything that hands out grayscale frames one at a time.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// A capture-capable `/dev/video*` node.
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    pub path: PathBuf,
    pub card: String,
    pub driver: String,
    pub bus_info: String,
}

pub struct Camera {
    device: Device,
    width: u32,
    height: u32,
    format: PixelFormat,
}

fn open_device(path: &Path) -> Result<Device, CameraError> {
    if !path.exists() {
        return Err(CameraError::Missing(path.to_path_buf()));
    }
    Device::with_path(path).map_err(|source| match source.raw_os_error() {
        Some(code) if code == EBUSY => CameraError::Busy(path.to_path_buf()),
        _ => CameraError::Open {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Ask for YUYV 640x480 and accept whatever the driver settles on, if it reduces to gray.
fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::Format(format!("query: {e}")))?;
    wanted.fourcc = FourCC::new(PREFERRED_FOURCC);
    (wanted.width, wanted.height) = PREFERRED_SIZE;

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::Format(format!("set: {e}")))?;
    let format = PixelFormat::from_fourcc(&got.fourcc.repr)
        .ok_or_else(|| CameraError::Format(format!("driver chose {:?}; need YUYV, GREY or Y16", got.fourcc)))?;
    Ok((got.width, got.height, format))
}

impl Camera {
    /// Open a capture device such as `/dev/video0`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let device = open_device(path)?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::Capture(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(path.to_path_buf()));
        }

        let (width, height, format) = negotiate(&device)?;
        tracing::info!(
            device = %path.display(),
            card = %caps.card,
            width,
            height,
            format = ?format,
            "camera ready"
        );

        Ok(Self {
            device,
            width,
            height,
            format,
        })
    }

    /// Start streaming. Frames are dequeued from one set of mmap buffers until the feed is dropped.
    pub fn stream(&self) -> Result<LiveFeed<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| CameraError::Capture(format!("mmap stream: {e}")))?;
        Ok(LiveFeed { camera: self, stream })
    }

    /// Capture-capable nodes among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<CaptureDevice> {
        let mut found = Vec::new();
        for index in 0..MAX_PROBED_NODES {
            let path = PathBuf::from(format!("/dev/video{index}"));
            let Ok(device) = open_device(&path) else {
                continue;
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };
            if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                found.push(CaptureDevice {
                    path,
                    card: caps.card,
                    driver: caps.driver,
                    bus_info: caps.bus,
                });
            }
        }
        found
    }
}

/// An open capture stream on a [`Camera`].
pub struct LiveFeed<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl LiveFeed<'_> {
    /// Dequeue one frame and reduce it to 8-bit gray.
    pub fn grab(&mut self) -> Result<Frame, CameraError> {
        let (raw, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::Capture(format!("dequeue: {e}")))?;
        let camera = self.camera;

        let gray = camera
            .format
            .to_grayscale(raw, camera.width, camera.height)
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        Ok(Frame::from_gray(gray, camera.width, camera.height, meta.sequence))
    }

    /// Throw away `count` frames so auto-exposure can settle.
    pub fn warm_up(&mut self, count: usize) {
        for i in 0..count {
            match self.grab() {
                Ok(frame) => tracing::trace!(frame = i, brightness = frame.avg_brightness(), "warm-up frame"),
                Err(e) => tracing::debug!(frame = i, error = %e, "warm-up frame dropped"),
            }
        }
        if count > 0 {
            tracing::debug!(count, "warm-up done");
        }
    }
}

impl FrameSource for LiveFeed<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.grab().map(Some)
    }
}
