//! Sensor driver seam and acquisition.
//!
//! The image sensor driver is an external collaborator: it accepts a
//! `SensorConfig`, hands out driver-owned frame buffers, and takes them back.
//! This module defines that seam plus the acquisition routine that probes a
//! fallback ladder of configurations until one initializes.
//!
//! Frame buffers have single-owner semantics: `capture` hands out a `Frame`
//! guard that returns the buffer to the driver when dropped, so early error
//! returns cannot leak a buffer.

mod acquire;
mod stub;

pub use acquire::{Camera, Frame};
pub use stub::{CounterSnapshot, Counters, StubSensor};

use anyhow::Result;

/// Camera wiring for the Freenove ESP32-S3 WROOM board.
///
/// Pin assignments are immutable for the life of the process; `-1` means the
/// line is not connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinMap {
    pub pwdn: i32,
    pub reset: i32,
    pub xclk: i32,
    pub sccb_sda: i32,
    pub sccb_scl: i32,
    pub vsync: i32,
    pub href: i32,
    pub pclk: i32,
    pub data: [i32; 8],
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            pwdn: -1,
            reset: -1,
            xclk: 15,
            sccb_sda: 4,
            sccb_scl: 5,
            vsync: 6,
            href: 7,
            pclk: 13,
            // D0..D7
            data: [11, 9, 8, 10, 12, 18, 17, 16],
        }
    }
}

/// Supported resolution classes, smallest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    Qqvga,
    Qvga,
    Vga,
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::Qqvga => (160, 120),
            Resolution::Qvga => (320, 240),
            Resolution::Vga => (640, 480),
        }
    }

    /// The last-resort resolution the init ladder falls back to.
    pub fn min_supported() -> Self {
        Resolution::Qqvga
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "qqvga" => Ok(Resolution::Qqvga),
            "qvga" => Ok(Resolution::Qvga),
            "vga" => Ok(Resolution::Vga),
            other => Err(anyhow::anyhow!("unknown resolution '{}'", other)),
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
    Rgb888,
}

/// Full sensor configuration: immutable wiring plus the mutable working set
/// the init ladder adjusts between attempts.
///
/// The working set (`resolution`, `frame_buffers`) is only ever mutated
/// between driver (re)initializations, never while frames are flowing.
#[derive(Clone, Copy, Debug)]
pub struct SensorConfig {
    pub pins: PinMap,
    pub xclk_hz: u32,
    pub resolution: Resolution,
    pub frame_buffers: u8,
    pub pixel_format: PixelFormat,
    pub jpeg_quality: u8,
}

impl SensorConfig {
    pub fn new(pins: PinMap, xclk_hz: u32, jpeg_quality: u8) -> Self {
        Self {
            pins,
            xclk_hz,
            resolution: Resolution::Qvga,
            frame_buffers: 1,
            pixel_format: PixelFormat::Jpeg,
            jpeg_quality,
        }
    }
}

/// One compressed frame in driver-owned memory.
///
/// Constructed by driver implementations, consumed back by `release`. Callers
/// never hold one directly; they hold a `Frame` guard.
#[derive(Debug)]
pub struct DriverFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl DriverFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Capture failure taxonomy.
///
/// `NoBuffer` is the transient case (momentary bus contention, no frame
/// buffer available right now); callers retry it after a short delay.
/// `Fault` is a hard driver failure.
#[derive(Debug)]
pub enum CaptureError {
    NoBuffer,
    Fault(String),
}

impl CaptureError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::NoBuffer)
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoBuffer => write!(f, "no frame buffer available"),
            CaptureError::Fault(msg) => write!(f, "camera driver fault: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Image sensor driver seam.
///
/// On target this wraps the vendor camera driver; on a development host the
/// crate's `StubSensor` stands in. A failed `init` must leave the driver in a
/// state where the next `init` can still succeed (`Camera::acquire` calls
/// `deinit` between attempts to guarantee that).
pub trait SensorDriver: Send {
    fn init(&mut self, config: &SensorConfig) -> Result<()>;

    fn deinit(&mut self);

    /// Vertical flip control. The board mounts the sensor upside down, so
    /// acquisition always turns this on after init.
    fn set_vflip(&mut self, on: bool) -> Result<()>;

    fn set_hmirror(&mut self, on: bool) -> Result<()>;

    /// Total fast (shared/external) memory available to the driver, in bytes.
    /// Zero means frame buffers must live in scarce internal memory.
    fn fast_memory_bytes(&self) -> usize;

    fn capture(&mut self) -> Result<DriverFrame, CaptureError>;

    fn release(&mut self, frame: DriverFrame);
}
