//! Stub sensor driver for host development and tests.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex};

use super::{CaptureError, DriverFrame, PixelFormat, SensorConfig, SensorDriver};

/// Observable driver activity, shared out of the stub so tests can assert on
/// it after the driver has been boxed into a `Camera`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterSnapshot {
    pub init_calls: u32,
    pub deinit_calls: u32,
    pub captures: u64,
    pub releases: u64,
    pub outstanding: u64,
    pub vflip: Option<bool>,
    pub hmirror: Option<bool>,
}

#[derive(Clone, Default)]
pub struct Counters {
    inner: Arc<Mutex<CounterSnapshot>>,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        *self.inner.lock().expect("counter lock")
    }

    fn update(&self, f: impl FnOnce(&mut CounterSnapshot)) {
        f(&mut self.inner.lock().expect("counter lock"));
    }
}

/// In-memory sensor: synthesizes noise frames and encodes them as JPEG at the
/// configured quality. Failure modes are scriptable so the acquisition ladder
/// and the streaming retry path can be exercised without hardware.
pub struct StubSensor {
    fast_memory: usize,
    fail_inits: u32,
    fail_captures: u32,
    corrupt_frames: bool,
    active: Option<SensorConfig>,
    counters: Counters,
    rng: StdRng,
}

impl StubSensor {
    pub fn new() -> Self {
        Self {
            fast_memory: 8 * 1024 * 1024,
            fail_inits: 0,
            fail_captures: 0,
            corrupt_frames: false,
            active: None,
            counters: Counters::default(),
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    pub fn with_fast_memory(mut self, bytes: usize) -> Self {
        self.fast_memory = bytes;
        self
    }

    /// Fail the next `n` init calls before succeeding.
    pub fn fail_first_inits(mut self, n: u32) -> Self {
        self.fail_inits = n;
        self
    }

    /// Make the next `n` captures miss (transient `NoBuffer`).
    pub fn fail_captures(mut self, n: u32) -> Self {
        self.fail_captures = n;
        self
    }

    /// Emit frames that are not valid JPEG, to exercise decode-failure paths.
    pub fn emit_corrupt_frames(mut self, on: bool) -> Self {
        self.corrupt_frames = on;
        self
    }

    pub fn counters(&self) -> Counters {
        self.counters.clone()
    }

    fn synthesize_jpeg(&mut self, config: &SensorConfig) -> Result<Vec<u8>> {
        let (width, height) = config.resolution.dimensions();
        let image = image::RgbImage::from_fn(width, height, |_, _| {
            image::Rgb([self.rng.gen(), self.rng.gen(), self.rng.gen()])
        });
        let mut out = Vec::new();
        // Driver quality is 1..=63 (lower is better); image wants 1..=100.
        let quality = (100u8.saturating_sub(config.jpeg_quality)).max(1);
        JpegEncoder::new_with_quality(&mut out, quality).encode_image(&image)?;
        Ok(out)
    }
}

impl Default for StubSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for StubSensor {
    fn init(&mut self, config: &SensorConfig) -> Result<()> {
        self.counters.update(|c| c.init_calls += 1);
        if self.fail_inits > 0 {
            self.fail_inits -= 1;
            return Err(anyhow!("stub sensor init scripted to fail"));
        }
        if config.pixel_format != PixelFormat::Jpeg {
            return Err(anyhow!("stub sensor only supports JPEG output"));
        }
        self.active = Some(*config);
        Ok(())
    }

    fn deinit(&mut self) {
        self.counters.update(|c| c.deinit_calls += 1);
        self.active = None;
    }

    fn set_vflip(&mut self, on: bool) -> Result<()> {
        self.counters.update(|c| c.vflip = Some(on));
        Ok(())
    }

    fn set_hmirror(&mut self, on: bool) -> Result<()> {
        self.counters.update(|c| c.hmirror = Some(on));
        Ok(())
    }

    fn fast_memory_bytes(&self) -> usize {
        self.fast_memory
    }

    fn capture(&mut self) -> Result<DriverFrame, CaptureError> {
        let config = match self.active {
            Some(config) => config,
            None => return Err(CaptureError::Fault("sensor not initialized".to_string())),
        };
        if self.fail_captures > 0 {
            self.fail_captures -= 1;
            return Err(CaptureError::NoBuffer);
        }
        let (width, height) = config.resolution.dimensions();
        let data = if self.corrupt_frames {
            vec![0xA5; 64]
        } else {
            self.synthesize_jpeg(&config)
                .map_err(|err| CaptureError::Fault(format!("{:#}", err)))?
        };
        self.counters.update(|c| {
            c.captures += 1;
            c.outstanding += 1;
        });
        Ok(DriverFrame::new(data, width, height))
    }

    fn release(&mut self, frame: DriverFrame) {
        drop(frame);
        self.counters.update(|c| {
            c.releases += 1;
            c.outstanding = c.outstanding.saturating_sub(1);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinMap;

    #[test]
    fn emits_decodable_jpeg() {
        let mut sensor = StubSensor::new();
        let config = SensorConfig::new(PinMap::default(), 20_000_000, 12);
        sensor.init(&config).unwrap();
        let frame = sensor.capture().unwrap();
        let decoded = image::load_from_memory(frame.bytes()).unwrap();
        let (width, height) = config.resolution.dimensions();
        assert_eq!(decoded.width(), width);
        assert_eq!(decoded.height(), height);
        sensor.release(frame);
        assert_eq!(sensor.counters().snapshot().outstanding, 0);
    }

    #[test]
    fn capture_before_init_is_a_fault() {
        let mut sensor = StubSensor::new();
        match sensor.capture() {
            Err(CaptureError::Fault(_)) => {}
            other => panic!("expected fault, got {:?}", other.map(|_| ())),
        }
    }
}
