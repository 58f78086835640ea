use anyhow::{anyhow, Context, Result};
use std::sync::Mutex;

use super::{CaptureError, DriverFrame, Resolution, SensorConfig, SensorDriver};

/// An initialized camera.
///
/// Owns the driver behind a mutex so concurrent HTTP handlers can each run
/// their own capture call; a frame buffer still has exactly one borrower at a
/// time because the buffer travels inside the returned `Frame` guard.
pub struct Camera {
    driver: Mutex<Box<dyn SensorDriver>>,
    active: SensorConfig,
}

impl Camera {
    /// Initialize the sensor, falling back through cheaper configurations.
    ///
    /// Buffer count is selected from available fast memory (2 buffers when
    /// present, else 1). Attempts, in strict order until one succeeds:
    ///
    /// 1. requested resolution, computed buffer count
    /// 2. requested resolution, 1 buffer
    /// 3. minimum supported resolution, 1 buffer
    ///
    /// Each attempt is a full driver re-initialization; the driver is
    /// deinitialized after a failure so the next attempt starts clean. The
    /// first success applies the fixed mounting corrections (vflip on,
    /// hmirror off). Exhausting the ladder is fatal: the caller must not
    /// start the server.
    pub fn acquire(
        mut driver: Box<dyn SensorDriver>,
        mut config: SensorConfig,
        preferred: Resolution,
    ) -> Result<Self> {
        let fast_memory = driver.fast_memory_bytes();
        let preferred_buffers: u8 = if fast_memory > 0 { 2 } else { 1 };
        log::info!(
            "fast memory: {} KB, preferred frame buffers: {}",
            fast_memory / 1024,
            preferred_buffers
        );

        let attempts = [
            (preferred, preferred_buffers),
            (preferred, 1),
            (Resolution::min_supported(), 1),
        ];

        for (resolution, frame_buffers) in attempts {
            config.resolution = resolution;
            config.frame_buffers = frame_buffers;
            log::info!(
                "sensor init attempt: {:?} with {} buffer(s)",
                resolution,
                frame_buffers
            );
            match driver.init(&config) {
                Ok(()) => {
                    driver.set_vflip(true).context("apply vertical flip")?;
                    driver.set_hmirror(false).context("clear horizontal mirror")?;
                    log::info!("sensor initialized at {:?}", resolution);
                    return Ok(Self {
                        driver: Mutex::new(driver),
                        active: config,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "sensor init failed at {:?} with {} buffer(s): {:#}",
                        resolution,
                        frame_buffers,
                        err
                    );
                    driver.deinit();
                }
            }
        }

        Err(anyhow!("sensor init failed after all fallback attempts"))
    }

    /// The configuration the sensor actually initialized with.
    pub fn active_config(&self) -> SensorConfig {
        self.active
    }

    /// Capture the next compressed frame.
    ///
    /// The returned guard gives the buffer back to the driver when dropped,
    /// on every exit path.
    pub fn capture(&self) -> Result<Frame<'_>, CaptureError> {
        let mut driver = self
            .driver
            .lock()
            .map_err(|_| CaptureError::Fault("driver lock poisoned".to_string()))?;
        let raw = driver.capture()?;
        Ok(Frame {
            camera: self,
            raw: Some(raw),
        })
    }
}

/// Scoped ownership of one driver frame buffer.
pub struct Frame<'a> {
    camera: &'a Camera,
    raw: Option<DriverFrame>,
}

impl Frame<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.raw.as_ref().map(DriverFrame::bytes).unwrap_or(&[])
    }

    pub fn width(&self) -> u32 {
        self.raw.as_ref().map(DriverFrame::width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.raw.as_ref().map(DriverFrame::height).unwrap_or(0)
    }
}

impl AsRef<[u8]> for Frame<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            if let Ok(mut driver) = self.camera.driver.lock() {
                driver.release(raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{PinMap, StubSensor};

    fn base_config() -> SensorConfig {
        SensorConfig::new(PinMap::default(), 20_000_000, 12)
    }

    #[test]
    fn prefers_two_buffers_with_fast_memory() {
        let driver = StubSensor::new().with_fast_memory(4 * 1024 * 1024);
        let camera = Camera::acquire(Box::new(driver), base_config(), Resolution::Qvga).unwrap();
        let active = camera.active_config();
        assert_eq!(active.resolution, Resolution::Qvga);
        assert_eq!(active.frame_buffers, 2);
    }

    #[test]
    fn never_two_buffers_without_fast_memory() {
        let driver = StubSensor::new().with_fast_memory(0);
        let camera = Camera::acquire(Box::new(driver), base_config(), Resolution::Qvga).unwrap();
        assert_eq!(camera.active_config().frame_buffers, 1);
    }

    #[test]
    fn falls_back_to_minimum_resolution() {
        let driver = StubSensor::new()
            .with_fast_memory(4 * 1024 * 1024)
            .fail_first_inits(2);
        let camera = Camera::acquire(Box::new(driver), base_config(), Resolution::Qvga).unwrap();
        let active = camera.active_config();
        assert_eq!(active.resolution, Resolution::Qqvga);
        assert_eq!(active.frame_buffers, 1);
    }

    #[test]
    fn exhausted_ladder_is_fatal() {
        let driver = StubSensor::new().fail_first_inits(3);
        let result = Camera::acquire(Box::new(driver), base_config(), Resolution::Qvga);
        assert!(result.is_err());
    }

    #[test]
    fn failed_attempt_deinitializes_before_retry() {
        let driver = StubSensor::new().fail_first_inits(1);
        let counters = driver.counters();
        Camera::acquire(Box::new(driver), base_config(), Resolution::Qvga).unwrap();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.init_calls, 2);
        assert_eq!(snapshot.deinit_calls, 1);
    }

    #[test]
    fn mounting_corrections_applied_after_init() {
        let driver = StubSensor::new();
        let counters = driver.counters();
        Camera::acquire(Box::new(driver), base_config(), Resolution::Qvga).unwrap();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.vflip, Some(true));
        assert_eq!(snapshot.hmirror, Some(false));
    }

    #[test]
    fn frame_guard_releases_on_drop() {
        let driver = StubSensor::new();
        let counters = driver.counters();
        let camera = Camera::acquire(Box::new(driver), base_config(), Resolution::Qqvga).unwrap();

        {
            let frame = camera.capture().unwrap();
            assert!(!frame.bytes().is_empty());
            let snapshot = counters.snapshot();
            assert_eq!(snapshot.captures, 1);
            assert_eq!(snapshot.releases, 0);
        }

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.captures, 1);
        assert_eq!(snapshot.releases, 1);
    }

    #[test]
    fn transient_capture_miss_releases_nothing() {
        let driver = StubSensor::new().fail_captures(2);
        let counters = driver.counters();
        let camera = Camera::acquire(Box::new(driver), base_config(), Resolution::Qqvga).unwrap();

        for _ in 0..2 {
            match camera.capture() {
                Err(CaptureError::NoBuffer) => {}
                other => panic!("expected transient miss, got {:?}", other.map(|_| ())),
            }
        }
        let frame = camera.capture().unwrap();
        drop(frame);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.captures, 1);
        assert_eq!(snapshot.releases, 1);
    }
}
