//! Output tensor decoding.
//!
//! The mapping from the raw output tensor layout to a detection is
//! model-specific, so it lives behind a trait rather than in the invocation
//! path. Dequantization always uses the OUTPUT tensor's own scale and
//! zero-point, which are distinct from the input's.

use anyhow::{anyhow, Result};

use super::preprocess::QuantParams;

/// Final detection result for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub road_detected: bool,
    pub confidence: f32,
}

/// Model-specific decoder from raw int8 output to a `Detection`.
pub trait OutputDecoder: Send + Sync {
    fn decode(&self, output: &[i8], params: QuantParams) -> Result<Detection>;
}

/// Decoder for models whose designated confidence output is a single element:
/// dequantize it once and threshold it.
#[derive(Clone, Copy, Debug)]
pub struct SingleScoreDecoder {
    /// Index of the designated confidence element in the output tensor.
    pub index: usize,
    /// Dequantized confidence at or above this reports a detection.
    pub threshold: f32,
}

impl Default for SingleScoreDecoder {
    fn default() -> Self {
        Self {
            index: 0,
            threshold: 0.5,
        }
    }
}

impl OutputDecoder for SingleScoreDecoder {
    fn decode(&self, output: &[i8], params: QuantParams) -> Result<Detection> {
        let raw = *output.get(self.index).ok_or_else(|| {
            anyhow!(
                "output tensor has {} elements, confidence index is {}",
                output.len(),
                self.index
            )
        })?;
        let confidence = (raw as i32 - params.zero_point) as f32 * params.scale;
        Ok(Detection {
            road_detected: confidence >= self.threshold,
            confidence,
        })
    }
}
