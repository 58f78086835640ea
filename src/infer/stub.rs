//! Stub inference runtime for host development and tests.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::engine::Interpreter;
use super::preprocess::QuantParams;

/// Flatbuffer file identifier at bytes 4..8 of a TFLite container.
const TFLITE_FILE_IDENTIFIER: &[u8; 4] = b"TFL3";

/// Minimal valid model bytes for the stub runtime, for tests and demos.
pub fn stub_model_bytes() -> Vec<u8> {
    let mut model = vec![0u8; 4];
    model.extend_from_slice(TFLITE_FILE_IDENTIFIER);
    model.extend_from_slice(&[0u8; 24]);
    model
}

/// Interpreter stand-in. Parses just enough of the container to report a
/// schema version, allocates its input slot and arena once at load, and
/// answers every invoke with the mean of the input tensor so the full
/// preprocess -> quantize -> invoke -> decode path is exercised end to end.
pub struct StubInterpreter {
    schema_version: u32,
    input: Vec<i8>,
    output: Vec<i8>,
    arena_bytes: usize,
    input_params: QuantParams,
    output_params: QuantParams,
    fail_invokes: u32,
    invocations: Arc<AtomicU64>,
}

impl StubInterpreter {
    /// "Load" a model: size-check the container and read the file identifier.
    /// Schema validation itself happens in `InferenceContext::new`, matching
    /// where the real runtime reports the version.
    pub fn load(model: &[u8], input_len: usize, arena_bytes: usize) -> Result<Self> {
        if model.len() < 8 {
            return Err(anyhow!("model container truncated ({} bytes)", model.len()));
        }
        if arena_bytes == 0 {
            return Err(anyhow!("tensor arena must be non-empty"));
        }
        let schema_version = if &model[4..8] == TFLITE_FILE_IDENTIFIER {
            3
        } else {
            0
        };
        Ok(Self {
            schema_version,
            input: vec![0; input_len],
            output: vec![0; 1],
            arena_bytes,
            input_params: QuantParams {
                scale: 1.0 / 255.0,
                zero_point: -128,
            },
            output_params: QuantParams {
                scale: 1.0 / 256.0,
                zero_point: -128,
            },
            fail_invokes: 0,
            invocations: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Fail the next `n` invocations.
    pub fn fail_invokes(mut self, n: u32) -> Self {
        self.fail_invokes = n;
        self
    }

    /// Shared invocation counter, observable after the interpreter has been
    /// boxed into an `InferenceContext`.
    pub fn invocation_counter(&self) -> Arc<AtomicU64> {
        self.invocations.clone()
    }
}

impl Interpreter for StubInterpreter {
    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn input_quantization(&self) -> QuantParams {
        self.input_params
    }

    fn output_quantization(&self) -> QuantParams {
        self.output_params
    }

    fn input_len(&self) -> usize {
        self.input.len()
    }

    fn arena_bytes(&self) -> usize {
        self.arena_bytes
    }

    fn copy_input(&mut self, tensor: &[i8]) -> Result<()> {
        if tensor.len() != self.input.len() {
            return Err(anyhow!(
                "input slot holds {} elements, got {}",
                self.input.len(),
                tensor.len()
            ));
        }
        self.input.copy_from_slice(tensor);
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.fail_invokes > 0 {
            self.fail_invokes -= 1;
            return Err(anyhow!("stub interpreter invoke scripted to fail"));
        }
        let sum: i64 = self.input.iter().map(|&v| v as i64).sum();
        let mean = if self.input.is_empty() {
            0
        } else {
            sum / self.input.len() as i64
        };
        self.output[0] = mean.clamp(i8::MIN as i64, i8::MAX as i64) as i8;
        Ok(())
    }

    fn output(&self) -> Result<&[i8]> {
        Ok(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_tflite_identifier() {
        let interpreter = StubInterpreter::load(&stub_model_bytes(), 4, 1024).unwrap();
        assert_eq!(interpreter.schema_version(), 3);
    }

    #[test]
    fn unknown_identifier_reports_schema_zero() {
        let interpreter = StubInterpreter::load(b"\0\0\0\0NOPE....", 4, 1024).unwrap();
        assert_eq!(interpreter.schema_version(), 0);
    }

    #[test]
    fn truncated_container_fails_to_load() {
        assert!(StubInterpreter::load(b"TFL", 4, 1024).is_err());
    }

    #[test]
    fn invoke_produces_mean_of_input() {
        let mut interpreter = StubInterpreter::load(&stub_model_bytes(), 4, 1024).unwrap();
        interpreter.copy_input(&[100, 100, 100, 100]).unwrap();
        interpreter.invoke().unwrap();
        assert_eq!(interpreter.output().unwrap(), &[100]);
    }
}
