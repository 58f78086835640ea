//! Interpreter seam and the process-wide inference context.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

use super::decode::{Detection, OutputDecoder};
use super::preprocess::{QuantParams, QuantizedTensor};

/// The flatbuffer schema version this firmware is built against. The model
/// and the firmware image ship together; a mismatch at load time is fatal.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 3;

/// Quantized inference interpreter seam.
///
/// The runtime behind this trait owns the loaded model and a scratch arena
/// allocated once at load time. Implementations are assumed synchronous;
/// exclusive access during copy-input -> invoke -> read-output is the
/// caller's job (`InferenceContext` serializes it).
pub trait Interpreter: Send {
    /// Schema version declared by the loaded model.
    fn schema_version(&self) -> u32;

    /// Quantization of the input tensor, fixed at load time.
    fn input_quantization(&self) -> QuantParams;

    /// Quantization of the output tensor. Distinct from the input's.
    fn output_quantization(&self) -> QuantParams;

    /// Expected input tensor length in elements.
    fn input_len(&self) -> usize;

    /// Scratch arena size in bytes, for logging.
    fn arena_bytes(&self) -> usize;

    fn copy_input(&mut self, tensor: &[i8]) -> Result<()>;

    fn invoke(&mut self) -> Result<()>;

    fn output(&self) -> Result<&[i8]>;
}

/// Process-wide inference state: one interpreter, one decoder, loaded once
/// before the server opens and never reinitialized.
pub struct InferenceContext {
    interpreter: Mutex<Box<dyn Interpreter>>,
    decoder: Box<dyn OutputDecoder>,
    input_params: QuantParams,
    output_params: QuantParams,
}

impl InferenceContext {
    /// Validate the interpreter against the supported schema version and
    /// capture both tensors' quantization parameters.
    pub fn new(
        interpreter: Box<dyn Interpreter>,
        decoder: Box<dyn OutputDecoder>,
    ) -> Result<Self> {
        let schema = interpreter.schema_version();
        if schema != SUPPORTED_SCHEMA_VERSION {
            return Err(anyhow!(
                "model schema version {} is incompatible (firmware supports {})",
                schema,
                SUPPORTED_SCHEMA_VERSION
            ));
        }
        let input_params = interpreter.input_quantization();
        let output_params = interpreter.output_quantization();
        log::info!(
            "inference ready: input tensor {} elements, arena {} KB",
            interpreter.input_len(),
            interpreter.arena_bytes() / 1024
        );
        Ok(Self {
            interpreter: Mutex::new(interpreter),
            decoder,
            input_params,
            output_params,
        })
    }

    pub fn input_quantization(&self) -> QuantParams {
        self.input_params
    }

    /// Run one inference: copy the tensor into the interpreter's input slot,
    /// invoke, read the output, decode. The interpreter call sequence holds
    /// an exclusive lock so concurrent requests serialize rather than
    /// interleave.
    pub fn infer(&self, tensor: &QuantizedTensor) -> Result<Detection> {
        let mut interpreter = self
            .interpreter
            .lock()
            .map_err(|_| anyhow!("interpreter lock poisoned"))?;
        if tensor.len() != interpreter.input_len() {
            return Err(anyhow!(
                "input tensor has {} elements, model expects {}",
                tensor.len(),
                interpreter.input_len()
            ));
        }
        interpreter.copy_input(tensor.as_slice())?;
        interpreter.invoke()?;
        let output = interpreter.output()?;
        self.decoder.decode(output, self.output_params)
    }
}

/// Hex SHA-256 of the model bytes, logged at load so a deployment can be tied
/// back to the exact model it runs.
pub fn model_digest(model: &[u8]) -> String {
    let digest = Sha256::digest(model);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::stub::{stub_model_bytes, StubInterpreter};
    use crate::infer::SingleScoreDecoder;

    #[test]
    fn schema_mismatch_is_fatal() {
        let interpreter =
            StubInterpreter::load(b"\0\0\0\0BAD!rest-of-model", 16, 1024).unwrap();
        let result = InferenceContext::new(
            Box::new(interpreter),
            Box::new(SingleScoreDecoder::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn loads_and_infers() {
        let interpreter = StubInterpreter::load(&stub_model_bytes(), 4, 1024).unwrap();
        let ctx = InferenceContext::new(
            Box::new(interpreter),
            Box::new(SingleScoreDecoder::default()),
        )
        .unwrap();

        let params = ctx.input_quantization();
        let jpeg = {
            let image = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
            let mut out = Vec::new();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
                .encode_image(&image)
                .unwrap();
            out
        };
        let tensor = crate::infer::preprocess(&jpeg, params, 2, 2).unwrap();
        let detection = ctx.infer(&tensor).unwrap();
        assert!(detection.confidence >= 0.0);
    }

    #[test]
    fn rejects_wrong_tensor_length() {
        let interpreter = StubInterpreter::load(&stub_model_bytes(), 16, 1024).unwrap();
        let ctx = InferenceContext::new(
            Box::new(interpreter),
            Box::new(SingleScoreDecoder::default()),
        )
        .unwrap();
        let jpeg = {
            let image = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));
            let mut out = Vec::new();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
                .encode_image(&image)
                .unwrap();
            out
        };
        // 2x2 tensor against a model expecting 16 elements
        let tensor = crate::infer::preprocess(&jpeg, ctx.input_quantization(), 2, 2).unwrap();
        assert!(ctx.infer(&tensor).is_err());
    }

    #[test]
    fn model_digest_is_stable_hex() {
        let digest = model_digest(b"model");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, model_digest(b"model"));
    }
}
