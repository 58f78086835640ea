//! On-device detection pipeline.
//!
//! - `preprocess`: compressed frame -> fixed-size quantized int8 tensor
//! - `engine`: the interpreter seam and the process-wide inference context
//! - `decode`: pluggable mapping from a raw output tensor to a detection
//!
//! The interpreter itself (its op kernels, its memory planner) is an external
//! collaborator behind the `Interpreter` trait; this crate only prepares its
//! input and decodes its output.

mod decode;
mod engine;
mod preprocess;
mod stub;

pub use decode::{Detection, OutputDecoder, SingleScoreDecoder};
pub use engine::{model_digest, InferenceContext, Interpreter, SUPPORTED_SCHEMA_VERSION};
pub use preprocess::{preprocess, quantize, QuantParams, QuantizedTensor};
pub use stub::{stub_model_bytes, StubInterpreter};
