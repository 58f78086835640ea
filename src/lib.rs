//! Camera node core.
//!
//! This crate implements the portable core of a camera-equipped network node:
//!
//! 1. **Connectivity**: an event-driven station-connect / retry /
//!    provisioning-fallback state machine that gates everything downstream.
//! 2. **Sensor acquisition**: a fallback ladder of sensor configurations that
//!    must succeed under variable fast-memory availability, with scoped frame
//!    ownership (a frame buffer is returned to the driver on every exit path).
//! 3. **Streaming**: long-lived per-connection MJPEG multipart streaming.
//! 4. **Detection**: JPEG decode, nearest-neighbor grayscale downsample,
//!    affine int8 quantization, and a single serialized interpreter invocation
//!    behind a pluggable output decoder.
//!
//! Hardware collaborators (the sensor driver, the radio stack, the inference
//! runtime) are trait seams. The crate ships stub implementations so the whole
//! pipeline runs on a development host and in tests without hardware.
//!
//! # Module Structure
//!
//! - `camera`: driver seam, init fallback ladder, scoped `Frame` guard
//! - `net`: radio events, connectivity state machine, supervisor task
//! - `http`: request parsing, route dispatch, the multipart stream loop
//! - `infer`: preprocessing, quantization, interpreter seam, output decoding
//! - `config`: JSON file + environment configuration

pub mod camera;
pub mod config;
pub mod http;
pub mod infer;
pub mod net;

pub use camera::{
    Camera, CaptureError, DriverFrame, Frame, PinMap, PixelFormat, Resolution, SensorConfig,
    SensorDriver, StubSensor,
};
pub use config::{InferenceSettings, NodeConfig, SensorSettings};
pub use http::{DetectRoute, HttpServer, Routes, ServerConfig, ServerHandle};
pub use infer::{
    model_digest, preprocess, stub_model_bytes, Detection, InferenceContext, Interpreter,
    OutputDecoder, QuantParams, QuantizedTensor, SingleScoreDecoder, StubInterpreter,
    SUPPORTED_SCHEMA_VERSION,
};
pub use net::{
    ConnectivityHandle, ConnectivityState, Machine, RadioCommand, RadioControl, RadioEvent,
    StubRadio, Supervisor, SupervisorMsg, WifiSettings, DEFAULT_MAX_RETRY,
};
