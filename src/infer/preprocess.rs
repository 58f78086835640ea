//! Frame preprocessing: JPEG decode, nearest-neighbor grayscale downsample,
//! affine int8 quantization.
//!
//! Every step is a pure function of its input, so the whole pipeline is
//! deterministic: the same compressed frame and target dimensions always
//! produce a byte-identical tensor.

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;

/// Affine quantization parameters: `int = round(real / scale) + zero_point`.
///
/// Copied from the model's declared tensor quantization at load time and
/// constant for the process lifetime. Input and output tensors carry their
/// own, distinct pairs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

/// A quantized single-channel input tensor, W*H signed bytes.
///
/// Produced per frame, consumed and discarded by one inference invocation;
/// never retained across requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuantizedTensor {
    data: Vec<i8>,
    width: u32,
    height: u32,
}

impl QuantizedTensor {
    pub fn as_slice(&self) -> &[i8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Decode a compressed frame and produce the model's quantized input tensor.
///
/// Pipeline: JPEG -> interleaved RGB at native dimensions -> for each of the
/// `width * height` output pixels, nearest-neighbor sample the source
/// (`src = floor(dst * src_dim / dst_dim)`), convert the RGB triple to one
/// luminance byte, normalize to [0,1], and quantize with `params`.
///
/// A decode failure (corrupt or truncated frame) is recoverable for that
/// frame only.
pub fn preprocess(
    jpeg: &[u8],
    params: QuantParams,
    width: u32,
    height: u32,
) -> Result<QuantizedTensor> {
    if width == 0 || height == 0 {
        return Err(anyhow!("target tensor dimensions must be non-zero"));
    }
    let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .context("decode jpeg frame")?;
    let rgb = decoded.into_rgb8();
    let (src_w, src_h) = rgb.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(anyhow!("decoded frame has zero dimensions"));
    }

    let mut data = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let src_y = (y as u64 * src_h as u64 / height as u64) as u32;
        for x in 0..width {
            let src_x = (x as u64 * src_w as u64 / width as u64) as u32;
            let pixel = rgb.get_pixel(src_x, src_y);
            let gray = luminance(pixel[0], pixel[1], pixel[2]);
            data.push(quantize(gray, params));
        }
    }

    Ok(QuantizedTensor {
        data,
        width,
        height,
    })
}

/// ITU-R BT.601 luma weights.
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299f32 * r as f32 + 0.587f32 * g as f32 + 0.114f32 * b as f32) as u8
}

/// Quantize one luminance byte: normalize to [0,1], then
/// `round(norm / scale) + zero_point`, clamped to the int8 range (clamped,
/// never wrapped).
pub fn quantize(gray: u8, params: QuantParams) -> i8 {
    let normalized = gray as f32 / 255.0;
    let quantized = (normalized / params.scale).round() as i32 + params.zero_point;
    quantized.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}
