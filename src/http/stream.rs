//! The multipart frame stream.
//!
//! One long-lived loop per connection: pull a frame, write it as one part of
//! a `multipart/x-mixed-replace` body, release the frame, pace, repeat. The
//! loop body is written over `io::Write` and a `FrameSource` seam so it runs
//! against a plain buffer in tests.

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::camera::{Camera, CaptureError, Frame};

pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
const PART_BOUNDARY: &[u8] = b"\r\n--frame\r\n";

/// Transient capture misses back off this long before retrying.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Inter-frame pacing, capping throughput near 20 frames per second to bound
/// CPU and network use.
const FRAME_INTERVAL: Duration = Duration::from_millis(50);

/// Where the stream loop gets its frames. The returned frame type releases
/// its underlying buffer on drop.
pub trait FrameSource {
    type Frame: AsRef<[u8]>;

    fn capture(&self) -> Result<Self::Frame, CaptureError>;
}

impl<'a> FrameSource for &'a Camera {
    type Frame = Frame<'a>;

    fn capture(&self) -> Result<Self::Frame, CaptureError> {
        Camera::capture(*self)
    }
}

/// Run the stream loop until the connection dies or `cancel` trips.
///
/// Each iteration: capture (transient miss -> delay and retry; hard fault ->
/// unwind), write the part boundary, a header with the exact byte length,
/// and the compressed bytes, then release the frame (guard drop) and pace.
/// A write failure is the normal exit: it means the client closed the
/// connection. Any held frame is released on unwind by its guard.
pub fn run_stream_loop<W, S>(out: &mut W, source: &S, cancel: &AtomicBool) -> Result<()>
where
    W: Write,
    S: FrameSource,
{
    while !cancel.load(Ordering::Relaxed) {
        let frame = match source.capture() {
            Ok(frame) => frame,
            Err(err) if err.is_transient() => {
                log::warn!("camera capture missed a frame, retrying");
                std::thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            }
            Err(err) => return Err(err).context("camera capture failed"),
        };

        let bytes = frame.as_ref();
        out.write_all(PART_BOUNDARY).context("write part boundary")?;
        let part_header = format!(
            "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            bytes.len()
        );
        out.write_all(part_header.as_bytes())
            .context("write part header")?;
        out.write_all(bytes).context("write frame bytes")?;
        out.flush().context("flush frame part")?;
        drop(frame);

        std::thread::sleep(FRAME_INTERVAL);
    }
    Ok(())
}
