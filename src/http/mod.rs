//! HTTP surface: `/` (viewer page), `/stream` (multipart MJPEG), and
//! `/detect` (one-shot detection, present only when a model loaded).
//!
//! The server is deliberately small: a nonblocking accept loop on a
//! `TcpListener`, one thread per connection running its handler to
//! completion, and a shared shutdown flag that doubles as the cancellation
//! token every stream loop checks at its iteration boundary.

pub mod stream;

pub use stream::{run_stream_loop, FrameSource};

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::camera::Camera;
use crate::infer::{preprocess, InferenceContext};

const MAX_REQUEST_BYTES: usize = 8192;

const INDEX_PAGE: &str = "<html><body>\
<h2>Camera Node Stream</h2>\
<img src=\"/stream\">\
</body></html>";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Detection route state: the loaded inference context plus the model's input
/// geometry.
pub struct DetectRoute {
    pub ctx: InferenceContext,
    pub input_width: u32,
    pub input_height: u32,
}

/// Registered routes. Registration order is a strict precondition upstream:
/// a `Routes` value can only be built from an acquired `Camera`, which in
/// turn only exists after connectivity reached a terminal state. `detect` is
/// `None` whenever inference is disabled or the model failed to load.
pub struct Routes {
    pub camera: Arc<Camera>,
    pub detect: Option<DetectRoute>,
}

pub struct HttpServer {
    cfg: ServerConfig,
    routes: Routes,
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The shared cancellation token; stream loops observe it per iteration.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("http server thread panicked"))?;
        }
        Ok(())
    }
}

impl HttpServer {
    pub fn new(cfg: ServerConfig, routes: Routes) -> Self {
        Self { cfg, routes }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let routes = Arc::new(self.routes);

        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, routes, shutdown_thread) {
                log::error!("http server stopped: {:#}", err);
            }
        });

        log::info!("http server listening on {}", addr);
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    routes: Arc<Routes>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let routes = routes.clone();
                let cancel = shutdown.clone();
                // One thread per connection; stream handlers run for the life
                // of the connection.
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &routes, &cancel) {
                        log::debug!("connection from {} ended: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    routes: &Routes,
    cancel: &AtomicBool,
) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_response(
            &mut stream,
            405,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }

    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html", INDEX_PAGE.as_bytes()),
        "/stream" => handle_stream(stream, routes, cancel),
        "/detect" => match &routes.detect {
            Some(route) => handle_detect(&mut stream, routes, route),
            None => write_response(
                &mut stream,
                404,
                "application/json",
                br#"{"error":"not_found"}"#,
            ),
        },
        _ => write_response(
            &mut stream,
            404,
            "application/json",
            br#"{"error":"not_found"}"#,
        ),
    }
}

fn handle_stream(mut stream: TcpStream, routes: &Routes, cancel: &AtomicBool) -> Result<()> {
    // Streaming reads nothing further from the peer.
    stream.set_read_timeout(None)?;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\n\r\n",
        stream::STREAM_CONTENT_TYPE
    );
    stream.write_all(head.as_bytes())?;
    run_stream_loop(&mut stream, &routes.camera.as_ref(), cancel)
}

fn handle_detect(stream: &mut TcpStream, routes: &Routes, route: &DetectRoute) -> Result<()> {
    // Capture and preprocess inside a scope so the frame buffer is back with
    // the driver before the interpreter runs.
    let tensor = {
        let frame = match routes.camera.capture() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("detect: capture failed: {}", err);
                return write_error_500(stream);
            }
        };
        match preprocess(
            frame.bytes(),
            route.ctx.input_quantization(),
            route.input_width,
            route.input_height,
        ) {
            Ok(tensor) => tensor,
            Err(err) => {
                log::warn!("detect: preprocess failed: {:#}", err);
                return write_error_500(stream);
            }
        }
    };

    match route.ctx.infer(&tensor) {
        Ok(detection) => {
            let body = format!(
                "{{\"road_detected\": {}, \"confidence\": {:.2}}}",
                detection.road_detected, detection.confidence
            );
            write_response(stream, 200, "application/json", body.as_bytes())
        }
        Err(err) => {
            log::warn!("detect: inference failed: {:#}", err);
            write_error_500(stream)
        }
    }
}

fn write_error_500(stream: &mut TcpStream) -> Result<()> {
    write_response(
        stream,
        500,
        "application/json",
        br#"{"error":"internal"}"#,
    )
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
