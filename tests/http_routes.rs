use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use camnode::camera::{Camera, Counters, PinMap, Resolution, SensorConfig, StubSensor};
use camnode::http::{DetectRoute, HttpServer, Routes, ServerConfig, ServerHandle};
use camnode::infer::{stub_model_bytes, InferenceContext, SingleScoreDecoder, StubInterpreter};

const INPUT_SIDE: u32 = 32;

fn base_config() -> SensorConfig {
    SensorConfig::new(PinMap::default(), 20_000_000, 12)
}

fn spawn_server(sensor: StubSensor, detect: Option<DetectRoute>) -> (ServerHandle, Counters) {
    let counters = sensor.counters();
    let camera = Camera::acquire(Box::new(sensor), base_config(), Resolution::Qqvga)
        .expect("stub sensor init");
    let server = HttpServer::new(
        ServerConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        Routes {
            camera: Arc::new(camera),
            detect,
        },
    )
    .spawn()
    .expect("spawn server");
    (server, counters)
}

fn detect_route(interpreter: StubInterpreter) -> DetectRoute {
    let ctx = InferenceContext::new(
        Box::new(interpreter),
        Box::new(SingleScoreDecoder::default()),
    )
    .expect("schema-valid model");
    DetectRoute {
        ctx,
        input_width: INPUT_SIDE,
        input_height: INPUT_SIDE,
    }
}

fn get(addr: std::net::SocketAddr, path: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path)?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

#[test]
fn index_page_embeds_the_stream() {
    let (server, _) = spawn_server(StubSensor::new(), None);
    let (headers, body) = get(server.addr, "/").unwrap();
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(body.contains("src=\"/stream\""));
    server.stop().unwrap();
}

#[test]
fn unknown_path_is_404() {
    let (server, _) = spawn_server(StubSensor::new(), None);
    let (headers, _) = get(server.addr, "/nope").unwrap();
    assert!(headers.starts_with("HTTP/1.1 404"));
    server.stop().unwrap();
}

#[test]
fn stream_emits_multipart_parts() {
    let (server, counters) = spawn_server(StubSensor::new(), None);

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "GET /stream HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();

    // Read until two part boundaries have arrived, then hang up.
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    while count_boundaries(&collected) < 2 {
        let n = stream.read(&mut buf).expect("stream read");
        assert!(n > 0, "stream ended early");
        collected.extend_from_slice(&buf[..n]);
        assert!(collected.len() < 4 * 1024 * 1024, "never saw two parts");
    }
    drop(stream);

    let text = String::from_utf8_lossy(&collected);
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("Content-Type: image/jpeg"));
    assert!(text.contains("Content-Length: "));

    server.stop().unwrap();
    // Every successful capture gets handed back to the driver; give the
    // detached handler thread a moment to observe the cancel token.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = counters.snapshot();
        if snapshot.outstanding == 0 && snapshot.captures == snapshot.releases {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "frame buffer leak: {:?}",
            snapshot
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn count_boundaries(data: &[u8]) -> usize {
    data.windows(b"--frame".len())
        .filter(|w| *w == b"--frame")
        .count()
}

#[test]
fn detect_reports_a_confidence() {
    let interpreter =
        StubInterpreter::load(&stub_model_bytes(), (INPUT_SIDE * INPUT_SIDE) as usize, 1024)
            .unwrap();
    let (server, _) = spawn_server(StubSensor::new(), Some(detect_route(interpreter)));
    let (headers, body) = get(server.addr, "/detect").unwrap();
    assert!(headers.starts_with("HTTP/1.1 200"), "headers: {}", headers);
    assert!(headers.contains("application/json"));
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(parsed["road_detected"].is_boolean());
    assert!(parsed["confidence"].is_number());
    server.stop().unwrap();
}

#[test]
fn detect_decode_failure_is_500_and_skips_the_interpreter() {
    let interpreter =
        StubInterpreter::load(&stub_model_bytes(), (INPUT_SIDE * INPUT_SIDE) as usize, 1024)
            .unwrap();
    let invocations: Arc<AtomicU64> = interpreter.invocation_counter();
    let sensor = StubSensor::new().emit_corrupt_frames(true);
    let (server, counters) = spawn_server(sensor, Some(detect_route(interpreter)));

    let (headers, _) = get(server.addr, "/detect").unwrap();
    assert!(headers.starts_with("HTTP/1.1 500"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    server.stop().unwrap();
    // The failed request still returned its frame buffer.
    let snapshot = counters.snapshot();
    assert_eq!(snapshot.outstanding, 0);
}

#[test]
fn detect_invoke_failure_is_500() {
    let interpreter =
        StubInterpreter::load(&stub_model_bytes(), (INPUT_SIDE * INPUT_SIDE) as usize, 1024)
            .unwrap()
            .fail_invokes(1);
    let (server, _) = spawn_server(StubSensor::new(), Some(detect_route(interpreter)));
    let (headers, _) = get(server.addr, "/detect").unwrap();
    assert!(headers.starts_with("HTTP/1.1 500"));
    server.stop().unwrap();
}

#[test]
fn schema_mismatch_leaves_detect_unregistered() {
    // A model without the TFL3 identifier fails context construction; the
    // daemon then registers no /detect route, so the path 404s.
    let interpreter = StubInterpreter::load(b"\0\0\0\0BAD!....", 16, 1024).unwrap();
    let context = InferenceContext::new(
        Box::new(interpreter),
        Box::new(SingleScoreDecoder::default()),
    );
    assert!(context.is_err());

    let (server, _) = spawn_server(StubSensor::new(), None);
    let (headers, _) = get(server.addr, "/detect").unwrap();
    assert!(headers.starts_with("HTTP/1.1 404"));
    server.stop().unwrap();
}

#[test]
fn non_get_methods_are_rejected() {
    let (server, _) = spawn_server(StubSensor::new(), None);
    let mut stream = TcpStream::connect(server.addr).unwrap();
    write!(stream, "POST / HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();
    let mut response = String::new();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 405"));
    server.stop().unwrap();
}
