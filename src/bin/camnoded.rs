//! camnoded - camera node daemon
//!
//! Startup sequence (strict ordering):
//! 1. Load configuration and spawn the connectivity supervisor.
//! 2. Block until connectivity reaches Connected or Provisioned.
//! 3. Acquire the sensor through the init fallback ladder.
//! 4. Optionally load the model; a schema mismatch or read failure disables
//!    the /detect route but not the stream.
//! 5. Register routes and open the HTTP server.
//!
//! A fatal sensor failure leaves the process running degraded (no server)
//! rather than restarting; restart policy belongs to an external watchdog.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use camnode::{
    model_digest, Camera, DetectRoute, HttpServer, InferenceContext, InferenceSettings, NodeConfig,
    Routes, SensorConfig, SensorDriver, SensorSettings, ServerConfig, SingleScoreDecoder,
    StubInterpreter, StubRadio, StubSensor, Supervisor,
};

#[derive(Parser, Debug)]
#[command(name = "camnoded", about = "Camera node daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "CAMNODE_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = NodeConfig::load(args.config.as_deref())?;

    // Connectivity gates everything downstream.
    let (tx, rx) = mpsc::channel();
    let radio = StubRadio::new(tx.clone());
    let connectivity = Supervisor::spawn(Box::new(radio), rx, tx, cfg.wifi.clone())?;
    let state = connectivity.wait_ready(None)?;
    log::info!("connectivity ready: {:?}", state);

    let sensor_config = SensorConfig::new(cfg.sensor.pins, cfg.sensor.xclk_hz, cfg.sensor.jpeg_quality);
    let camera = match build_sensor(&cfg.sensor)
        .and_then(|driver| Camera::acquire(driver, sensor_config, cfg.sensor.resolution))
    {
        Ok(camera) => Arc::new(camera),
        Err(err) => {
            // Degraded but running; the watchdog decides about restarts.
            log::error!("sensor init failed, running degraded without server: {:#}", err);
            wait_for_shutdown()?;
            connectivity.shutdown()?;
            return Ok(());
        }
    };

    let detect = load_detect_route(&cfg.inference);
    let server = HttpServer::new(
        ServerConfig {
            addr: cfg.http_addr.clone(),
        },
        Routes {
            camera: camera.clone(),
            detect,
        },
    )
    .spawn()?;

    wait_for_shutdown()?;
    log::info!("shutting down");
    server.stop()?;
    connectivity.shutdown()?;
    Ok(())
}

/// Select the sensor driver the configuration asks for. This build links no
/// hardware backend, so only the stub is constructible here.
fn build_sensor(settings: &SensorSettings) -> Result<Box<dyn SensorDriver>> {
    if settings.stub {
        Ok(Box::new(StubSensor::new()))
    } else {
        Err(anyhow!("hardware sensor backend is not linked into this build"))
    }
}

/// Load the model and build the /detect route. Any failure here is logged
/// and disables detection; streaming continues.
fn load_detect_route(settings: &InferenceSettings) -> Option<DetectRoute> {
    let path = settings.model_path.as_ref()?;
    let result = (|| -> Result<DetectRoute> {
        let model = std::fs::read(path)
            .with_context(|| format!("read model file {}", path.display()))?;
        log::info!(
            "model {} ({} bytes, sha256 {})",
            path.display(),
            model.len(),
            model_digest(&model)
        );
        let input_len = settings.input_width as usize * settings.input_height as usize;
        let interpreter = StubInterpreter::load(&model, input_len, settings.arena_bytes)?;
        let ctx = InferenceContext::new(
            Box::new(interpreter),
            Box::new(SingleScoreDecoder::default()),
        )?;
        Ok(DetectRoute {
            ctx,
            input_width: settings.input_width,
            input_height: settings.input_height,
        })
    })();
    match result {
        Ok(route) => Some(route),
        Err(err) => {
            log::error!("inference disabled, /detect not registered: {:#}", err);
            None
        }
    }
}

fn wait_for_shutdown() -> Result<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install signal handler")?;
    let _ = rx.recv();
    Ok(())
}
