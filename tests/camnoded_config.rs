use std::sync::Mutex;

use tempfile::NamedTempFile;

use camnode::camera::Resolution;
use camnode::config::NodeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMNODE_CONFIG",
        "CAMNODE_HTTP_ADDR",
        "CAMNODE_WIFI_SSID",
        "CAMNODE_WIFI_PASSWORD",
        "CAMNODE_RESOLUTION",
        "CAMNODE_JPEG_QUALITY",
        "CAMNODE_SENSOR",
        "CAMNODE_MODEL_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "http_addr": "0.0.0.0:9090",
        "sensor": {
            "resolution": "vga",
            "jpeg_quality": 20,
            "stub": false
        },
        "wifi": {
            "ssid": "lab-net",
            "password": "hunter2",
            "max_retry": 3,
            "provisioning_ap": "PROV_LAB"
        },
        "inference": {
            "model_path": "/models/road.tflite",
            "input_width": 96,
            "input_height": 96,
            "arena_bytes": 131072
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CAMNODE_CONFIG", file.path());
    std::env::set_var("CAMNODE_WIFI_SSID", "env-net");
    std::env::set_var("CAMNODE_JPEG_QUALITY", "30");

    let cfg = NodeConfig::load(None).expect("load config");
    assert_eq!(cfg.http_addr, "0.0.0.0:9090");
    assert_eq!(cfg.sensor.resolution, Resolution::Vga);
    // Env wins over file.
    assert_eq!(cfg.sensor.jpeg_quality, 30);
    assert!(!cfg.sensor.stub);
    assert_eq!(cfg.wifi.ssid, "env-net");
    assert_eq!(cfg.wifi.password, "hunter2");
    assert_eq!(cfg.wifi.max_retry, 3);
    assert_eq!(cfg.wifi.provisioning_ap, "PROV_LAB");
    assert_eq!(
        cfg.inference.model_path.as_deref(),
        Some(std::path::Path::new("/models/road.tflite"))
    );
    assert_eq!(cfg.inference.input_width, 96);
    assert_eq!(cfg.inference.arena_bytes, 131072);

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = NodeConfig::load(None).expect("load defaults");
    assert_eq!(cfg.http_addr, "0.0.0.0:8080");
    assert_eq!(cfg.sensor.resolution, Resolution::Qvga);
    assert_eq!(cfg.sensor.jpeg_quality, 12);
    assert_eq!(cfg.wifi.max_retry, 5);
    assert_eq!(cfg.wifi.provisioning_ap, "PROV_ESP32");
    assert!(cfg.sensor.stub);
    assert!(cfg.inference.model_path.is_none());
}

#[test]
fn sensor_backend_env_selects_hardware() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMNODE_SENSOR", "hardware");
    let cfg = NodeConfig::load(None).expect("load config");
    assert!(!cfg.sensor.stub);
    clear_env();
}

#[test]
fn rejects_unknown_sensor_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMNODE_SENSOR", "imaginary");
    let result = NodeConfig::load(None);
    assert!(result.is_err());
    clear_env();
}

#[test]
fn rejects_invalid_jpeg_quality() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMNODE_JPEG_QUALITY", "80");
    let result = NodeConfig::load(None);
    assert!(result.is_err());
    clear_env();
}

#[test]
fn rejects_zero_retry_budget() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{"wifi": {"max_retry": 0}}"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("CAMNODE_CONFIG", file.path());

    let result = NodeConfig::load(None);
    assert!(result.is_err());
    clear_env();
}
