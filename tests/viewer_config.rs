use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use frame_viewer::config::{ConfigError, StartupOptions, ViewerConfig};
use frame_viewer::reconstruct::ChannelOrder;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAME_VIEWER_CONFIG",
        "FRAME_VIEWER_IDLE_THRESHOLD_MS",
        "FRAME_VIEWER_POLL_INTERVAL_US",
        "FRAME_VIEWER_QUEUE_WARN_THRESHOLD",
        "FRAME_VIEWER_CHANNEL_ORDER",
        "FRAME_VIEWER_MAX_PACKET_SIZE",
    ] {
        std::env::remove_var(key);
    }
}

fn options() -> StartupOptions {
    StartupOptions {
        broker_addr: "broker.local".to_string(),
        broker_port: 1883,
        topic: "camera/front/raw".to_string(),
        ..StartupOptions::default()
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "liveness": {
            "idle_threshold_ms": 2000,
            "poll_interval_us": 250
        },
        "queue": {
            "warn_threshold": 500
        },
        "channel_order": "identity"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FRAME_VIEWER_CONFIG", file.path());
    std::env::set_var("FRAME_VIEWER_IDLE_THRESHOLD_MS", "1500");
    std::env::set_var("FRAME_VIEWER_CHANNEL_ORDER", "reversed");

    let out_dir = tempfile::tempdir().expect("output dir");
    let cfg = ViewerConfig::load(StartupOptions {
        output_dir: Some(out_dir.path().to_path_buf()),
        ..options()
    })
    .expect("load config");

    assert_eq!(cfg.broker.endpoint.host, "broker.local");
    assert_eq!(cfg.broker.endpoint.port, 1883);
    assert!(!cfg.broker.endpoint.use_tls);
    assert_eq!(cfg.broker.topic, "camera/front/raw");
    assert_eq!(cfg.output_dir.as_deref(), Some(out_dir.path()));
    assert_eq!(cfg.liveness.idle_threshold, Duration::from_millis(1500));
    assert_eq!(cfg.liveness.poll_interval, Duration::from_micros(250));
    assert_eq!(cfg.queue_warn_threshold, 500);
    assert_eq!(cfg.channel_order, ChannelOrder::Reversed);

    clear_env();
}

#[test]
fn invalid_env_value_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAME_VIEWER_POLL_INTERVAL_US", "fast");
    let err = ViewerConfig::load(options()).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidEnv {
            var: "FRAME_VIEWER_POLL_INTERVAL_US",
            ..
        }
    ));

    clear_env();
}

#[test]
fn max_packet_size_comes_from_file_then_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "mqtt": { "max_packet_size": 1048576 } }"#)
        .expect("write config");
    std::env::set_var("FRAME_VIEWER_CONFIG", file.path());
    let cfg = ViewerConfig::load(options()).expect("load config");
    assert_eq!(cfg.broker.max_packet_size, 1024 * 1024);

    std::env::set_var("FRAME_VIEWER_MAX_PACKET_SIZE", "16777216");
    let cfg = ViewerConfig::load(options()).expect("load config");
    assert_eq!(cfg.broker.max_packet_size, 16 * 1024 * 1024);

    std::env::set_var("FRAME_VIEWER_MAX_PACKET_SIZE", "0");
    let err = ViewerConfig::load(options()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    clear_env();
}

#[test]
fn missing_config_file_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("FRAME_VIEWER_CONFIG", dir.path().join("absent.json"));
    let err = ViewerConfig::load(options()).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));

    clear_env();
}

#[test]
fn malformed_config_file_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("FRAME_VIEWER_CONFIG", file.path());
    let err = ViewerConfig::load(options()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));

    clear_env();
}

#[test]
fn mqtts_address_enables_tls() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ViewerConfig::load(StartupOptions {
        broker_addr: "mqtts://broker.local".to_string(),
        broker_port: 8883,
        ..options()
    })
    .expect("load config");
    assert!(cfg.broker.endpoint.use_tls);
    assert_eq!(cfg.broker.endpoint.host, "broker.local");
}

#[test]
fn tls_key_without_cert_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let key = NamedTempFile::new().expect("temp key");
    let err = ViewerConfig::load(StartupOptions {
        use_tls: true,
        tls_client_key_path: Some(key.path().to_path_buf()),
        ..options()
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::Broker(_)));
}
