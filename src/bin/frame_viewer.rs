//! frame_viewer - Subscribe to a camera frame topic and display the stream.
//!
//! 1. Subscribes to one MQTT topic carrying serialized raw frames
//! 2. Decodes each message and rebuilds an interleaved RGB image
//! 3. Shows it through the viewer sink, optionally saving BMP files
//! 4. Substitutes a placeholder when frames stop arriving
//!
//! Runs until Ctrl-C / SIGTERM.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::sync::Arc;

use frame_viewer::{ShutdownCoordinator, StartupOptions, Viewer, ViewerConfig, ViewerSink};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Display raw camera frames received over MQTT"
)]
struct Args {
    /// MQTT broker address (host, IP, or mqtt:// / mqtts:// URL without port).
    #[arg(short = 'a', long, env = "MQTT_BROKER_ADDR")]
    broker_addr: String,

    /// MQTT broker port.
    #[arg(short = 'p', long, env = "MQTT_BROKER_PORT")]
    broker_port: u16,

    /// Topic carrying serialized frames.
    #[arg(short = 't', long, env = "FRAME_VIEWER_TOPIC")]
    topic: String,

    /// Existing directory to save every displayed frame into.
    #[arg(short = 'o', long, env = "FRAME_VIEWER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// MQTT client identifier. Defaults to frame_viewer-<random>.
    #[arg(long, env = "MQTT_CLIENT_ID")]
    mqtt_client_id: Option<String>,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts://).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,
}

impl From<Args> for StartupOptions {
    fn from(args: Args) -> Self {
        StartupOptions {
            broker_addr: args.broker_addr,
            broker_port: args.broker_port,
            topic: args.topic,
            output_dir: args.output_dir,
            client_id: args.mqtt_client_id,
            username: args.mqtt_username,
            password: args.mqtt_password,
            use_tls: args.mqtt_use_tls,
            tls_ca_path: args.mqtt_tls_ca_path,
            tls_client_cert_path: args.mqtt_tls_client_cert_path,
            tls_client_key_path: args.mqtt_tls_client_key_path,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match ViewerConfig::load(args.into()) {
        Ok(config) => config,
        Err(e) => Args::command().error(ErrorKind::ValueValidation, e).exit(),
    };

    log::info!("frame_viewer starting");
    log::info!("  broker: {}", config.broker.endpoint);
    log::info!("  topic: {}", config.broker.topic);
    log::info!("  client id: {}", config.broker.client_id);
    match &config.output_dir {
        Some(dir) => log::info!("  saving frames to: {}", dir.display()),
        None => log::info!("  saving frames: disabled"),
    }
    log::info!(
        "  idle threshold: {:?} (poll {:?})",
        config.liveness.idle_threshold,
        config.liveness.poll_interval
    );
    log::info!("  channel order: {}", config.channel_order);

    let shutdown = Arc::new(ShutdownCoordinator::new());
    shutdown.install_signal_handler()?;

    let sink = Arc::new(ViewerSink::new(config.output_dir.clone()));
    let mut viewer =
        Viewer::start(config, sink, Arc::clone(&shutdown)).context("failed to start viewer")?;

    viewer.wait_for_shutdown();
    let summary = viewer.stop()?;
    log::info!(
        "frame_viewer exiting: {} received, {} displayed, {} saved, {} skipped",
        summary.consumer.received,
        summary.consumer.displayed,
        summary.consumer.saved,
        summary.consumer.decode_failures + summary.consumer.reconstruct_failures
    );
    Ok(())
}
