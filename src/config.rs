use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::liveness::{LivenessSettings, DEFAULT_IDLE_THRESHOLD, DEFAULT_POLL_INTERVAL};
use crate::queue::DEFAULT_WARN_THRESHOLD;
use crate::reconstruct::ChannelOrder;
use crate::subscription::{
    default_client_id, BrokerSettings, DEFAULT_MAX_PACKET_SIZE, MAX_PACKET_SIZE_LIMIT,
};
use crate::transport::{MqttEndpoint, TlsMaterials};

pub const CONFIG_ENV: &str = "FRAME_VIEWER_CONFIG";
pub const IDLE_THRESHOLD_ENV: &str = "FRAME_VIEWER_IDLE_THRESHOLD_MS";
pub const POLL_INTERVAL_ENV: &str = "FRAME_VIEWER_POLL_INTERVAL_US";
pub const QUEUE_WARN_THRESHOLD_ENV: &str = "FRAME_VIEWER_QUEUE_WARN_THRESHOLD";
pub const CHANNEL_ORDER_ENV: &str = "FRAME_VIEWER_CHANNEL_ORDER";
pub const MAX_PACKET_SIZE_ENV: &str = "FRAME_VIEWER_MAX_PACKET_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{var} has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid broker settings: {0}")]
    Broker(String),
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("output directory {} does not exist or is not a directory", .0.display())]
    OutputDir(PathBuf),
    #[error("{0}")]
    Invalid(String),
}

/// Values taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub broker_addr: String,
    pub broker_port: u16,
    pub topic: String,
    pub output_dir: Option<PathBuf>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ViewerConfigFile {
    mqtt: Option<MqttConfigFile>,
    liveness: Option<LivenessConfigFile>,
    queue: Option<QueueConfigFile>,
    channel_order: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    max_packet_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LivenessConfigFile {
    idle_threshold_ms: Option<u64>,
    poll_interval_us: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QueueConfigFile {
    warn_threshold: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub broker: BrokerSettings,
    /// Where displayed frames are also saved. `None` disables persistence.
    pub output_dir: Option<PathBuf>,
    pub liveness: LivenessSettings,
    pub queue_warn_threshold: usize,
    pub channel_order: ChannelOrder,
}

impl ViewerConfig {
    /// Defaults for everything but the broker.
    pub fn new(broker: BrokerSettings) -> Self {
        Self {
            broker,
            output_dir: None,
            liveness: LivenessSettings::default(),
            queue_warn_threshold: DEFAULT_WARN_THRESHOLD,
            channel_order: ChannelOrder::default(),
        }
    }

    /// Build the configuration from startup options, the optional tuning file
    /// named by `FRAME_VIEWER_CONFIG`, and environment overrides.
    pub fn load(options: StartupOptions) -> Result<Self, ConfigError> {
        let file_cfg = match std::env::var(CONFIG_ENV).ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => ViewerConfigFile::default(),
        };
        let mut cfg = Self::from_parts(options, file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_parts(options: StartupOptions, file: ViewerConfigFile) -> Result<Self, ConfigError> {
        let endpoint =
            MqttEndpoint::parse(&options.broker_addr, options.broker_port, options.use_tls)
                .map_err(|e| ConfigError::Broker(format!("{:#}", e)))?;
        let tls = TlsMaterials::load(
            options.tls_ca_path.as_deref(),
            options.tls_client_cert_path.as_deref(),
            options.tls_client_key_path.as_deref(),
        )
        .map_err(|e| ConfigError::Broker(format!("{:#}", e)))?;

        let broker = BrokerSettings {
            endpoint,
            topic: options.topic,
            client_id: options
                .client_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(default_client_id),
            username: options.username,
            password: options.password,
            tls,
            max_packet_size: file
                .mqtt
                .and_then(|m| m.max_packet_size)
                .unwrap_or(DEFAULT_MAX_PACKET_SIZE),
        };

        let liveness = LivenessSettings {
            idle_threshold: file
                .liveness
                .as_ref()
                .and_then(|l| l.idle_threshold_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_IDLE_THRESHOLD),
            poll_interval: file
                .liveness
                .as_ref()
                .and_then(|l| l.poll_interval_us)
                .map(Duration::from_micros)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
        };
        let queue_warn_threshold = file
            .queue
            .and_then(|q| q.warn_threshold)
            .unwrap_or(DEFAULT_WARN_THRESHOLD);
        let channel_order = match file.channel_order {
            Some(order) => order
                .parse::<ChannelOrder>()
                .map_err(|e| ConfigError::Invalid(format!("{:#}", e)))?,
            None => ChannelOrder::default(),
        };

        Ok(Self {
            broker,
            output_dir: options.output_dir,
            liveness,
            queue_warn_threshold,
            channel_order,
        })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(ms) = env_value::<u64>(IDLE_THRESHOLD_ENV)? {
            self.liveness.idle_threshold = Duration::from_millis(ms);
        }
        if let Some(us) = env_value::<u64>(POLL_INTERVAL_ENV)? {
            self.liveness.poll_interval = Duration::from_micros(us);
        }
        if let Some(threshold) = env_value::<usize>(QUEUE_WARN_THRESHOLD_ENV)? {
            self.queue_warn_threshold = threshold;
        }
        if let Some(order) = env_value::<ChannelOrder>(CHANNEL_ORDER_ENV)? {
            self.channel_order = order;
        }
        if let Some(size) = env_value::<u32>(MAX_PACKET_SIZE_ENV)? {
            self.broker.max_packet_size = size;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if let Some(dir) = &self.output_dir {
            if !dir.is_dir() {
                return Err(ConfigError::OutputDir(dir.clone()));
            }
        }
        if self.broker.max_packet_size == 0 || self.broker.max_packet_size > MAX_PACKET_SIZE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max packet size {} outside 1..={}",
                self.broker.max_packet_size, MAX_PACKET_SIZE_LIMIT
            )));
        }
        if self.liveness.idle_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "idle threshold must be greater than zero".to_string(),
            ));
        }
        if self.liveness.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.liveness.poll_interval >= self.liveness.idle_threshold {
            return Err(ConfigError::Invalid(format!(
                "poll interval {:?} must be shorter than idle threshold {:?}",
                self.liveness.poll_interval, self.liveness.idle_threshold
            )));
        }
        if self.queue_warn_threshold == 0 {
            return Err(ConfigError::Invalid(
                "queue warn threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ViewerConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
