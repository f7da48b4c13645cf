//! Broker endpoint and TLS transport selection.
//!
//! The broker address may carry a scheme: `mqtts://` or `ssl://` switch TLS
//! on, `mqtt://` or `tcp://` leave it to the `--mqtt-use-tls` flag. The port is
//! always supplied separately.
//!
//! # Example
//!
//! ```ignore
//! let endpoint = MqttEndpoint::parse("mqtts://broker.lan", 8883, false)?;
//! let transport = TlsMaterials::default().build_transport(&endpoint)?;
//! ```

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

/// MQTT endpoint with TLS configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Build an endpoint from a broker address and port.
    ///
    /// Supports:
    /// - `host` / `192.168.1.10`
    /// - `mqtt://host`, `tcp://host` (plain TCP unless `tls_override`)
    /// - `mqtts://host`, `ssl://host` (TLS)
    /// - `[::1]` (IPv6 with brackets)
    pub fn parse(addr: &str, port: u16, tls_override: bool) -> Result<Self> {
        let mut use_tls = tls_override;
        let mut host = addr.trim();

        if let Some((scheme, rest)) = host.split_once("://") {
            match scheme {
                "mqtt" | "tcp" => {}
                "mqtts" | "ssl" => use_tls = true,
                other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
            }
            host = rest;
        }

        if let Some(rest) = host.strip_prefix('[') {
            host = rest
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        }

        if host.is_empty() {
            return Err(anyhow!("MQTT broker address is empty"));
        }
        if host.contains('/') {
            return Err(anyhow!("MQTT broker address must not contain a path: {}", addr));
        }
        if port == 0 {
            return Err(anyhow!("MQTT broker port must be non-zero"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            use_tls,
        })
    }
}

impl std::fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// TLS certificate materials for MQTT connections.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// PEM-encoded CA certificate bytes.
    /// When None, the client's built-in web PKI roots are used.
    pub ca: Option<Vec<u8>>,

    /// Client certificate and key for mutual TLS, as (cert, key).
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    /// Load TLS materials from file paths.
    ///
    /// The CA path is optional; a client certificate and key must come together.
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!(
                        "failed to read MQTT TLS client cert '{}'",
                        cert_path.display()
                    )
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!(
                        "failed to read MQTT TLS client key '{}'",
                        key_path.display()
                    )
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }

    /// Build a rumqttc `Transport` for `endpoint`.
    ///
    /// # Errors
    /// - TLS materials were provided but the endpoint is plain TCP
    /// - client certificates were provided without a CA
    pub fn build_transport(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        if !endpoint.use_tls {
            if self.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled.\n\
                     Use --mqtt-use-tls or the mqtts:// scheme to enable TLS."
                ));
            }
            return Ok(Transport::tcp());
        }

        if !self.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }

        let ca = self.ca.clone().ok_or_else(|| {
            anyhow!(
                "MQTT TLS CA certificate is required when providing client certificates.\n\
                 Specify --mqtt-tls-ca-path or remove the client certificate."
            )
        })?;
        Ok(Transport::tls(ca, self.client_auth.clone(), None))
    }
}
