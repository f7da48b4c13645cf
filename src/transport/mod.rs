//! Transport layer for the broker connection.
//!
//! Endpoint parsing and TLS material handling for the MQTT subscription.

mod tls;

pub use tls::{MqttEndpoint, TlsMaterials};
