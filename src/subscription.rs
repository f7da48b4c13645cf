//! MQTT subscription feeding the frame queue.
//!
//! `SubscriptionClient` owns one broker connection and one topic subscription.
//! Its network thread drives the rumqttc event loop, tracks `ConnectionState`
//! and copies each inbound payload into the queue. Failures end the
//! connection; nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, ConnectionError, Event, Incoming, MqttOptions, StateError};
use rumqttc::Outgoing;

use crate::frame::SerializedMessage;
use crate::queue::BlockingQueue;
use crate::transport::{MqttEndpoint, TlsMaterials};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 10;

/// Largest inbound packet accepted by default. A 1920x1080 rgb8 frame needs ~6 MiB.
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 64 * 1024 * 1024;
/// Largest packet the MQTT remaining-length field can describe.
pub const MAX_PACKET_SIZE_LIMIT: u32 = 268_435_455;

/// Random client id; the broker needs a non-empty one.
pub fn default_client_id() -> String {
    format!("frame_viewer-{:08x}", rand::random::<u32>())
}

#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub endpoint: MqttEndpoint,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: TlsMaterials,
    /// Inbound packet size limit in bytes; frames above it end the connection.
    pub max_packet_size: u32,
}

impl BrokerSettings {
    pub fn new(endpoint: MqttEndpoint, topic: impl Into<String>) -> Self {
        Self {
            endpoint,
            topic: topic.into(),
            client_id: default_client_id(),
            username: None,
            password: None,
            tls: TlsMaterials::default(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    fn mqtt_options(&self) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(
            self.client_id.as_str(),
            self.endpoint.host.as_str(),
            self.endpoint.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        options.set_max_packet_size(Some(self.max_packet_size));
        if let Some(user) = &self.username {
            options.set_credentials(user.as_str(), self.password.clone().unwrap_or_default());
        }
        options.set_transport(
            self.tls
                .build_transport(&self.endpoint)
                .context("failed to configure MQTT transport")?,
        );
        Ok(options)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Rejected,
}

impl ConnectionState {
    pub fn on_init(self) -> Self {
        match self {
            ConnectionState::Disconnected | ConnectionState::Rejected => {
                ConnectionState::Connecting
            }
            other => other,
        }
    }

    pub fn on_connack(self, accepted: bool) -> Self {
        match (self, accepted) {
            (ConnectionState::Connecting, true) => ConnectionState::Connected,
            (ConnectionState::Connecting, false) => ConnectionState::Disconnected,
            (other, _) => other,
        }
    }

    pub fn on_suback(self, granted: bool) -> Self {
        match (self, granted) {
            (ConnectionState::Connected, true) => ConnectionState::Subscribed,
            (ConnectionState::Connected, false) => ConnectionState::Rejected,
            (other, _) => other,
        }
    }

    pub fn on_connection_closed(self) -> Self {
        ConnectionState::Disconnected
    }
}

/// True when the broker granted at least one topic filter.
pub fn subscription_granted(codes: &[SubscribeReasonCode]) -> bool {
    codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

pub struct SubscriptionClient {
    settings: BrokerSettings,
    queue: Arc<BlockingQueue<SerializedMessage>>,
    state: Arc<Mutex<ConnectionState>>,
    closing: Arc<AtomicBool>,
    client: Option<Client>,
    network: Option<JoinHandle<()>>,
}

impl SubscriptionClient {
    pub fn new(settings: BrokerSettings, queue: Arc<BlockingQueue<SerializedMessage>>) -> Self {
        Self {
            settings,
            queue,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            closing: Arc::new(AtomicBool::new(false)),
            client: None,
            network: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start connecting. Returns once the network thread is running.
    pub fn init(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let settings = &self.settings;
        let options = settings.mqtt_options()?;
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        update(&self.state, ConnectionState::on_init);
        log::info!(
            "connecting to {} as {} (auth: {})",
            settings.endpoint,
            settings.client_id,
            settings.username.is_some()
        );

        let network = NetworkLoop {
            client: client.clone(),
            topic: settings.topic.clone(),
            queue: Arc::clone(&self.queue),
            state: Arc::clone(&self.state),
            closing: Arc::clone(&self.closing),
        };
        let handle = std::thread::Builder::new()
            .name("mqtt-network".into())
            .spawn(move || network.run(connection))
            .context("failed to spawn MQTT network thread")?;

        self.client = Some(client);
        self.network = Some(handle);
        Ok(())
    }

    /// Disconnect and join the network thread. Idempotent.
    pub fn teardown(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                log::debug!("MQTT disconnect request not delivered: {}", e);
            }
        }
        if let Some(handle) = self.network.take() {
            if handle.join().is_err() {
                log::error!("MQTT network thread panicked");
            }
        }
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn update(state: &Mutex<ConnectionState>, f: impl FnOnce(ConnectionState) -> ConnectionState) {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = f(*guard);
}

struct NetworkLoop {
    client: Client,
    topic: String,
    queue: Arc<BlockingQueue<SerializedMessage>>,
    state: Arc<Mutex<ConnectionState>>,
    closing: Arc<AtomicBool>,
}

impl NetworkLoop {
    fn run(self, mut connection: Connection) {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    let accepted = ack.code == ConnectReturnCode::Success;
                    update(&self.state, |s| s.on_connack(accepted));
                    if !accepted {
                        log::error!("broker refused connection: {:?}", ack.code);
                        break;
                    }
                    log::info!("connected to broker");
                    let requested = self
                        .client
                        .try_subscribe(self.topic.as_str(), QoS::AtLeastOnce);
                    if let Err(e) = requested {
                        log::error!("failed to request subscription to {}: {}", self.topic, e);
                        break;
                    }
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    // Refused filters surface as `StateError::SubFail` below.
                    let granted = subscription_granted(&ack.return_codes);
                    update(&self.state, |s| s.on_suback(granted));
                    log::info!("subscribed to {}", self.topic);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.queue.add(publish.payload.to_vec());
                }
                Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                    log::warn!("broker closed the session");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(ConnectionError::MqttState(StateError::SubFail { reason })) => {
                    update(&self.state, |s| s.on_suback(false));
                    log::error!("subscription to {} rejected: {:?}", self.topic, reason);
                    break;
                }
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        log::debug!("MQTT connection closed: {}", e);
                    } else if let ConnectionError::ConnectionRefused(code) = &e {
                        log::error!("broker refused connection: {:?}", code);
                    } else {
                        log::error!("MQTT connection error: {}", e);
                    }
                    break;
                }
            }
        }

        update(&self.state, ConnectionState::on_connection_closed);
        log::info!("disconnected from broker");
    }
}
