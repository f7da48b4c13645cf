//! Frame Viewer
//!
//! Receives serialized camera frames over MQTT, rebuilds interleaved images
//! from their planar buffers and hands them to a display/persistence sink.
//!
//! # Architecture
//!
//! ```text
//! mqtt-network ──add──▶ BlockingQueue ──take──▶ frame-consumer ──▶ Sink
//!                                                     │
//!                                              LivenessClock
//!                                                     │
//!                                 liveness-watchdog ──┘──▶ Sink::show_idle
//! ```
//!
//! The network thread never waits on the consumer. The consumer is the only
//! writer of the liveness clock. The control thread parks on the
//! `ShutdownCoordinator` until a termination signal arrives.
//!
//! # Module Structure
//!
//! - `queue`: unbounded blocking FIFO with cooperative shutdown
//! - `frame`: wire format (`decode` / `encode`)
//! - `reconstruct`: planar → interleaved image conversion
//! - `consumer`: decode-and-forward loop
//! - `liveness`: idle detection and placeholder substitution
//! - `subscription`, `transport`: broker connection
//! - `sink`: display/persistence boundary and the default `ViewerSink`
//! - `config`, `shutdown`, `viewer`: process setup and teardown

pub mod config;
pub mod consumer;
pub mod frame;
pub mod liveness;
pub mod queue;
pub mod reconstruct;
pub mod shutdown;
pub mod sink;
pub mod subscription;
pub mod transport;
pub mod viewer;

pub use config::{ConfigError, StartupOptions, ViewerConfig};
pub use consumer::{ConsumerLoop, ConsumerStats};
pub use frame::{decode, encode, DecodeError, Encoding, Frame, SerializedMessage};
pub use liveness::{LivenessClock, LivenessSettings, LivenessWatchdog, WatchdogStats};
pub use queue::BlockingQueue;
pub use reconstruct::{ChannelOrder, ImageReconstructor, InterleavedImage, ReconstructError};
pub use shutdown::ShutdownCoordinator;
pub use sink::{Sink, View, ViewerSink, ViewerSnapshot};
pub use subscription::{BrokerSettings, ConnectionState, SubscriptionClient};
pub use viewer::{RunSummary, RunningViewer, Viewer};
