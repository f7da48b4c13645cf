//! Single consumer: queue → decode → reconstruct → sink.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::frame::{self, SerializedMessage};
use crate::liveness::LivenessClock;
use crate::queue::BlockingQueue;
use crate::reconstruct::ImageReconstructor;
use crate::sink::Sink;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub displayed: u64,
    pub saved: u64,
    pub decode_failures: u64,
    pub reconstruct_failures: u64,
    pub save_failures: u64,
}

pub struct ConsumerLoop {
    queue: Arc<BlockingQueue<SerializedMessage>>,
    reconstructor: ImageReconstructor,
    sink: Arc<dyn Sink>,
    clock: Arc<LivenessClock>,
    persist: bool,
}

impl ConsumerLoop {
    pub fn new(
        queue: Arc<BlockingQueue<SerializedMessage>>,
        reconstructor: ImageReconstructor,
        sink: Arc<dyn Sink>,
        clock: Arc<LivenessClock>,
    ) -> Self {
        Self {
            queue,
            reconstructor,
            sink,
            clock,
            persist: false,
        }
    }

    /// Also hand every displayed image to `Sink::save`.
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn spawn(self) -> Result<JoinHandle<ConsumerStats>> {
        std::thread::Builder::new()
            .name("frame-consumer".into())
            .spawn(move || self.run())
            .context("failed to spawn frame consumer thread")
    }

    /// Process items until the queue is shut down.
    ///
    /// The exit flag is checked before every item, so a backlog left at
    /// shutdown is abandoned rather than drained.
    pub fn run(self) -> ConsumerStats {
        log::info!("frame consumer started");
        let mut stats = ConsumerStats::default();

        while !self.queue.is_shutdown() {
            let Some(message) = self.queue.take() else {
                break;
            };
            stats.received += 1;
            self.process(message, &mut stats);
        }

        let abandoned = self.queue.len();
        if abandoned > 0 {
            log::info!("frame consumer discarding {} pending messages", abandoned);
        }

        log::info!(
            "frame consumer exiting: {} received, {} displayed, {} saved, {} undecodable, {} unreconstructable",
            stats.received,
            stats.displayed,
            stats.saved,
            stats.decode_failures,
            stats.reconstruct_failures
        );
        stats
    }

    fn process(&self, message: SerializedMessage, stats: &mut ConsumerStats) {
        let frame = match frame::decode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                stats.decode_failures += 1;
                log::warn!("skipping message of {} bytes: {}", message.len(), e);
                return;
            }
        };
        drop(message);

        let image = match self.reconstructor.reconstruct(&frame) {
            Ok(image) => image,
            Err(e) => {
                stats.reconstruct_failures += 1;
                log::warn!("skipping frame ts={}: {}", frame.timestamp, e);
                return;
            }
        };

        self.clock.mark(frame.timestamp);
        self.sink.display(&image);
        stats.displayed += 1;

        if self.persist {
            match self.sink.save(&image, stats.saved) {
                Ok(path) => {
                    stats.saved += 1;
                    log::debug!("saved frame ts={} to {}", frame.timestamp, path.display());
                }
                Err(e) => {
                    stats.save_failures += 1;
                    log::warn!("failed to save frame ts={}: {:#}", frame.timestamp, e);
                }
            }
        }
    }
}
