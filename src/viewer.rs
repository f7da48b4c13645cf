//! Process wiring: subscription → queue → consumer → sink, plus the watchdog.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::config::ViewerConfig;
use crate::consumer::{ConsumerLoop, ConsumerStats};
use crate::frame::SerializedMessage;
use crate::liveness::{LivenessClock, LivenessWatchdog, WatchdogStats};
use crate::queue::BlockingQueue;
use crate::reconstruct::ImageReconstructor;
use crate::shutdown::ShutdownCoordinator;
use crate::sink::Sink;
use crate::subscription::{ConnectionState, SubscriptionClient};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub consumer: ConsumerStats,
    pub watchdog: WatchdogStats,
}

pub struct Viewer;

impl Viewer {
    /// Start the worker threads and connect to the broker.
    pub fn start(
        config: ViewerConfig,
        sink: Arc<dyn Sink>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Result<RunningViewer> {
        let mut running = Self::start_pipeline(&config, sink, shutdown)?;
        let mut client = SubscriptionClient::new(config.broker, Arc::clone(&running.queue));
        if let Err(e) = client.init() {
            if let Err(stop_err) = running.stop() {
                log::error!("cleanup after failed broker setup: {:#}", stop_err);
            }
            return Err(e);
        }
        running.subscription = Some(client);
        Ok(running)
    }

    /// Start the consumer and watchdog without a broker connection.
    /// Messages are fed through `RunningViewer::queue()`.
    pub fn start_pipeline(
        config: &ViewerConfig,
        sink: Arc<dyn Sink>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Result<RunningViewer> {
        let queue = Arc::new(BlockingQueue::with_warn_threshold(
            config.queue_warn_threshold,
        ));
        let clock = Arc::new(LivenessClock::new());

        let consumer = ConsumerLoop::new(
            Arc::clone(&queue),
            ImageReconstructor::new(config.channel_order),
            Arc::clone(&sink),
            Arc::clone(&clock),
        )
        .with_persistence(config.output_dir.is_some())
        .spawn()?;

        let mut running = RunningViewer {
            queue,
            clock,
            sink,
            shutdown,
            consumer: Some(consumer),
            watchdog: None,
            subscription: None,
            summary: None,
        };

        let watchdog = LivenessWatchdog::new(
            Arc::clone(&running.clock),
            Arc::clone(&running.sink),
            Arc::clone(&running.shutdown),
            config.liveness,
        )
        .spawn();
        match watchdog {
            Ok(handle) => running.watchdog = Some(handle),
            Err(e) => {
                if let Err(stop_err) = running.stop() {
                    log::error!("cleanup after failed watchdog spawn: {:#}", stop_err);
                }
                return Err(e);
            }
        }
        Ok(running)
    }
}

pub struct RunningViewer {
    queue: Arc<BlockingQueue<SerializedMessage>>,
    clock: Arc<LivenessClock>,
    sink: Arc<dyn Sink>,
    shutdown: Arc<ShutdownCoordinator>,
    consumer: Option<JoinHandle<ConsumerStats>>,
    watchdog: Option<JoinHandle<WatchdogStats>>,
    subscription: Option<SubscriptionClient>,
    summary: Option<RunSummary>,
}

impl RunningViewer {
    pub fn queue(&self) -> &Arc<BlockingQueue<SerializedMessage>> {
        &self.queue
    }

    pub fn clock(&self) -> &Arc<LivenessClock> {
        &self.clock
    }

    /// `None` when started without a broker.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.subscription.as_ref().map(SubscriptionClient::state)
    }

    /// Park the calling thread until shutdown is triggered.
    pub fn wait_for_shutdown(&self) {
        self.shutdown.wait();
    }

    /// Stop every thread in order and release the sink.
    ///
    /// The consumer finishes the frame in hand and abandons the rest of the
    /// backlog; messages arriving during teardown are discarded by the queue.
    /// Later calls return the first summary.
    pub fn stop(&mut self) -> Result<RunSummary> {
        if let Some(summary) = self.summary {
            return Ok(summary);
        }
        self.shutdown.trigger();
        self.queue.shutdown();

        let mut summary = RunSummary::default();
        let mut panicked = Vec::new();
        if let Some(handle) = self.consumer.take() {
            match handle.join() {
                Ok(stats) => summary.consumer = stats,
                Err(_) => panicked.push("frame consumer"),
            }
        }
        self.queue.clear();
        if let Some(handle) = self.watchdog.take() {
            match handle.join() {
                Ok(stats) => summary.watchdog = stats,
                Err(_) => panicked.push("liveness watchdog"),
            }
        }
        self.sink.release();

        if let Some(mut client) = self.subscription.take() {
            client.teardown();
        }

        self.summary = Some(summary);
        if !panicked.is_empty() {
            return Err(anyhow!("worker thread panicked: {}", panicked.join(", ")));
        }
        log::info!(
            "viewer stopped: {} frames displayed, {} idle notifications",
            summary.consumer.displayed,
            summary.watchdog.idle_notifications
        );
        Ok(summary)
    }
}

impl Drop for RunningViewer {
    fn drop(&mut self) {
        if self.summary.is_none() {
            if let Err(e) = self.stop() {
                log::error!("viewer shutdown failed: {:#}", e);
            }
        }
    }
}
