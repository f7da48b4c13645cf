//! Liveness tracking for the display.
//!
//! `LivenessClock` is written by the consumer each time it forwards a frame and
//! read by `LivenessWatchdog`. When nothing has been forwarded for longer than
//! the idle threshold, the watchdog asks the sink to show its placeholder.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::shutdown::ShutdownCoordinator;
use crate::sink::Sink;

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Last-forward marker shared between the consumer and the watchdog.
#[derive(Debug)]
pub struct LivenessClock {
    /// Frame-domain timestamp (ns) of the last forwarded frame.
    frame_timestamp: AtomicI64,
    /// Wall-clock instant of the last forward, or of clock creation.
    last_forward: Mutex<Instant>,
}

impl LivenessClock {
    pub fn new() -> Self {
        Self {
            frame_timestamp: AtomicI64::new(0),
            last_forward: Mutex::new(Instant::now()),
        }
    }

    /// Record a forward of the frame stamped `frame_timestamp`.
    pub fn mark(&self, frame_timestamp: i64) {
        self.frame_timestamp.store(frame_timestamp, Ordering::SeqCst);
        *self
            .last_forward
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn frame_timestamp(&self) -> i64 {
        self.frame_timestamp.load(Ordering::SeqCst)
    }

    pub fn last_forward(&self) -> Instant {
        *self
            .last_forward
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessSettings {
    pub idle_threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Decides when an idle notification is due.
///
/// Fires once the last forward is older than the threshold, then at most once
/// per threshold period while the stream stays idle. A newer forward re-arms it.
#[derive(Debug)]
pub struct IdleTracker {
    threshold: Duration,
    last_seen_forward: Option<Instant>,
    last_fired: Option<Instant>,
}

impl IdleTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_seen_forward: None,
            last_fired: None,
        }
    }

    pub fn should_fire(&mut self, last_forward: Instant, now: Instant) -> bool {
        if self.last_seen_forward != Some(last_forward) {
            self.last_seen_forward = Some(last_forward);
            self.last_fired = None;
        }
        if now.saturating_duration_since(last_forward) <= self.threshold {
            return false;
        }
        let due = match self.last_fired {
            Some(fired) => now.saturating_duration_since(fired) >= self.threshold,
            None => true,
        };
        if due {
            self.last_fired = Some(now);
        }
        due
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    pub idle_notifications: u64,
}

pub struct LivenessWatchdog {
    clock: Arc<LivenessClock>,
    sink: Arc<dyn Sink>,
    shutdown: Arc<ShutdownCoordinator>,
    settings: LivenessSettings,
}

impl LivenessWatchdog {
    pub fn new(
        clock: Arc<LivenessClock>,
        sink: Arc<dyn Sink>,
        shutdown: Arc<ShutdownCoordinator>,
        settings: LivenessSettings,
    ) -> Self {
        Self {
            clock,
            sink,
            shutdown,
            settings,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<WatchdogStats>> {
        std::thread::Builder::new()
            .name("liveness-watchdog".into())
            .spawn(move || self.run())
            .context("failed to spawn liveness watchdog thread")
    }

    /// Poll until shutdown is triggered.
    pub fn run(self) -> WatchdogStats {
        log::debug!(
            "liveness watchdog started (threshold {:?}, poll {:?})",
            self.settings.idle_threshold,
            self.settings.poll_interval
        );
        let mut tracker = IdleTracker::new(self.settings.idle_threshold);
        let mut stats = WatchdogStats::default();

        while !self.shutdown.is_triggered() {
            if tracker.should_fire(self.clock.last_forward(), Instant::now()) {
                log::debug!(
                    "no frame forwarded for over {:?} (last frame ts {})",
                    self.settings.idle_threshold,
                    self.clock.frame_timestamp()
                );
                self.sink.show_idle();
                stats.idle_notifications += 1;
            }
            std::thread::sleep(self.settings.poll_interval);
        }

        log::debug!(
            "liveness watchdog exiting after {} idle notifications",
            stats.idle_notifications
        );
        stats
    }
}
