//! Display / persistence boundary.
//!
//! The consumer and the watchdog both talk to a `Sink` from their own threads,
//! so implementations take `&self` and handle their own locking.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Context, Result};
use image::{ColorType, ImageFormat};

use crate::reconstruct::InterleavedImage;

pub trait Sink: Send + Sync {
    /// Show a freshly reconstructed image.
    fn display(&self, image: &InterleavedImage);

    /// Replace the current view with the idle placeholder.
    fn show_idle(&self);

    /// Persist `image` as the `index`-th saved frame of this run.
    fn save(&self, image: &InterleavedImage, index: u64) -> Result<PathBuf>;

    /// Release display resources. Called once during shutdown.
    fn release(&self) {}
}

/// File name used for the `index`-th saved frame.
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{:06}.bmp", index)
}

/// What the viewer is currently showing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// Nothing received yet, nothing rendered.
    Waiting,
    Frame {
        width: u32,
        height: u32,
        channels: u8,
        timestamp: i64,
    },
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewerSnapshot {
    pub view: View,
    pub frames_displayed: u64,
    pub idle_shown: u64,
    pub frames_saved: u64,
    pub released: bool,
}

/// Headless viewer: tracks the current view, logs transitions, and writes BMP
/// files when an output directory is configured.
pub struct ViewerSink {
    output_dir: Option<PathBuf>,
    placeholder: InterleavedImage,
    state: Mutex<ViewerSnapshot>,
}

impl ViewerSink {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            placeholder: InterleavedImage::placeholder(),
            state: Mutex::new(ViewerSnapshot {
                view: View::Waiting,
                frames_displayed: 0,
                idle_shown: 0,
                frames_saved: 0,
                released: false,
            }),
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, ViewerSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for ViewerSink {
    fn display(&self, image: &InterleavedImage) {
        let mut state = self.lock();
        if state.view == View::Idle || state.view == View::Waiting {
            log::info!(
                "receiving frames ({}x{}, {} channels)",
                image.width,
                image.height,
                image.channels
            );
        }
        state.view = View::Frame {
            width: image.width,
            height: image.height,
            channels: image.channels,
            timestamp: image.timestamp,
        };
        state.frames_displayed += 1;
        log::debug!(
            "display frame #{} ts={} {}x{}",
            state.frames_displayed,
            image.timestamp,
            image.width,
            image.height
        );
    }

    fn show_idle(&self) {
        let mut state = self.lock();
        if state.view != View::Idle {
            log::info!(
                "no frames arriving; showing {}x{} placeholder",
                self.placeholder.width,
                self.placeholder.height
            );
        }
        state.view = View::Idle;
        state.idle_shown += 1;
    }

    fn save(&self, image: &InterleavedImage, index: u64) -> Result<PathBuf> {
        let dir = self
            .output_dir
            .as_ref()
            .ok_or_else(|| anyhow!("no output directory configured"))?;
        let color = match image.channels {
            3 => ColorType::Rgb8,
            4 => ColorType::Rgba8,
            other => return Err(anyhow!("cannot save {}-channel image as BMP", other)),
        };
        let path = dir.join(frame_file_name(index));
        image::save_buffer_with_format(
            &path,
            &image.data,
            image.width,
            image.height,
            color,
            ImageFormat::Bmp,
        )
        .with_context(|| format!("failed to write {}", path.display()))?;
        self.lock().frames_saved += 1;
        Ok(path)
    }

    fn release(&self) {
        let mut state = self.lock();
        if state.released {
            return;
        }
        state.released = true;
        log::info!(
            "viewer closed: {} frames displayed, {} saved, {} idle placeholders",
            state.frames_displayed,
            state.frames_saved,
            state.idle_shown
        );
    }
}
