//! Planar → interleaved image reconstruction.
//!
//! Publishers send each color channel as its own contiguous plane. Displays and
//! bitmap encoders want one buffer with every pixel's channels side by side.
//! `ImageReconstructor` carves the planes out with bounds-checked `PlaneView`s
//! and weaves them together.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::frame::{Encoding, Frame};

/// Placeholder dimensions shown while no frames arrive.
pub const PLACEHOLDER_WIDTH: u32 = 300;
pub const PLACEHOLDER_HEIGHT: u32 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(Encoding),
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: i32 },
    #[error("{encoding} frame {width}x{height} needs {expected} bytes, got {actual}")]
    LengthMismatch {
        encoding: Encoding,
        width: u32,
        height: i32,
        expected: usize,
        actual: usize,
    },
}

/// Channel count per pixel for the planar encodings.
///
/// Only these tags carry one plane per channel; everything else is rejected.
pub fn num_channels(encoding: Encoding) -> Result<usize, ReconstructError> {
    match encoding {
        Encoding::Rgb8 | Encoding::Bgr16 | Encoding::Rgb16 => Ok(3),
        Encoding::Bgra8 | Encoding::Rgba8 | Encoding::Bgra16 | Encoding::Rgba16 => Ok(4),
        other => Err(ReconstructError::UnsupportedEncoding(other)),
    }
}

/// Encodings that are reconstructed end to end.
fn is_reconstructable(encoding: Encoding) -> bool {
    matches!(encoding, Encoding::Rgb8)
}

// ----------------------------------------------------------------------------
// Plane views
// ----------------------------------------------------------------------------

/// Read-only window onto one plane of a frame buffer.
#[derive(Clone, Copy, Debug)]
pub struct PlaneView<'a> {
    offset: usize,
    samples: &'a [u8],
}

impl<'a> PlaneView<'a> {
    /// Borrow `len` bytes at `offset`, or `None` if that runs past the buffer.
    pub fn new(buffer: &'a [u8], offset: usize, len: usize) -> Option<Self> {
        let end = offset.checked_add(len)?;
        let samples = buffer.get(offset..end)?;
        Some(Self { offset, samples })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &'a [u8] {
        self.samples
    }
}

/// Split `buffer` into `channels` equal planes of `plane_len` bytes each.
///
/// The buffer must hold exactly `channels * plane_len` bytes.
pub fn split_planes(buffer: &[u8], channels: usize, plane_len: usize) -> Option<Vec<PlaneView<'_>>> {
    if channels.checked_mul(plane_len)? != buffer.len() {
        return None;
    }
    (0..channels)
        .map(|index| PlaneView::new(buffer, index * plane_len, plane_len))
        .collect()
}

// ----------------------------------------------------------------------------
// Interleaved image
// ----------------------------------------------------------------------------

/// Pixel buffer with channels stored contiguously per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterleavedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Frame timestamp the image was built from (nanoseconds).
    pub timestamp: i64,
    pub data: Vec<u8>,
}

impl InterleavedImage {
    /// Black 3-channel image shown while the stream is idle.
    pub fn placeholder() -> Self {
        let len = PLACEHOLDER_WIDTH as usize * PLACEHOLDER_HEIGHT as usize * 3;
        Self {
            width: PLACEHOLDER_WIDTH,
            height: PLACEHOLDER_HEIGHT,
            channels: 3,
            timestamp: 0,
            data: vec![0u8; len],
        }
    }

    /// Channel values of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * channels;
        self.data.get(start..start + channels)
    }
}

// ----------------------------------------------------------------------------
// Reconstructor
// ----------------------------------------------------------------------------

/// How planes map onto output channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    /// Plane `i` becomes channel `i`.
    #[default]
    Identity,
    /// Plane `i` becomes channel `n - 1 - i` (RGB planes → BGR pixels).
    Reversed,
}

impl FromStr for ChannelOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "identity" | "rgb" => Ok(Self::Identity),
            "reversed" | "bgr" => Ok(Self::Reversed),
            other => Err(anyhow::anyhow!(
                "unknown channel order '{}': expected 'identity' or 'reversed'",
                other
            )),
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Reversed => write!(f, "reversed"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ImageReconstructor {
    order: ChannelOrder,
}

impl ImageReconstructor {
    pub fn new(order: ChannelOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn reconstruct(&self, frame: &Frame) -> Result<InterleavedImage, ReconstructError> {
        let channels = num_channels(frame.encoding)?;
        if !is_reconstructable(frame.encoding) {
            return Err(ReconstructError::UnsupportedEncoding(frame.encoding));
        }

        let invalid = || ReconstructError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
        };
        let height = u32::try_from(frame.height).map_err(|_| invalid())?;
        let plane_len = frame.pixel_count().ok_or_else(invalid)?;
        let expected = plane_len.checked_mul(channels).ok_or_else(invalid)?;

        let planes = split_planes(&frame.data, channels, plane_len).ok_or(
            ReconstructError::LengthMismatch {
                encoding: frame.encoding,
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.data.len(),
            },
        )?;

        let mut data = vec![0u8; expected];
        for (plane_index, plane) in planes.iter().enumerate() {
            let channel = match self.order {
                ChannelOrder::Identity => plane_index,
                ChannelOrder::Reversed => channels - 1 - plane_index,
            };
            for (pixel, sample) in plane.samples().iter().enumerate() {
                data[pixel * channels + channel] = *sample;
            }
        }

        Ok(InterleavedImage {
            width: frame.width,
            height,
            channels: channels as u8,
            timestamp: frame.timestamp,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar_rgb8(width: u32, height: i32, data: Vec<u8>) -> Frame {
        Frame {
            timestamp: 99,
            height,
            width,
            encoding: Encoding::Rgb8,
            data,
        }
    }

    #[test]
    fn channel_policy_matches_table() {
        let three = [Encoding::Rgb8, Encoding::Bgr16, Encoding::Rgb16];
        let four = [
            Encoding::Bgra8,
            Encoding::Rgba8,
            Encoding::Bgra16,
            Encoding::Rgba16,
        ];
        for encoding in Encoding::ALL {
            let expected = if three.contains(&encoding) {
                Ok(3)
            } else if four.contains(&encoding) {
                Ok(4)
            } else {
                Err(ReconstructError::UnsupportedEncoding(encoding))
            };
            assert_eq!(num_channels(encoding), expected, "{}", encoding);
        }
    }

    #[test]
    fn interleaves_three_planes() {
        // R plane 1..4, G plane 11..14, B plane 21..24
        let data = vec![1, 2, 3, 4, 11, 12, 13, 14, 21, 22, 23, 24];
        let image = ImageReconstructor::default()
            .reconstruct(&planar_rgb8(2, 2, data))
            .unwrap();

        assert_eq!((image.width, image.height, image.channels), (2, 2, 3));
        assert_eq!(image.timestamp, 99);
        assert_eq!(
            image.data,
            vec![1, 11, 21, 2, 12, 22, 3, 13, 23, 4, 14, 24]
        );
        assert_eq!(image.pixel(1, 1), Some(&[4, 14, 24][..]));
        assert_eq!(image.pixel(2, 0), None);
    }

    #[test]
    fn reversed_order_swaps_outer_channels() {
        let data = vec![1, 2, 11, 12, 21, 22];
        let image = ImageReconstructor::new(ChannelOrder::Reversed)
            .reconstruct(&planar_rgb8(2, 1, data))
            .unwrap();
        assert_eq!(image.data, vec![21, 11, 1, 22, 12, 2]);
    }

    #[test]
    fn length_mismatch_fails_without_panicking() {
        let reconstructor = ImageReconstructor::default();
        for len in [0usize, 1, 11, 13, 24] {
            let err = reconstructor
                .reconstruct(&planar_rgb8(2, 2, vec![0; len]))
                .unwrap_err();
            assert_eq!(
                err,
                ReconstructError::LengthMismatch {
                    encoding: Encoding::Rgb8,
                    width: 2,
                    height: 2,
                    expected: 12,
                    actual: len,
                }
            );
        }
    }

    #[test]
    fn recognised_but_unported_encodings_are_unsupported() {
        let reconstructor = ImageReconstructor::default();
        for encoding in [Encoding::Bgra8, Encoding::Rgb16, Encoding::Yuv422] {
            let frame = Frame {
                timestamp: 0,
                height: 1,
                width: 1,
                encoding,
                data: vec![0; 8],
            };
            assert_eq!(
                reconstructor.reconstruct(&frame),
                Err(ReconstructError::UnsupportedEncoding(encoding))
            );
        }
    }

    #[test]
    fn plane_views_stay_in_bounds() {
        let buffer = [0u8; 6];
        assert!(PlaneView::new(&buffer, 4, 2).is_some());
        assert!(PlaneView::new(&buffer, 4, 3).is_none());
        assert!(PlaneView::new(&buffer, usize::MAX, 2).is_none());

        let planes = split_planes(&buffer, 3, 2).unwrap();
        assert_eq!(
            planes.iter().map(PlaneView::offset).collect::<Vec<_>>(),
            vec![0, 2, 4]
        );
        assert!(split_planes(&buffer, 4, 2).is_none());
        assert!(split_planes(&buffer, usize::MAX, 2).is_none());
    }

    #[test]
    fn channel_order_parses() {
        assert_eq!("identity".parse::<ChannelOrder>().unwrap(), ChannelOrder::Identity);
        assert_eq!("BGR".parse::<ChannelOrder>().unwrap(), ChannelOrder::Reversed);
        assert!("sideways".parse::<ChannelOrder>().is_err());
        assert_eq!(ChannelOrder::Reversed.to_string(), "reversed");
    }

    #[test]
    fn placeholder_is_black() {
        let image = InterleavedImage::placeholder();
        assert_eq!(image.data.len(), 300 * 300 * 3);
        assert!(image.data.iter().all(|&b| b == 0));
    }
}
