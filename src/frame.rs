//! Camera frame wire format.
//!
//! A serialized frame is a fixed-order, little-endian record with no padding:
//!
//! | field     | type                       |
//! |-----------|----------------------------|
//! | timestamp | i64, nanoseconds           |
//! | height    | i32, rows (> 0)            |
//! | width     | u32, columns (> 0)         |
//! | encoding  | u32 length + ASCII tag     |
//! | data      | u32 length + raw bytes     |
//!
//! `decode()` validates structure and the encoding vocabulary only. Whether the
//! data length matches the encoding's channel layout is checked at
//! reconstruction, because not every known encoding has a planar layout.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Longest encoding tag accepted on the wire.
pub const MAX_ENCODING_TAG_LEN: usize = 32;

const TIMESTAMP_LEN: usize = 8;
const HEIGHT_LEN: usize = 4;
const WIDTH_LEN: usize = 4;
const LENGTH_PREFIX_LEN: usize = 4;

/// Serialized frame as received from the broker.
pub type SerializedMessage = Vec<u8>;

// ----------------------------------------------------------------------------
// Encoding tags
// ----------------------------------------------------------------------------

/// Pixel encodings a publisher may put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Rgb8,
    Rgb16,
    Bgr8,
    Bgr16,
    Rgba8,
    Rgba16,
    Bgra8,
    Bgra16,
    Mono8,
    Mono16,
    Yuv422,
}

impl Encoding {
    pub const ALL: [Encoding; 11] = [
        Encoding::Rgb8,
        Encoding::Rgb16,
        Encoding::Bgr8,
        Encoding::Bgr16,
        Encoding::Rgba8,
        Encoding::Rgba16,
        Encoding::Bgra8,
        Encoding::Bgra16,
        Encoding::Mono8,
        Encoding::Mono16,
        Encoding::Yuv422,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgb8 => "rgb8",
            Self::Rgb16 => "rgb16",
            Self::Bgr8 => "bgr8",
            Self::Bgr16 => "bgr16",
            Self::Rgba8 => "rgba8",
            Self::Rgba16 => "rgba16",
            Self::Bgra8 => "bgra8",
            Self::Bgra16 => "bgra16",
            Self::Mono8 => "mono8",
            Self::Mono16 => "mono16",
            Self::Yuv422 => "yuv422",
        }
    }
}

impl FromStr for Encoding {
    type Err = DecodeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|encoding| encoding.as_str() == tag)
            .ok_or_else(|| DecodeError::UnknownEncoding(tag.to_string()))
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded camera image message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Capture time in nanoseconds, as stamped by the publisher.
    pub timestamp: i64,
    pub height: i32,
    pub width: u32,
    pub encoding: Encoding,
    /// Planar sample data, one contiguous plane per channel.
    pub data: Vec<u8>,
}

impl Frame {
    /// Pixels per plane, or `None` if the dimensions overflow.
    pub fn pixel_count(&self) -> Option<usize> {
        let height = usize::try_from(self.height).ok()?;
        let width = usize::try_from(self.width).ok()?;
        height.checked_mul(width)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown encoding tag {0:?}")]
    UnknownEncoding(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{field} is {len} bytes, longer than a u32 length prefix allows")]
    FieldTooLong { field: &'static str, len: usize },
}

impl DecodeError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}

// ----------------------------------------------------------------------------
// Decode / encode
// ----------------------------------------------------------------------------

/// Decode one serialized frame.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let mut reader = Reader::new(bytes);

    let timestamp = i64::from_le_bytes(reader.array("timestamp")?);
    let height = i32::from_le_bytes(reader.array("height")?);
    let width = u32::from_le_bytes(reader.array("width")?);
    if height <= 0 || width == 0 {
        return Err(DecodeError::malformed(format!(
            "non-positive dimensions {}x{}",
            width, height
        )));
    }

    let tag_bytes = reader.prefixed("encoding")?;
    if tag_bytes.is_empty() || tag_bytes.len() > MAX_ENCODING_TAG_LEN {
        return Err(DecodeError::malformed(format!(
            "encoding tag length {} outside 1..={}",
            tag_bytes.len(),
            MAX_ENCODING_TAG_LEN
        )));
    }
    let tag = std::str::from_utf8(tag_bytes)
        .ok()
        .filter(|tag| tag.bytes().all(|b| b.is_ascii_graphic()))
        .ok_or_else(|| DecodeError::malformed("encoding tag is not printable ASCII"))?;
    let encoding = tag.parse::<Encoding>()?;

    let data = reader.prefixed("data")?.to_vec();

    if reader.remaining() != 0 {
        return Err(DecodeError::malformed(format!(
            "{} trailing bytes after data",
            reader.remaining()
        )));
    }

    Ok(Frame {
        timestamp,
        height,
        width,
        encoding,
        data,
    })
}

/// Serialize a frame into the wire layout accepted by `decode()`.
pub fn encode(frame: &Frame) -> Result<SerializedMessage, EncodeError> {
    let tag = frame.encoding.as_str().as_bytes();
    let mut out = Vec::with_capacity(
        TIMESTAMP_LEN
            + HEIGHT_LEN
            + WIDTH_LEN
            + LENGTH_PREFIX_LEN * 2
            + tag.len()
            + frame.data.len(),
    );
    out.extend_from_slice(&frame.timestamp.to_le_bytes());
    out.extend_from_slice(&frame.height.to_le_bytes());
    out.extend_from_slice(&frame.width.to_le_bytes());
    write_prefixed(&mut out, "encoding", tag)?;
    write_prefixed(&mut out, "data", &frame.data)?;
    Ok(out)
}

fn write_prefixed(
    out: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), EncodeError> {
    let len = u32::try_from(bytes.len()).map_err(|_| EncodeError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked cursor over a serialized frame.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::malformed(format!(
                "truncated {}: need {} bytes at offset {}, have {}",
                field,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn prefixed(&mut self, field: &str) -> Result<&'a [u8], DecodeError> {
        let len = u32::from_le_bytes(self.array(field)?) as usize;
        self.take(len, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame() -> Frame {
        Frame {
            timestamp: 1_700_000_000_123_456_789,
            height: 2,
            width: 2,
            encoding: Encoding::Rgb8,
            data: (0u8..12).collect(),
        }
    }

    #[test]
    fn decode_reverses_encode() {
        let frame = rgb_frame();
        assert_eq!(decode(&encode(&frame).unwrap()).unwrap(), frame);

        let negative_ts = Frame {
            timestamp: -42,
            height: 1,
            width: 3,
            encoding: Encoding::Bgra16,
            data: vec![9u8; 24],
        };
        assert_eq!(decode(&encode(&negative_ts).unwrap()).unwrap(), negative_ts);
    }

    #[test]
    fn encoded_layout_is_little_endian() {
        let bytes = encode(&rgb_frame()).unwrap();
        assert_eq!(&bytes[0..8], &1_700_000_000_123_456_789i64.to_le_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &4u32.to_le_bytes());
        assert_eq!(&bytes[20..24], b"rgb8");
        assert_eq!(&bytes[24..28], &12u32.to_le_bytes());
        assert_eq!(bytes.len(), 28 + 12);
    }

    #[test]
    fn every_truncation_is_malformed() {
        let bytes = encode(&rgb_frame()).unwrap();
        for len in 0..bytes.len() {
            match decode(&bytes[..len]) {
                Err(DecodeError::Malformed(_)) => {}
                other => panic!("prefix of {} bytes decoded as {:?}", len, other),
            }
        }
    }

    #[test]
    fn oversized_data_length_is_malformed() {
        let mut bytes = encode(&rgb_frame()).unwrap();
        let prefix_at = 24;
        bytes[prefix_at..prefix_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = encode(&rgb_frame()).unwrap();
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn non_positive_dimensions_are_malformed() {
        let mut frame = rgb_frame();
        frame.height = 0;
        assert!(matches!(
            decode(&encode(&frame).unwrap()),
            Err(DecodeError::Malformed(_))
        ));

        let mut frame = rgb_frame();
        frame.height = -2;
        assert!(matches!(
            decode(&encode(&frame).unwrap()),
            Err(DecodeError::Malformed(_))
        ));

        let mut frame = rgb_frame();
        frame.width = 0;
        assert!(matches!(
            decode(&encode(&frame).unwrap()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i64.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        write_prefixed(&mut bytes, "encoding", b"hsv8").unwrap();
        write_prefixed(&mut bytes, "data", &[0, 0, 0]).unwrap();
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::UnknownEncoding("hsv8".to_string()))
        );
    }

    #[test]
    fn binary_tag_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i64.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        write_prefixed(&mut bytes, "encoding", &[0xff, 0x00]).unwrap();
        write_prefixed(&mut bytes, "data", &[0, 0, 0]).unwrap();
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn non_ascii_utf8_tag_is_malformed() {
        for tag in ["rgb\u{e9}8", "rgb 8"] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&0i64.to_le_bytes());
            bytes.extend_from_slice(&1i32.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
            write_prefixed(&mut bytes, "encoding", tag.as_bytes()).unwrap();
            write_prefixed(&mut bytes, "data", &[0, 0, 0]).unwrap();
            assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))), "{}", tag);
        }
    }

    #[test]
    fn non_planar_encodings_still_decode() {
        let frame = Frame {
            timestamp: 5,
            height: 2,
            width: 2,
            encoding: Encoding::Yuv422,
            data: vec![0x80; 8],
        };
        assert_eq!(decode(&encode(&frame).unwrap()).unwrap().encoding, Encoding::Yuv422);
    }

    #[test]
    fn encoding_tags_round_trip_through_from_str() {
        for encoding in Encoding::ALL {
            assert_eq!(encoding.as_str().parse::<Encoding>().unwrap(), encoding);
        }
    }
}
