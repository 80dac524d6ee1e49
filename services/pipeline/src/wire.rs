//! Binary frame protocol shared by the ingest and storage services.
//!
//! Every image travels as one transport record with two parts: a fixed 40-byte
//! [`FrameHeader`] and the raw pixel payload. The header is `#[repr(C)]` with its
//! fields ordered so the compiler inserts no padding; the `zerocopy` derives
//! reject the type at compile time if that ever stops being true.
//!
//! Byte order is native. The protocol is meant for producer and consumer builds
//! running on the same architecture; there is no version field, so any change to
//! the header shape is a breaking wire change.

use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size of an encoded [`FrameHeader`] in bytes.
pub const FRAME_HEADER_LEN: usize = 40;

/// Name of the transport record header carrying the encoded [`FrameHeader`].
pub const FRAME_HEADER_KEY: &str = "frame-header";

/// Value of the `message-type` record header for image frames.
pub const IMAGE_FRAME_MESSAGE_TYPE: &str = "image_frame";

const _: () = assert!(std::mem::size_of::<FrameHeader>() == FRAME_HEADER_LEN);

/// Errors raised while decoding frames from the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed frame header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    #[error("Frame payload truncated: header declares {declared} bytes, payload has {actual}")]
    TruncatedPayload { declared: u64, actual: usize },
}

/// Fixed-size header sent in front of every image payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsBytes, FromBytes, FromZeroes)]
pub struct FrameHeader {
    /// Pixel columns
    pub width: u32,
    /// Pixel rows
    pub height: u32,
    /// Samples per pixel
    pub channels: u32,
    /// Decoder-defined format tag, see [`PixelFormat`]
    pub pixel_format: u32,
    /// Producer sequence number, starting at 0
    pub frame_number: u64,
    /// Capture time in nanoseconds since the Unix epoch (UTC)
    pub timestamp_ns: u64,
    /// Exact byte length of the payload that follows the header
    pub pixel_count: u64,
}

impl FrameHeader {
    /// Encode the header into its fixed wire representation.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Decode a header. The block must be exactly [`FRAME_HEADER_LEN`] bytes long.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Self::read_from(bytes).ok_or(WireError::MalformedHeader {
            expected: FRAME_HEADER_LEN,
            actual: bytes.len(),
        })
    }

    /// The pixel format tag as a [`PixelFormat`].
    pub fn format(&self) -> PixelFormat {
        PixelFormat::from_tag(self.pixel_format)
    }
}

/// Pixel layout tags carried in [`FrameHeader::pixel_format`].
///
/// Multi-byte samples (16-bit and float formats) are stored in native byte order.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Unknown = 0,
    Gray8 = 1,
    GrayAlpha8 = 2,
    Rgb8 = 3,
    Rgba8 = 4,
    Gray16 = 5,
    GrayAlpha16 = 6,
    Rgb16 = 7,
    Rgba16 = 8,
    Rgb32F = 9,
    Rgba32F = 10,
}

impl PixelFormat {
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => PixelFormat::Gray8,
            2 => PixelFormat::GrayAlpha8,
            3 => PixelFormat::Rgb8,
            4 => PixelFormat::Rgba8,
            5 => PixelFormat::Gray16,
            6 => PixelFormat::GrayAlpha16,
            7 => PixelFormat::Rgb16,
            8 => PixelFormat::Rgba16,
            9 => PixelFormat::Rgb32F,
            10 => PixelFormat::Rgba32F,
            _ => PixelFormat::Unknown,
        }
    }
}

/// A decoded frame borrowing its pixels from the received payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMessage<'a> {
    pub header: FrameHeader,
    pub pixels: &'a [u8],
}

impl<'a> FrameMessage<'a> {
    /// Decode the header part and take exactly `pixel_count` bytes of the payload.
    ///
    /// Any bytes beyond `pixel_count` are ignored.
    pub fn from_parts(header_bytes: &[u8], payload: &'a [u8]) -> Result<Self, WireError> {
        let header = FrameHeader::decode(header_bytes)?;

        let declared = header.pixel_count;
        let len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= payload.len())
            .ok_or(WireError::TruncatedPayload {
                declared,
                actual: payload.len(),
            })?;

        Ok(Self {
            header,
            pixels: &payload[..len],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            width: 640,
            height: 480,
            channels: 3,
            pixel_format: PixelFormat::Rgb8.tag(),
            frame_number: 7,
            timestamp_ns: 1_700_000_000_000_000_000,
            pixel_count: 640 * 480 * 3,
        }
    }

    #[test]
    fn test_field_offsets_are_fixed() {
        let header = sample_header();
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &640u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &480u32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_ne_bytes());
        assert_eq!(&bytes[16..24], &7u64.to_ne_bytes());
        assert_eq!(&bytes[24..32], &1_700_000_000_000_000_000u64.to_ne_bytes());
        assert_eq!(&bytes[32..40], &(640u64 * 480 * 3).to_ne_bytes());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let bytes = sample_header().encode();

        assert_eq!(
            FrameHeader::decode(&bytes[..39]),
            Err(WireError::MalformedHeader { expected: 40, actual: 39 })
        );

        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(
            FrameHeader::decode(&long),
            Err(WireError::MalformedHeader { expected: 40, actual: 41 })
        );

        assert!(FrameHeader::decode(&[]).is_err());
    }

    #[test]
    fn test_frame_message_stops_at_pixel_count() {
        let mut header = sample_header();
        header.pixel_count = 4;
        let payload = [1u8, 2, 3, 4, 5, 6];

        let message = FrameMessage::from_parts(&header.encode(), &payload).unwrap();
        assert_eq!(message.pixels, &[1, 2, 3, 4]);
        assert_eq!(message.header, header);
    }

    #[test]
    fn test_frame_message_rejects_short_payload() {
        let mut header = sample_header();
        header.pixel_count = 10;

        let result = FrameMessage::from_parts(&header.encode(), &[0u8; 3]);
        assert_eq!(
            result,
            Err(WireError::TruncatedPayload { declared: 10, actual: 3 })
        );
    }

    #[test]
    fn test_pixel_format_tags() {
        assert_eq!(PixelFormat::from_tag(PixelFormat::Rgba16.tag()), PixelFormat::Rgba16);
        assert_eq!(PixelFormat::from_tag(999), PixelFormat::Unknown);
        assert_eq!(sample_header().format(), PixelFormat::Rgb8);
    }

    proptest! {
        #[test]
        fn prop_header_round_trip(
            width in any::<u32>(),
            height in any::<u32>(),
            channels in any::<u32>(),
            pixel_format in any::<u32>(),
            frame_number in any::<u64>(),
            timestamp_ns in any::<u64>(),
            pixel_count in any::<u64>(),
        ) {
            let header = FrameHeader {
                width, height, channels, pixel_format,
                frame_number, timestamp_ns, pixel_count,
            };
            prop_assert_eq!(FrameHeader::decode(&header.encode()), Ok(header));
        }

        #[test]
        fn prop_decode_rejects_other_lengths(bytes in proptest::collection::vec(any::<u8>(), 0..96)) {
            prop_assume!(bytes.len() != FRAME_HEADER_LEN);
            let is_malformed = matches!(
                FrameHeader::decode(&bytes),
                Err(WireError::MalformedHeader { .. })
            );
            prop_assert!(is_malformed);
        }
    }
}
