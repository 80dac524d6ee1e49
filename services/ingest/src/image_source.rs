//! Image decoding for the directory source.
//!
//! Decoders are chosen by file extension. A file no decoder claims is not an
//! error; the caller skips it.

use framevault_pipeline::PixelFormat;
use image::{ColorType, DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a single image.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Decoder task failed: {0}")]
    Worker(String),

    #[error("Image {path} has zero size ({width}x{height})")]
    Empty {
        path: PathBuf,
        width: u32,
        height: u32,
    },
}

/// Raw pixels plus the geometry needed to fill a frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixel_format: PixelFormat,
}

/// A decoder for one family of image files.
pub trait ImageDecoder: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether this decoder claims the file
    fn can_handle(&self, path: &Path) -> bool;

    /// Load the file into raw pixels
    fn load(&self, path: &Path) -> Result<DecodedImage, DecodeError>;
}

/// Extension-matched decoder backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct FormatDecoder {
    name: &'static str,
    extensions: &'static [&'static str],
    format: ImageFormat,
}

impl FormatDecoder {
    pub fn png() -> Self {
        Self {
            name: "png",
            extensions: &["png"],
            format: ImageFormat::Png,
        }
    }

    pub fn jpeg() -> Self {
        Self {
            name: "jpeg",
            extensions: &["jpg", "jpeg"],
            format: ImageFormat::Jpeg,
        }
    }

    pub fn tiff() -> Self {
        Self {
            name: "tiff",
            extensions: &["tif", "tiff"],
            format: ImageFormat::Tiff,
        }
    }

    pub fn bmp() -> Self {
        Self {
            name: "bmp",
            extensions: &["bmp"],
            format: ImageFormat::Bmp,
        }
    }
}

impl ImageDecoder for FormatDecoder {
    fn name(&self) -> &str {
        self.name
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn load(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
        let mut reader = image::io::Reader::open(path).map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        reader.set_format(self.format);

        let image = reader.decode().map_err(|source| DecodeError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        into_decoded(path, image)
    }
}

fn into_decoded(path: &Path, image: DynamicImage) -> Result<DecodedImage, DecodeError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(DecodeError::Empty {
            path: path.to_path_buf(),
            width,
            height,
        });
    }

    let color = image.color();
    Ok(DecodedImage {
        pixels: image.as_bytes().to_vec(),
        width,
        height,
        channels: u32::from(color.channel_count()),
        pixel_format: pixel_format(color),
    })
}

fn pixel_format(color: ColorType) -> PixelFormat {
    match color {
        ColorType::L8 => PixelFormat::Gray8,
        ColorType::La8 => PixelFormat::GrayAlpha8,
        ColorType::Rgb8 => PixelFormat::Rgb8,
        ColorType::Rgba8 => PixelFormat::Rgba8,
        ColorType::L16 => PixelFormat::Gray16,
        ColorType::La16 => PixelFormat::GrayAlpha16,
        ColorType::Rgb16 => PixelFormat::Rgb16,
        ColorType::Rgba16 => PixelFormat::Rgba16,
        ColorType::Rgb32F => PixelFormat::Rgb32F,
        ColorType::Rgba32F => PixelFormat::Rgba32F,
        _ => PixelFormat::Unknown,
    }
}

/// Ordered set of decoders; the first one that claims a file wins.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn ImageDecoder>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
            .with(FormatDecoder::png())
            .with(FormatDecoder::jpeg())
            .with(FormatDecoder::tiff())
            .with(FormatDecoder::bmp())
    }
}

impl DecoderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Append a decoder after the ones already registered
    pub fn with(mut self, decoder: impl ImageDecoder + 'static) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    /// Find the decoder for a path, if any
    pub fn resolve(&self, path: &Path) -> Option<&dyn ImageDecoder> {
        self.decoders
            .iter()
            .find(|decoder| decoder.can_handle(path))
            .map(|decoder| decoder.as_ref())
    }
}
