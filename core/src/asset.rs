use base64::{engine::general_purpose::STANDARD, Engine};
use image::{imageops::FilterType, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// Media type of an image payload, sniffed from its leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
    Unknown,
}

impl MediaType {
    /// Detect the media type from magic bytes
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 8 && bytes[0] == 0x89 && &bytes[1..4] == b"PNG" {
            Self::Png
        } else if bytes.len() >= 3 && bytes[..3] == [0xff, 0xd8, 0xff] {
            Self::Jpeg
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Self::Webp
        } else if bytes.len() >= 6 && (&bytes[..6] == b"GIF87a" || &bytes[..6] == b"GIF89a") {
            Self::Gif
        } else if bytes.len() >= 2 && &bytes[..2] == b"BM" {
            Self::Bmp
        } else {
            Self::Unknown
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// File extension including the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Webp => ".webp",
            Self::Gif => ".gif",
            Self::Bmp => ".bmp",
            Self::Unknown => ".img",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Immutable image payload shared between pipeline stages
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Arc<[u8]>,
    media_type: MediaType,
}

impl ImageAsset {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: MediaType) -> Self {
        Self {
            bytes: bytes.into().into(),
            media_type,
        }
    }

    /// Wrap raw bytes, sniffing the media type
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let media_type = MediaType::sniff(&bytes);
        Self::new(bytes, media_type)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type.mime(), self.to_base64())
    }

    /// Decode a `data:<mime>;base64,<payload>` URI
    pub fn from_data_uri(uri: &str) -> Result<Self, base64::DecodeError> {
        let payload = uri
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .map_or(uri, |(_, payload)| payload);
        Ok(Self::from_bytes(STANDARD.decode(payload.trim())?))
    }

    /// Resize to cover `width`x`height`, crop the overflow around the centre
    /// and re-encode as JPEG.
    pub fn fit_cover_jpeg(&self, width: u32, height: u32) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(&self.bytes)?;
        let fitted = img.resize_to_fill(width, height, FilterType::Lanczos3);

        log::debug!(
            "Normalized {} {}x{} -> {}x{}",
            self.media_type,
            img.width(),
            img.height(),
            width,
            height
        );

        let mut buf = Vec::new();
        fitted
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))?;
        Ok(Self::new(buf, MediaType::Jpeg))
    }
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
