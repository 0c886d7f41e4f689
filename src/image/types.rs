//! Core types for portrait transformation.

use crate::error::{PortraitError, Result};
use base64::Engine;
use std::path::Path;

/// Mime type assumed for uploads that neither declare nor reveal their type.
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// File name offered when the edited portrait is downloaded.
pub const DOWNLOAD_FILENAME: &str = "hajj-portrait.png";

const FILE_STEM: &str = "hajj-portrait";

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Maps a MIME type back to a format.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// An image together with its MIME type, displayable as a data URL.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: String,
    data: Vec<u8>,
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl EncodedImage {
    /// Creates an image from raw bytes and an explicit MIME type.
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Creates an image from uploaded bytes.
    ///
    /// The declared type wins when it looks like an image type; otherwise the
    /// type is sniffed from magic bytes, then [`FALLBACK_MIME_TYPE`]. No
    /// further validation is done.
    pub fn from_upload(data: Vec<u8>, declared_mime: Option<&str>) -> Self {
        let mime_type = declared_mime
            .map(|m| m.split(';').next().unwrap_or_default().trim())
            .filter(|m| m.starts_with("image/"))
            .map(str::to_string)
            .or_else(|| ImageFormat::from_magic_bytes(&data).map(|f| f.mime_type().to_string()))
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());
        Self { mime_type, data }
    }

    /// Parses a `data:<mime>;base64,<payload>` string.
    ///
    /// Strings without a comma are treated as a bare base64 payload.
    pub fn from_data_url(input: &str) -> Result<Self> {
        let (header, payload) = match input.split_once(',') {
            Some((header, payload)) => (Some(header), payload),
            None => (None, input),
        };

        let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let data = decode_base64(&cleaned)?;

        let declared = header
            .and_then(|h| h.strip_prefix("data:"))
            .and_then(|h| h.split(';').next())
            .filter(|m| !m.is_empty());

        Ok(Self::from_upload(data, declared))
    }

    /// Returns the MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Returns the raw image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the image, returning the raw bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the size of the image data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Encodes the image data as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Returns the image as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Returns the format implied by the MIME type or the bytes.
    pub fn format(&self) -> Option<ImageFormat> {
        ImageFormat::from_mime_type(&self.mime_type)
            .or_else(|| ImageFormat::from_magic_bytes(&self.data))
    }
}

pub(crate) fn decode_base64(input: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(input)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(input))
        .map_err(|e| PortraitError::Decode(e.to_string()))
}

/// A request to transform a portrait.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// The photo to edit.
    pub image: EncodedImage,
    /// Free-text editing instruction.
    pub prompt: String,
}

impl TransformRequest {
    /// Creates a new request.
    pub fn new(image: EncodedImage, prompt: impl Into<String>) -> Self {
        Self {
            image,
            prompt: prompt.into(),
        }
    }
}

/// Metadata about one transform call.
#[derive(Debug, Clone, Default)]
pub struct TransformMetadata {
    /// Model used for generation.
    pub model: Option<String>,
    /// Round-trip duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Text the model returned alongside the image, if any.
    pub text: Option<String>,
}

/// The edited portrait returned by a transformer.
#[derive(Debug, Clone)]
#[must_use = "transformed image should be stored or saved"]
pub struct TransformedImage {
    /// The edited image.
    pub image: EncodedImage,
    /// Call metadata.
    pub metadata: TransformMetadata,
}

impl TransformedImage {
    /// Creates a new transformed image.
    pub fn new(image: EncodedImage, metadata: TransformMetadata) -> Self {
        Self { image, metadata }
    }

    /// Returns the size of the image data in bytes.
    pub fn size(&self) -> usize {
        self.image.size()
    }

    /// Returns the image as a data URL.
    pub fn to_data_url(&self) -> String {
        self.image.to_data_url()
    }

    /// File name matching the returned format, e.g. `hajj-portrait.jpg`.
    ///
    /// Falls back to [`DOWNLOAD_FILENAME`] when the format is unknown.
    pub fn file_name(&self) -> String {
        match self.image.format() {
            Some(format) => format!("{FILE_STEM}.{}", format.extension()),
            None => DOWNLOAD_FILENAME.to_string(),
        }
    }

    /// Saves the image to the specified path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.image.data())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"short"), None);
    }

    #[test]
    fn test_format_from_extension_and_mime() {
        assert_eq!(ImageFormat::from_extension("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("gif"), None);
        assert_eq!(
            ImageFormat::from_mime_type("image/webp"),
            Some(ImageFormat::WebP)
        );
    }

    #[test]
    fn test_file_name_follows_returned_format() {
        let jpeg = TransformedImage::new(
            EncodedImage::new(JPEG_MAGIC.to_vec(), "image/jpeg"),
            TransformMetadata::default(),
        );
        assert_eq!(jpeg.file_name(), "hajj-portrait.jpg");

        let webp = TransformedImage::new(
            EncodedImage::new(vec![1, 2, 3], "image/webp"),
            TransformMetadata::default(),
        );
        assert_eq!(webp.file_name(), "hajj-portrait.webp");

        let unknown = TransformedImage::new(
            EncodedImage::new(vec![1, 2, 3], "application/octet-stream"),
            TransformMetadata::default(),
        );
        assert_eq!(unknown.file_name(), DOWNLOAD_FILENAME);
    }

    #[test]
    fn test_data_url_prefix_is_stripped() {
        let image = EncodedImage::from_data_url("data:image/webp;base64,AQID").unwrap();
        assert_eq!(image.mime_type(), "image/webp");
        assert_eq!(image.data(), &[1, 2, 3]);
        assert_eq!(image.to_data_url(), "data:image/webp;base64,AQID");
    }

    #[test]
    fn test_bare_base64_is_accepted() {
        let image = EncodedImage::from_data_url("AQID").unwrap();
        assert_eq!(image.data(), &[1, 2, 3]);
        assert_eq!(image.mime_type(), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn test_invalid_base64_is_a_decode_error() {
        let err = EncodedImage::from_data_url("data:image/png;base64,@@@").unwrap_err();
        assert!(matches!(err, PortraitError::Decode(_)));
    }

    #[test]
    fn test_upload_mime_resolution() {
        let declared = EncodedImage::from_upload(vec![1, 2, 3], Some("image/png; charset=binary"));
        assert_eq!(declared.mime_type(), "image/png");

        let sniffed = EncodedImage::from_upload(WEBP_MAGIC.to_vec(), Some("application/octet-stream"));
        assert_eq!(sniffed.mime_type(), "image/webp");

        let unknown = EncodedImage::from_upload(vec![0; 4], None);
        assert_eq!(unknown.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_debug_does_not_dump_bytes() {
        let image = EncodedImage::new(vec![0; 1024], "image/png");
        let debug = format!("{image:?}");
        assert!(debug.contains("len: 1024"));
    }
}
