//! Portrait transformation: image types, the transformer trait and the
//! Gemini-backed implementation.

mod provider;
pub mod providers;
mod types;

pub use provider::ImageTransformer;
pub use providers::{GeminiModel, GeminiTransformer, GeminiTransformerBuilder};
pub use types::{
    EncodedImage, ImageFormat, TransformMetadata, TransformRequest, TransformedImage,
    DOWNLOAD_FILENAME, FALLBACK_MIME_TYPE,
};

