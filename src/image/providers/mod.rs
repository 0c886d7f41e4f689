//! Image transformation backends.

mod gemini;

pub use gemini::{
    GeminiModel, GeminiTransformer, GeminiTransformerBuilder, DEFAULT_BASE_URL, FALLBACK_PROMPT,
};
