#![warn(missing_docs)]
//! Hajj Portrait - edit a portrait into a Hajj pilgrim photo with Gemini.
//!
//! The crate has two halves: a [`GeminiTransformer`] that sends one photo
//! and prompt to Gemini's image model and returns the edited picture, and a
//! [`SessionController`] that tracks what a single user has uploaded,
//! generated or been told went wrong.
//!
//! # Quick Start
//!
//! ```no_run
//! use hajj_portrait::{EncodedImage, GeminiTransformer, ImageTransformer, TransformRequest};
//!
//! #[tokio::main]
//! async fn main() -> hajj_portrait::Result<()> {
//!     let transformer = GeminiTransformer::builder().api_key("my-key").build()?;
//!     let photo = EncodedImage::from_upload(std::fs::read("me.jpg")?, None);
//!     let request = TransformRequest::new(photo, hajj_portrait::DEFAULT_PROMPT);
//!     let edited = transformer.transform(&request).await?;
//!     edited.save(hajj_portrait::DOWNLOAD_FILENAME)?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `server`: axum web UI with one session per browser tab
//! - `cli`: `hajj-portrait` command-line binary

pub mod config;
mod error;
pub mod image;
pub mod session;

#[cfg(feature = "server")]
pub mod server;

// Re-export error types at crate root
pub use error::{PortraitError, Result, GENERIC_FAILURE_MESSAGE};

pub use config::{load_settings, Settings};
pub use image::{
    EncodedImage, GeminiModel, GeminiTransformer, ImageFormat, ImageTransformer,
    TransformRequest, TransformedImage, DOWNLOAD_FILENAME,
};
pub use session::{
    SessionController, SessionSnapshot, SessionState, TransformOutcome, DEFAULT_PROMPT,
};
