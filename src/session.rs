//! Per-session state and the actions a user can take on it.
//!
//! A [`SessionController`] owns one [`SessionState`] and drives it through
//! upload, prompt edits, transform and reset. State lives behind an async
//! mutex that is never held while the remote call is in flight, so readers
//! always observe `loading == true` for the whole duration of a transform.

use crate::image::{EncodedImage, ImageTransformer, TransformRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Prompt a fresh session starts with.
pub const DEFAULT_PROMPT: &str = "Maintain my face and structure exactly, but put me in white Ihram clothes like a Hajj pilgrim. The background should be the Kaaba area in Mecca.";

/// The four user-visible fields of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// The uploaded photo.
    pub original: Option<EncodedImage>,
    /// The most recent successful result.
    pub edited: Option<EncodedImage>,
    /// True only while a transform is outstanding.
    pub loading: bool,
    /// Message of the most recent failure.
    pub error: Option<String>,
}

impl SessionState {
    /// Returns true if nothing has been uploaded, generated or reported.
    pub fn is_empty(&self) -> bool {
        self.original.is_none() && self.edited.is_none() && self.error.is_none() && !self.loading
    }
}

/// JSON view of a session, with images rendered as data URLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Uploaded photo as a data URL.
    pub original: Option<String>,
    /// Edited photo as a data URL.
    pub edited: Option<String>,
    /// True while a transform is outstanding.
    pub loading: bool,
    /// Last failure message.
    pub error: Option<String>,
    /// Current editing instruction.
    pub prompt: String,
}

/// What a call to [`SessionController::transform`] ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// No original image, or another transform was already running.
    Skipped,
    /// The result was stored as the edited image.
    Succeeded,
    /// The failure message was stored as the error.
    Failed(String),
    /// The session was reset or re-uploaded while the call was in flight.
    Discarded,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    prompt: String,
    /// Bumped by reset and upload; results from an older generation are dropped.
    generation: u64,
    /// Id of the transform that currently owns `loading`.
    in_flight: Option<u64>,
    next_request: u64,
}

/// Drives one session's state through user actions.
pub struct SessionController<T> {
    transformer: T,
    inner: Mutex<Inner>,
}

impl<T: ImageTransformer> SessionController<T> {
    /// Creates an empty session using `transformer` for edits.
    pub fn new(transformer: T) -> Self {
        Self {
            transformer,
            inner: Mutex::new(Inner {
                state: SessionState::default(),
                prompt: DEFAULT_PROMPT.to_string(),
                generation: 0,
                in_flight: None,
                next_request: 0,
            }),
        }
    }

    /// Returns a copy of the current state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    /// Returns the current prompt.
    pub async fn prompt(&self) -> String {
        self.inner.lock().await.prompt.clone()
    }

    /// Returns the JSON view of the session.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            original: inner.state.original.as_ref().map(EncodedImage::to_data_url),
            edited: inner.state.edited.as_ref().map(EncodedImage::to_data_url),
            loading: inner.state.loading,
            error: inner.state.error.clone(),
            prompt: inner.prompt.clone(),
        }
    }

    /// Stores a new original image and clears any previous result or error.
    ///
    /// A transform already in flight keeps `loading` set until it settles;
    /// its result is then dropped.
    pub async fn upload(&self, image: EncodedImage) {
        let mut inner = self.inner.lock().await;
        tracing::debug!(
            mime_type = image.mime_type(),
            bytes = image.size(),
            "portrait uploaded"
        );
        inner.state.original = Some(image);
        inner.state.edited = None;
        inner.state.error = None;
        inner.generation += 1;
    }

    /// Replaces the editing instruction.
    pub async fn set_prompt(&self, prompt: impl Into<String>) {
        self.inner.lock().await.prompt = prompt.into();
    }

    /// Sends the original image and prompt to the transformer.
    ///
    /// State is updated twice: `loading` is set before the call and cleared
    /// when it settles, together with either `edited` or `error`.
    pub async fn transform(&self) -> TransformOutcome {
        let (request, generation, request_id) = {
            let mut inner = self.inner.lock().await;
            if inner.state.loading {
                return TransformOutcome::Skipped;
            }
            let Some(original) = inner.state.original.clone() else {
                return TransformOutcome::Skipped;
            };
            inner.state.loading = true;
            inner.state.error = None;
            inner.next_request += 1;
            let request_id = inner.next_request;
            inner.in_flight = Some(request_id);
            (
                TransformRequest::new(original, inner.prompt.clone()),
                inner.generation,
                request_id,
            )
        };

        let result = self.transformer.transform(&request).await;

        let mut inner = self.inner.lock().await;
        // After a reset another transform may own `loading` by now.
        if inner.in_flight == Some(request_id) {
            inner.in_flight = None;
            inner.state.loading = false;
        }
        if inner.generation != generation {
            tracing::debug!(
                started = generation,
                current = inner.generation,
                "discarding stale transform result"
            );
            return TransformOutcome::Discarded;
        }

        match result {
            Ok(transformed) => {
                tracing::debug!(
                    bytes = transformed.size(),
                    transformer = self.transformer.name(),
                    "transform succeeded"
                );
                inner.state.edited = Some(transformed.image);
                inner.state.error = None;
                TransformOutcome::Succeeded
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    transformer = self.transformer.name(),
                    "transform failed: {message}"
                );
                inner.state.error = Some(message.clone());
                TransformOutcome::Failed(message)
            }
        }
    }

    /// Returns the session to its empty state.
    ///
    /// An in-flight transform keeps running, but its result is discarded.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::default();
        inner.in_flight = None;
        inner.generation += 1;
    }
}
