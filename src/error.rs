//! Error types for portrait transformation.

/// Fallback shown when the remote service fails without a usable message.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to transform image.";

/// Errors that can occur while transforming a portrait.
///
/// The `Display` output of every variant is meant to be shown to the user
/// as-is, so it is phrased as a sentence rather than a debug string.
#[derive(Debug, thiserror::Error)]
pub enum PortraitError {
    /// No API key was configured. Raised before any network I/O.
    #[error("API key is missing. Set GEMINI_API_KEY (or API_KEY) before transforming images.")]
    MissingCredential,

    /// API key was rejected by the remote service. Carries the service's
    /// own message.
    #[error("{0}")]
    Auth(String),

    /// The remote service answered with an error status.
    #[error("{message}")]
    Api {
        /// HTTP status code of the failed call.
        status: u16,
        /// Message extracted from the error body, shown to the user verbatim.
        message: String,
    },

    /// The remote call succeeded but no image part came back.
    #[error("The AI did not return an edited image. Please try again.")]
    NoImageReturned,

    /// Content was blocked by the service's safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP error.
    #[error("{}", network_message(.0))]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// I/O error (e.g., reading an input file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn network_message(err: &reqwest::Error) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        GENERIC_FAILURE_MESSAGE.to_string()
    } else {
        message
    }
}

impl PortraitError {
    /// Builds an [`PortraitError::Api`] from a raw error body.
    ///
    /// Google APIs wrap failures as `{"error": {"message": "..."}}`; that
    /// message is preferred. Plain-text bodies are used directly and an empty
    /// body falls back to [`GENERIC_FAILURE_MESSAGE`].
    pub fn from_api_body(status: u16, body: &str) -> Self {
        Self::Api {
            status,
            message: extract_error_message(body),
        }
    }
}

/// Extracts a human readable message from an API error body.
pub(crate) fn extract_error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct Envelope {
        error: Option<Detail>,
    }
    #[derive(serde::Deserialize)]
    struct Detail {
        message: Option<String>,
    }

    if let Ok(Envelope {
        error: Some(Detail {
            message: Some(message),
        }),
    }) = serde_json::from_str::<Envelope>(body)
    {
        if !message.trim().is_empty() {
            return message;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with('<') {
        return GENERIC_FAILURE_MESSAGE.to_string();
    }

    // Keep stray HTML or proxy pages from flooding the error area.
    const MAX_LEN: usize = 300;
    match trimmed.char_indices().nth(MAX_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Result type alias for portrait operations.
pub type Result<T> = std::result::Result<T, PortraitError>;
