//! Gemini (Google) portrait transformer.

use crate::error::{extract_error_message, PortraitError, Result, GENERIC_FAILURE_MESSAGE};
use crate::image::provider::ImageTransformer;
use crate::image::types::{
    decode_base64, EncodedImage, TransformMetadata, TransformRequest, TransformedImage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Default Gemini REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Instruction used when a request arrives with a blank prompt.
pub const FALLBACK_PROMPT: &str = "Maintain the exact face, facial structure, and identity of the person in the image. Change their clothing to white Ihram garments as worn by pilgrims in Mecca performing Hajj. The background MUST be the Grand Mosque (Masjid al-Haram) specifically showing the Kaaba area in Mecca. Ensure the lighting is natural, the perspective is realistic, and the overall image looks respectful and high-quality.";

/// Gemini image model variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Gemini 2.5 Flash Image (fast, economical).
    #[default]
    FlashImage,
    /// Gemini 3 Pro Image (highest quality).
    ProImage,
    /// Any other model identifier.
    Other(String),
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::FlashImage => "gemini-2.5-flash-image",
            Self::ProImage => "gemini-3-pro-image-preview",
            Self::Other(name) => name,
        }
    }

    /// Maps a model identifier to a variant.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "" | "gemini-2.5-flash-image" => Self::FlashImage,
            "gemini-3-pro-image-preview" => Self::ProImage,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for [`GeminiTransformer`].
#[derive(Debug, Clone, Default)]
pub struct GeminiTransformerBuilder {
    api_key: Option<String>,
    model: GeminiModel,
    base_url: Option<String>,
}

impl GeminiTransformerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets or clears the API key.
    ///
    /// A missing key is not a build error: every transform fails with
    /// [`PortraitError::MissingCredential`] instead.
    pub fn maybe_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Sets the Gemini model variant.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Builds the transformer.
    pub fn build(self) -> Result<GeminiTransformer> {
        let api_key = self.api_key.filter(|k| !k.trim().is_empty());
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(GeminiTransformer {
            client: reqwest::Client::builder().build()?,
            api_key,
            model: self.model,
            base_url,
        })
    }
}

/// Portrait transformer backed by Gemini's `generateContent` endpoint.
pub struct GeminiTransformer {
    client: reqwest::Client,
    api_key: Option<String>,
    model: GeminiModel,
    base_url: String,
}

impl std::fmt::Debug for GeminiTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTransformer")
            .field("has_api_key", &self.api_key.is_some())
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiTransformer {
    /// Creates a new `GeminiTransformerBuilder`.
    pub fn builder() -> GeminiTransformerBuilder {
        GeminiTransformerBuilder::new()
    }

    /// Returns the configured model.
    pub fn model(&self) -> &GeminiModel {
        &self.model
    }

    /// Returns true when an API key is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn credential(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or(PortraitError::MissingCredential)
    }

    async fn transform_impl(&self, request: &TransformRequest) -> Result<TransformedImage> {
        let api_key = self.credential()?;
        let start = Instant::now();

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            self.model.as_str(),
        );

        let body = GeminiRequest::from_transform_request(request);

        tracing::debug!(
            model = %self.model,
            mime_type = request.image.mime_type(),
            input_bytes = request.image.size(),
            "sending Gemini transform request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        let (image, text) = extract_image(gemini_response)?;

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            output_bytes = image.size(),
            duration_ms,
            "Gemini transform complete"
        );

        Ok(TransformedImage::new(
            image,
            TransformMetadata {
                model: Some(self.model.as_str().to_string()),
                duration_ms: Some(duration_ms),
                text,
            },
        ))
    }
}

fn parse_error(status: u16, text: &str) -> PortraitError {
    let message = extract_error_message(text);
    let has_remote_message = message != GENERIC_FAILURE_MESSAGE;
    match status {
        401 | 403 => PortraitError::Auth(message),
        404 if has_remote_message => PortraitError::Api { status, message },
        404 => PortraitError::InvalidRequest(
            "Model not found. Verify the model name is correct.".into(),
        ),
        _ => {
            let lower = message.to_lowercase();
            if lower.contains("safety") || lower.contains("prohibited") {
                PortraitError::ContentBlocked(message)
            } else {
                PortraitError::Api { status, message }
            }
        }
    }
}

/// Returns the first inline image of the first candidate.
///
/// When no part carries image data, block reasons reported by the service
/// are turned into [`PortraitError::ContentBlocked`]; anything else is
/// [`PortraitError::NoImageReturned`].
fn extract_image(response: GeminiResponse) -> Result<(EncodedImage, Option<String>)> {
    let candidate = response.candidates.into_iter().next();

    let mut text = None;
    let mut finish_reason = None;
    if let Some(candidate) = candidate {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                let data = decode_base64(&inline.data)?;
                let mime_type = inline
                    .mime_type
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "image/png".to_string());
                return Ok((EncodedImage::new(data, mime_type), text));
            }
            if text.is_none() {
                text = part.text;
            }
        }
    }

    if let Some(feedback) = response.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            let msg = feedback
                .block_reason_message
                .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
            return Err(PortraitError::ContentBlocked(msg));
        }
    }

    if let Some(reason) = finish_reason.as_deref() {
        if matches!(
            reason,
            "SAFETY"
                | "IMAGE_SAFETY"
                | "IMAGE_PROHIBITED_CONTENT"
                | "PROHIBITED_CONTENT"
                | "BLOCKLIST"
                | "RECITATION"
                | "IMAGE_RECITATION"
        ) {
            return Err(PortraitError::ContentBlocked(format!(
                "Content blocked by Gemini safety filter: {}",
                reason
            )));
        }
    }

    Err(PortraitError::NoImageReturned)
}

#[async_trait]
impl ImageTransformer for GeminiTransformer {
    async fn transform(&self, request: &TransformRequest) -> Result<TransformedImage> {
        self.transform_impl(request).await
    }

    fn name(&self) -> &str {
        "Gemini (Google)"
    }

    async fn health_check(&self) -> Result<()> {
        let api_key = self.credential()?;
        let url = format!("{}/v1beta/models/{}", self.base_url, self.model.as_str());

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(PortraitError::Auth("Invalid API key".into())),
            404 => Err(PortraitError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            s if !(200..300).contains(&s) => {
                let text = response.text().await.unwrap_or_default();
                Err(PortraitError::from_api_body(s, &text))
            }
            _ => Ok(()),
        }
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - either inline image data or text.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
}

impl GeminiRequest {
    fn from_transform_request(req: &TransformRequest) -> Self {
        let prompt = if req.prompt.trim().is_empty() {
            FALLBACK_PROMPT.to_string()
        } else {
            req.prompt.clone()
        };

        let parts = vec![
            GeminiRequestPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: req.image.mime_type().to_string(),
                    data: req.image.to_base64(),
                },
            },
            GeminiRequestPart::Text { text: prompt },
        ];

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}
