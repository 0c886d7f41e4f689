//! Runtime settings.
//!
//! Settings are resolved once at start-up: built-in defaults, then the
//! optional `hajj-portrait.toml`, then environment variables. The credential
//! is handed to the transformer from here and never read again.

use crate::error::{PortraitError, Result};
use crate::image::{GeminiModel, GeminiTransformer};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Default settings file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "hajj-portrait.toml";

/// Environment variables checked for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Resolved runtime settings.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Socket address the web UI listens on.
    pub bind: String,
    /// Gemini API key. `None` makes every transform fail.
    pub api_key: Option<String>,
    /// Gemini model identifier.
    pub model: String,
    /// Override for the Gemini endpoint.
    pub base_url: Option<String>,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    /// Seconds a web session may sit idle before it is dropped.
    pub session_ttl_secs: u64,
    /// Most web sessions held at once.
    pub max_sessions: usize,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bind", &self.bind)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            api_key: None,
            model: "gemini-2.5-flash-image".into(),
            base_url: None,
            max_upload_bytes: 10 * 1024 * 1024,
            session_ttl_secs: 30 * 60,
            max_sessions: 1000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    bind: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    max_upload_bytes: Option<usize>,
    session_ttl_secs: Option<u64>,
    max_sessions: Option<usize>,
}

/// Loads settings from `path` (if it exists) and the process environment.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    if raw.is_some() {
        tracing::debug!(path = %path.display(), "loaded settings file");
    }
    Settings::from_sources(raw.as_deref(), |key| std::env::var(key).ok())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        PortraitError::Config(format!("{key} must be a non-negative number, got '{value}'"))
    })
}

impl Settings {
    /// Resolves settings from a TOML document and an environment lookup.
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(raw) = file {
            let file_cfg: FileSettings =
                toml::from_str(raw).map_err(|e| PortraitError::Config(e.to_string()))?;
            if let Some(v) = file_cfg.bind {
                settings.bind = v;
            }
            if let Some(v) = file_cfg.api_key {
                settings.api_key = Some(v);
            }
            if let Some(v) = file_cfg.model {
                settings.model = v;
            }
            if let Some(v) = file_cfg.base_url {
                settings.base_url = Some(v);
            }
            if let Some(v) = file_cfg.max_upload_bytes {
                settings.max_upload_bytes = v;
            }
            if let Some(v) = file_cfg.session_ttl_secs {
                settings.session_ttl_secs = v;
            }
            if let Some(v) = file_cfg.max_sessions {
                settings.max_sessions = v;
            }
        }

        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = env("HAJJ_PORTRAIT_BIND") {
            settings.bind = v;
        }
        if let Some(v) = API_KEY_ENV_VARS.iter().find_map(|key| env(*key)) {
            settings.api_key = Some(v);
        }
        if let Some(v) = env("HAJJ_PORTRAIT_MODEL") {
            settings.model = v;
        }
        if let Some(v) = env("HAJJ_PORTRAIT_BASE_URL") {
            settings.base_url = Some(v);
        }
        if let Some(v) = env("HAJJ_PORTRAIT_MAX_UPLOAD_BYTES") {
            settings.max_upload_bytes = parse_number("HAJJ_PORTRAIT_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = env("HAJJ_PORTRAIT_SESSION_TTL_SECS") {
            settings.session_ttl_secs = parse_number("HAJJ_PORTRAIT_SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = env("HAJJ_PORTRAIT_MAX_SESSIONS") {
            settings.max_sessions = parse_number("HAJJ_PORTRAIT_MAX_SESSIONS", &v)?;
        }
        if settings.max_sessions == 0 {
            return Err(PortraitError::Config("max_sessions must be at least 1".into()));
        }

        settings.api_key = settings.api_key.filter(|k| !k.trim().is_empty());
        Ok(settings)
    }

    /// Builds the Gemini transformer these settings describe.
    pub fn transformer(&self) -> Result<GeminiTransformer> {
        let mut builder = GeminiTransformer::builder()
            .maybe_api_key(self.api_key.clone())
            .model(GeminiModel::from_name(&self.model));
        if let Some(url) = &self.base_url {
            builder = builder.base_url(url);
        }
        builder.build()
    }
}
