//! Web front end: serves the single page and exposes each session's actions
//! as JSON endpoints.

use crate::config::Settings;
use crate::error::Result;
use crate::image::{EncodedImage, ImageTransformer, DOWNLOAD_FILENAME};
use crate::session::{SessionController, SessionSnapshot};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Transformer shared by every session.
pub type SharedTransformer = Arc<dyn ImageTransformer>;

type Session = SessionController<SharedTransformer>;

/// How often idle sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Resource limits for the web front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Sessions untouched for longer than this are dropped.
    pub session_ttl: Duration,
    /// Creating a session beyond this count evicts the least recently used.
    pub max_sessions: usize,
}

impl ServerLimits {
    /// Reads the limits out of `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_upload_bytes: settings.max_upload_bytes,
            session_ttl: Duration::from_secs(settings.session_ttl_secs),
            max_sessions: settings.max_sessions.max(1),
        }
    }
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

struct SessionEntry {
    session: Arc<Session>,
    last_seen: Instant,
    /// Monotonic use counter; breaks ties between equal `last_seen` values.
    touch: u64,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<Uuid, SessionEntry>,
    next_touch: u64,
}

impl Registry {
    fn touch(&mut self) -> u64 {
        self.next_touch += 1;
        self.next_touch
    }
}

struct AppState {
    transformer: SharedTransformer,
    limits: ServerLimits,
    sessions: Mutex<Registry>,
}

impl AppState {
    fn new(transformer: SharedTransformer, limits: ServerLimits) -> Arc<Self> {
        Arc::new(Self {
            transformer,
            limits,
            sessions: Mutex::new(Registry::default()),
        })
    }

    async fn create(&self) -> (Uuid, Arc<Session>) {
        let id = Uuid::new_v4();
        let session = Arc::new(SessionController::new(self.transformer.clone()));

        let mut registry = self.sessions.lock().await;
        while registry.entries.len() >= self.limits.max_sessions {
            let Some(oldest) = registry
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_seen, e.touch))
                .map(|(id, _)| *id)
            else {
                break;
            };
            registry.entries.remove(&oldest);
            tracing::debug!(id = %oldest, "session evicted to stay under the cap");
        }
        let touch = registry.touch();
        registry.entries.insert(
            id,
            SessionEntry {
                session: session.clone(),
                last_seen: Instant::now(),
                touch,
            },
        );
        (id, session)
    }

    async fn session(&self, id: Uuid) -> std::result::Result<Arc<Session>, ApiError> {
        let mut registry = self.sessions.lock().await;
        let touch = registry.touch();
        let entry = registry
            .entries
            .get_mut(&id)
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "unknown session"))?;
        entry.last_seen = Instant::now();
        entry.touch = touch;
        Ok(entry.session.clone())
    }

    /// Drops sessions idle for longer than the TTL as of `now`.
    async fn evict_idle(&self, now: Instant) -> usize {
        let ttl = self.limits.session_ttl;
        let mut registry = self.sessions.lock().await;
        let before = registry.entries.len();
        registry
            .entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen) <= ttl);
        before - registry.entries.len()
    }
}

fn spawn_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = state.evict_idle(Instant::now()).await;
            if evicted > 0 {
                tracing::debug!(evicted, "idle sessions dropped");
            }
        }
    });
}

#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
struct CreatedSession {
    id: Uuid,
    state: SessionSnapshot,
}

#[derive(Debug, Deserialize)]
struct PromptRequest {
    prompt: String,
}

/// Starts the web UI on the configured address and serves until the
/// process is stopped.
pub async fn serve(settings: &Settings) -> Result<()> {
    let transformer = settings.transformer()?;
    if !transformer.has_credential() {
        tracing::warn!("no API key configured; transforms will fail until one is set");
    }
    let state = AppState::new(Arc::new(transformer), ServerLimits::from_settings(settings));
    spawn_sweeper(state.clone());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    info!(addr = %listener.local_addr()?, model = %settings.model, "web UI listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the router around `transformer`.
///
/// The session cap applies, but idle sessions are only swept by [`serve`].
pub fn build_router(transformer: SharedTransformer, limits: ServerLimits) -> Router {
    router(AppState::new(transformer, limits))
}

fn router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.limits.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/upload", post(upload))
        .route("/api/sessions/:id/prompt", put(set_prompt))
        .route("/api/sessions/:id/transform", post(transform))
        .route("/api/sessions/:id/reset", post(reset))
        .route("/api/sessions/:id/download", get(download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (id, session) = state.create().await;
    let snapshot = session.snapshot().await;
    tracing::debug!(%id, "session created");

    (
        StatusCode::CREATED,
        Json(CreatedSession {
            id,
            state: snapshot,
        }),
    )
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = state.session(id).await?;
    Ok(Json(session.snapshot().await))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = state.session(id).await?;
    if body.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "empty upload"));
    }

    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    session
        .upload(EncodedImage::from_upload(body.to_vec(), declared))
        .await;
    Ok(Json(session.snapshot().await))
}

async fn set_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PromptRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = state.session(id).await?;
    session.set_prompt(req.prompt).await;
    Ok(Json(session.snapshot().await))
}

async fn transform(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = state.session(id).await?;

    // Detached so a dropped connection does not abandon the state mid-flight.
    let task = tokio::spawn({
        let session = session.clone();
        async move { session.transform().await }
    });
    let outcome = task.await.map_err(|e| {
        error!(%id, "transform task failed: {e}");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "transform task failed")
    })?;
    tracing::debug!(%id, ?outcome, "transform settled");

    Ok(Json(session.snapshot().await))
}

async fn reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = state.session(id).await?;
    session.reset().await;
    Ok(Json(session.snapshot().await))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let session = state.session(id).await?;
    let edited = session
        .state()
        .await
        .edited
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no edited image yet"))?;

    let content_type = HeaderValue::from_str(edited.mime_type())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = format!("attachment; filename=\"{DOWNLOAD_FILENAME}\"");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_str(&disposition)
                    .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
            ),
        ],
        edited.into_data(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortraitError;
    use crate::image::{GeminiTransformer, TransformMetadata, TransformRequest, TransformedImage};
    use async_trait::async_trait;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    struct Inverter;

    #[async_trait]
    impl ImageTransformer for Inverter {
        async fn transform(&self, request: &TransformRequest) -> Result<TransformedImage> {
            if request.prompt == "fail" {
                return Err(PortraitError::NoImageReturned);
            }
            let data = request.image.data().iter().map(|b| !b).collect();
            Ok(TransformedImage::new(
                EncodedImage::new(data, "image/png"),
                TransformMetadata::default(),
            ))
        }

        fn name(&self) -> &str {
            "inverter"
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn limits() -> ServerLimits {
        ServerLimits {
            max_upload_bytes: 1024,
            ..ServerLimits::default()
        }
    }

    fn app() -> Router {
        build_router(Arc::new(Inverter), limits())
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    async fn create(app: &Router) -> Uuid {
        let response = app
            .clone()
            .oneshot(Request::post("/api/sessions").body(Body::empty()).unwrap())
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: CreatedSession = json_body(response).await;
        assert!(created.state.original.is_none());
        created.id
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.expect("response")
    }

    fn upload_request(id: Uuid, bytes: Vec<u8>) -> Request<Body> {
        Request::post(format!("/api/sessions/{id}/upload"))
            .header("content-type", "image/jpeg")
            .body(Body::from(bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_serves_page() {
        let response = send(&app(), Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Hajj Portrait Transformer"));
    }

    #[tokio::test]
    async fn test_upload_transform_download_flow() {
        let app = app();
        let id = create(&app).await;

        let response = send(&app, upload_request(id, vec![0, 1, 2])).await;
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: SessionSnapshot = json_body(response).await;
        assert_eq!(snapshot.original.as_deref(), Some("data:image/jpeg;base64,AAEC"));

        let response = send(
            &app,
            Request::post(format!("/api/sessions/{id}/transform"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let snapshot: SessionSnapshot = json_body(response).await;
        assert!(!snapshot.loading);
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.edited.as_deref(), Some("data:image/png;base64,//79"));

        let response = send(
            &app,
            Request::get(format!("/api/sessions/{id}/download"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"hajj-portrait.png\""
        );
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), &[255, 254, 253]);
    }

    #[tokio::test]
    async fn test_failure_is_reported_in_state() {
        let app = app();
        let id = create(&app).await;
        send(&app, upload_request(id, vec![1])).await;

        let response = send(
            &app,
            Request::put(format!("/api/sessions/{id}/prompt"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({ "prompt": "fail" }).to_string()))
                .unwrap(),
        )
        .await;
        let snapshot: SessionSnapshot = json_body(response).await;
        assert_eq!(snapshot.prompt, "fail");

        let response = send(
            &app,
            Request::post(format!("/api/sessions/{id}/transform"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let snapshot: SessionSnapshot = json_body(response).await;
        assert_eq!(
            snapshot.error.as_deref(),
            Some("The AI did not return an edited image. Please try again.")
        );
        assert!(snapshot.edited.is_none());

        let response = send(
            &app,
            Request::get(format!("/api/sessions/{id}/download"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_clears_session() {
        let app = app();
        let id = create(&app).await;
        send(&app, upload_request(id, vec![1, 2])).await;

        let response = send(
            &app,
            Request::post(format!("/api/sessions/{id}/reset"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let snapshot: SessionSnapshot = json_body(response).await;
        assert!(snapshot.original.is_none());
        assert!(snapshot.edited.is_none());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_and_bad_uploads_are_rejected() {
        let app = app();
        let response = send(
            &app,
            Request::get(format!("/api/sessions/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let id = create(&app).await;
        let response = send(&app, upload_request(id, Vec::new())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, upload_request(id, vec![0; 4096])).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_missing_credential_surfaces_in_error_area() {
        let transformer = GeminiTransformer::builder()
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();
        let app = build_router(Arc::new(transformer), limits());
        let id = create(&app).await;
        send(&app, upload_request(id, vec![1, 2, 3])).await;

        let response = send(
            &app,
            Request::post(format!("/api/sessions/{id}/transform"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let snapshot: SessionSnapshot = json_body(response).await;
        assert!(snapshot
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("API key is missing")));
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let state = AppState::new(
            Arc::new(Inverter),
            ServerLimits {
                session_ttl: Duration::from_secs(60),
                ..limits()
            },
        );
        let (stale, _) = state.create().await;
        let (fresh, _) = state.create().await;

        let later = Instant::now() + Duration::from_secs(61);
        // Keep one session alive by touching it right before the sweep.
        state.sessions.lock().await.entries.get_mut(&fresh).unwrap().last_seen = later;

        assert_eq!(state.evict_idle(later).await, 1);
        assert!(state.session(stale).await.is_err());
        assert!(state.session(fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_cap_evicts_least_recently_used() {
        let state = AppState::new(
            Arc::new(Inverter),
            ServerLimits {
                max_sessions: 2,
                ..limits()
            },
        );
        let app = router(state.clone());

        let first = create(&app).await;
        let second = create(&app).await;
        // Using the first session makes the second the eviction candidate.
        let response = send(
            &app,
            Request::get(format!("/api/sessions/{first}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let third = create(&app).await;
        assert_eq!(state.sessions.lock().await.entries.len(), 2);

        let status = |id: Uuid| {
            let app = app.clone();
            async move {
                send(
                    &app,
                    Request::get(format!("/api/sessions/{id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .status()
            }
        };
        assert_eq!(status(second).await, StatusCode::NOT_FOUND);
        assert_eq!(status(first).await, StatusCode::OK);
        assert_eq!(status(third).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reset_sessions_still_count_toward_cap() {
        let state = AppState::new(
            Arc::new(Inverter),
            ServerLimits {
                max_sessions: 3,
                ..limits()
            },
        );
        let app = router(state.clone());
        for _ in 0..10 {
            let id = create(&app).await;
            send(
                &app,
                Request::post(format!("/api/sessions/{id}/reset"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        }
        assert_eq!(state.sessions.lock().await.entries.len(), 3);
    }
}
