use crate::{
    auth::{AuthError, TokenGuard},
    index::{QueryError, SweepOutcome, SweepPlan, SyncReport},
    semantic::EmbeddingError,
    service::{ImageSearchService, ImagePage, IndexOptions, ServiceError},
    store::StoreError,
};
use anyhow::Context;
use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::signal;

/// Default number of hits for `/query`
const DEFAULT_TOP_K: usize = 24;

#[derive(Clone)]
struct SharedState {
    service: Arc<ImageSearchService>,
    guard: TokenGuard,
    /// Set on shutdown so a running `/index` stops between paths
    cancel: Arc<AtomicBool>,
}

/// Build the HTTP router. `/health` is always open; every other route
/// requires the guard's token when one is configured.
pub fn router(service: Arc<ImageSearchService>, guard: TokenGuard, cancel: Arc<AtomicBool>) -> Router {
    let shared_state = Arc::new(SharedState {
        service,
        guard,
        cancel,
    });

    let protected = Router::new()
        .route("/query", post(query))
        .route("/get-images", get(get_images))
        .route("/index", post(index))
        .route("/dedup", post(dedup))
        .route_layer(middleware::from_fn_with_state(
            shared_state.clone(),
            require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal(cancel: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down, waiting for running requests");
    cancel.store(true, Ordering::SeqCst);
}

async fn start_app(service: Arc<ImageSearchService>) -> anyhow::Result<()> {
    let listen = service.config().server.listen.clone();
    let guard = TokenGuard::new(service.config().auth_token());
    if !guard.is_enabled() {
        log::warn!("no auth token configured, the API is open to anyone who can reach {listen}");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let app = router(service, guard, cancel.clone());

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    log::info!("listening on {listen}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("server error")
}

pub fn start_daemon(service: Arc<ImageSearchService>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(start_app(service))
}

#[derive(Debug)]
enum HttpError {
    Service(ServiceError),
    Auth(AuthError),
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::Auth(_) => StatusCode::UNAUTHORIZED,
            HttpError::Service(err) => service_status(err),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Http(_)
        | StoreError::Status { .. }
        | StoreError::Decode(_)
        | StoreError::Misaligned(_) => StatusCode::BAD_GATEWAY,
        StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn embedding_status(err: &EmbeddingError) -> StatusCode {
    match err {
        EmbeddingError::InvalidImage(_) | EmbeddingError::DegenerateVector(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Query(QueryError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Query(QueryError::DimensionMismatch { .. }) => StatusCode::CONFLICT,
        ServiceError::Query(QueryError::Embedding(e)) | ServiceError::Embedding(e) => {
            embedding_status(e)
        }
        ServiceError::Query(QueryError::Store(e)) | ServiceError::Store(e) => store_status(e),
        ServiceError::Config(_) | ServiceError::Listing { .. } | ServiceError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::Service(err) => write!(f, "{err}"),
            HttpError::Auth(err) => write!(f, "{err}"),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{self:?}");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

impl From<ServiceError> for HttpError {
    fn from(err: ServiceError) -> Self {
        HttpError::Service(err)
    }
}

async fn require_token(
    State(state): State<Arc<SharedState>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match state.guard.check(header) {
        Ok(()) => next.run(request).await,
        Err(err) => HttpError::Auth(err).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct Results<T> {
    results: T,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

async fn query(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<Results<crate::index::QueryResult>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let service = state.service.clone();
    tokio::task::block_in_place(move || {
        let hits = service.search(&payload.query, payload.top_k, payload.offset)?;
        Ok(Json(Results { results: hits }))
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub offset: usize,
}

async fn get_images(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<Results<ImagePage>>, HttpError> {
    let service = state.service.clone();
    tokio::task::block_in_place(move || {
        let page = service.list_page(params.offset)?;
        Ok(Json(Results { results: page }))
    })
}

async fn index(State(state): State<Arc<SharedState>>) -> Result<Json<SyncReport>, HttpError> {
    let service = state.service.clone();
    let cancel = state.cancel.clone();
    tokio::task::block_in_place(move || {
        let report = service.index(IndexOptions {
            cancel: Some(cancel),
            ..Default::default()
        })?;
        Ok(Json(report))
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct DedupRequest {
    /// Delete the planned duplicates instead of only reporting them
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
struct DedupResponse {
    plan: SweepPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<SweepOutcome>,
}

async fn dedup(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<DedupRequest>>,
) -> Result<Json<DedupResponse>, HttpError> {
    let confirm = payload.map(|Json(p)| p.confirm).unwrap_or(false);
    let service = state.service.clone();

    tokio::task::block_in_place(move || {
        let plan = service.plan_dedup(None)?;
        let outcome = if confirm {
            Some(service.apply_dedup(&plan, |_| true)?)
        } else {
            None
        };
        Ok(Json(DedupResponse { plan, outcome }))
    })
}
