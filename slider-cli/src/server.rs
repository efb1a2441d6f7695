//! HTTP routing for the slide server.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use slider_core::render::{RenderError, Warning, STYLESHEET_URL};
use slider_core::{OptionOverrides, ServeError, SlideResponse, SlideService};
use slider_render::{ErrorTemplate, IndexTemplate, STYLESHEET};
use slider_types::{DeckId, RenderTarget};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

const WARNING_HEADER: HeaderName = HeaderName::from_static("x-slider-warning");
const BIB_VERSION_HEADER: HeaderName = HeaderName::from_static("x-slider-bib-version");

#[derive(Clone)]
struct AppState {
    service: Arc<SlideService>,
}

/// Build the axum router
pub fn router(service: Arc<SlideService>) -> Router {
    let raw = ServeDir::new(service.catalog().root());
    Router::new()
        .route("/", get(index))
        .route("/deck/{*id}", get(deck_page))
        .route("/api/deck/{*id}", get(api_deck))
        .route("/api/decks", get(api_decks))
        .route("/api/status", get(api_status))
        .route("/healthz", get(healthz))
        .route(STYLESHEET_URL, get(stylesheet))
        .nest_service("/raw", raw)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

#[derive(Debug, Default, Deserialize)]
struct TargetQuery {
    slide: Option<usize>,
}

impl TargetQuery {
    fn target(&self) -> RenderTarget {
        self.slide.map(RenderTarget::Slide).unwrap_or(RenderTarget::Deck)
    }
}

async fn render_request(
    state: &AppState,
    id: &str,
    target: RenderTarget,
    overrides: &OptionOverrides,
) -> Result<SlideResponse, ServeError> {
    let deck = DeckId::parse(id).ok_or_else(|| ServeError::DeckNotFound(id.to_string()))?;
    let options = overrides.apply(state.service.defaults())?;
    state.service.render(&deck, target, options).await
}

async fn index(State(state): State<AppState>) -> Response {
    let page = IndexTemplate::new(&state.service.decks(), &state.service.status());
    match page.to_html() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!("Index page failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Index page failed").into_response()
        }
    }
}

async fn deck_page(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(target): Query<TargetQuery>,
    Query(overrides): Query<OptionOverrides>,
    headers: HeaderMap,
) -> Response {
    match render_request(&state, &id, target.target(), &overrides).await {
        Ok(response) => {
            let meta = response_headers(&response);
            if etag_matches(&headers, &response.etag) {
                return (StatusCode::NOT_MODIFIED, meta).into_response();
            }
            (meta, Html(response.output.html().to_string())).into_response()
        }
        Err(err) => {
            let status = status_for(&err);
            log_failure(&id, status, &err);
            error_page(status, &err.to_string())
        }
    }
}

#[derive(Serialize)]
struct DeckPayload<'a> {
    deck: &'a DeckId,
    target: RenderTarget,
    etag: &'a str,
    bib_version: u64,
    slide_count: usize,
    warnings: &'a [Warning],
    html: &'a str,
}

#[derive(Serialize)]
struct ErrorPayload {
    status: u16,
    error: String,
}

async fn api_deck(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(target): Query<TargetQuery>,
    Query(overrides): Query<OptionOverrides>,
    headers: HeaderMap,
) -> Response {
    match render_request(&state, &id, target.target(), &overrides).await {
        Ok(response) => {
            let meta = response_headers(&response);
            if etag_matches(&headers, &response.etag) {
                return (StatusCode::NOT_MODIFIED, meta).into_response();
            }
            let payload = DeckPayload {
                deck: &response.deck,
                target: response.target,
                etag: &response.etag,
                bib_version: response.bib_version,
                slide_count: response.slide_count(),
                warnings: response.output.warnings(),
                html: response.output.html(),
            };
            (meta, Json(payload)).into_response()
        }
        Err(err) => {
            let status = status_for(&err);
            log_failure(&id, status, &err);
            let payload = ErrorPayload {
                status: status.as_u16(),
                error: err.to_string(),
            };
            (status, Json(payload)).into_response()
        }
    }
}

async fn api_decks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.decks())
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "decks": state.service.catalog().len(),
        "bib_version": state.service.bibliography().version(),
    }))
}

async fn stylesheet() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLESHEET,
    )
}

async fn not_found() -> Response {
    error_page(StatusCode::NOT_FOUND, "No such page")
}

fn status_for(err: &ServeError) -> StatusCode {
    match err {
        ServeError::DeckNotFound(_) | ServeError::SlideNotFound { .. } => StatusCode::NOT_FOUND,
        ServeError::Render(RenderError::SlideOutOfRange { .. }) => StatusCode::NOT_FOUND,
        ServeError::BadOptions(_) => StatusCode::BAD_REQUEST,
        ServeError::Render(RenderError::UnresolvedCitations { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServeError::SlideParse { .. } | ServeError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log_failure(id: &str, status: StatusCode, err: &ServeError) {
    if status.is_server_error() {
        tracing::error!(deck = %id, %status, "render failed: {}", err);
    } else {
        tracing::debug!(deck = %id, %status, "request rejected: {}", err);
    }
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    match ErrorTemplate::new(status.as_u16(), reason, message).to_html() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => {
            tracing::error!("Error page failed: {}", err);
            (status, message.to_string()).into_response()
        }
    }
}

fn response_headers(response: &SlideResponse) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(etag) = HeaderValue::from_str(&response.etag) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(BIB_VERSION_HEADER, HeaderValue::from(response.bib_version));
    for warning in response.output.warnings() {
        if let Ok(value) = HeaderValue::from_str(&header_text(&warning.to_string())) {
            headers.append(WARNING_HEADER, value);
        }
    }
    headers
}

/// Header values must be visible ASCII.
fn header_text(text: &str) -> String {
    text.chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect()
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == "*" || tag == etag)
}
