//! HTTP route handlers for the FilterSync server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /health` - Health check endpoint
//! - `GET|PUT /apps/{app}/filters` - Read or replace an application's catalog
//! - `GET|PUT /apps/{app}/filters/{key}/count` - Read or overwrite a counter
//! - `POST /apps/{app}/notifications` - Publish a notification
//! - `GET /apps/{app}/notifications` - Newline-delimited JSON notification stream
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - The filter registry (catalogs and counts)
//! - The notification hub fanning events out to streaming clients
//! - A shutdown flag that ends open notification streams
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use filtersync_server::registry::Registry;
//! use filtersync_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = AppState::new(Registry::new());
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use filtersync_engine::types::{Filter, MatchHints, NotificationEvent};

use crate::broadcast::{AppSubscription, NotificationHub};
use crate::error::ApiError;
use crate::registry::Registry;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Content type of the notification stream.
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Cloned for each request handler; clones share every component.
#[derive(Clone)]
pub struct AppState {
    /// Catalogs and counts.
    pub registry: Arc<Registry>,

    /// Notification fan-out.
    pub hub: NotificationHub,

    /// Flips to `true` when the server begins shutting down.
    shutdown: Arc<watch::Sender<bool>>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state around `registry` with a default hub.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self::with_components(registry, NotificationHub::new())
    }

    /// Creates application state with a custom hub.
    ///
    /// Useful for testing or when a custom channel capacity is needed.
    #[must_use]
    pub fn with_components(registry: Registry, hub: NotificationHub) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Arc::new(registry),
            hub,
            shutdown: Arc::new(shutdown),
            start_time: Instant::now(),
        }
    }

    /// Ends every open notification stream and refuses new ones.
    ///
    /// Open streams would otherwise keep graceful shutdown waiting forever.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
        info!(
            subscribers = self.hub.subscriber_count(),
            "Closing notification streams"
        );
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("hub", &self.hub)
            .field("shutting_down", &self.is_shutting_down())
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Example
///
/// ```rust
/// use filtersync_server::registry::Registry;
/// use filtersync_server::routes::{create_router, AppState};
///
/// let router = create_router(AppState::new(Registry::new()));
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/apps/{app}/filters", get(get_filters).put(put_filters))
        .route(
            "/apps/{app}/filters/{key}/count",
            get(get_count).put(put_count),
        )
        .route(
            "/apps/{app}/notifications",
            get(get_notifications).post(post_notification),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Parses a JSON body, reporting failures as validation errors.
///
/// Malformed bodies get the same error shape as every other rejection.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Invalid request body");
        ApiError::validation(format!("invalid request body: {e}"))
    })
}

// ============================================================================
// Filters
// ============================================================================

/// GET /apps/{app}/filters - The application's catalog, in order.
async fn get_filters(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Json<Vec<Filter>>, ApiError> {
    state.registry.filters(&app).map(Json)
}

/// PUT /apps/{app}/filters - Replace the application's catalog.
///
/// Creates the application if needed. Ids and keys must be unique.
///
/// # Responses
///
/// - `200 OK` - The stored catalog
/// - `400 Bad Request` - Malformed body or duplicate id/key
async fn put_filters(
    State(state): State<AppState>,
    Path(app): Path<String>,
    body: Bytes,
) -> Result<Json<Vec<Filter>>, ApiError> {
    let filters: Vec<Filter> = parse_json(&body)?;
    state.registry.replace_filters(&app, filters.clone())?;
    info!(app = %app, filters = filters.len(), "Catalog updated");
    Ok(Json(filters))
}

// ============================================================================
// Counts
// ============================================================================

/// Body of count reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBody {
    pub count: u64,
}

/// GET /apps/{app}/filters/{key}/count - The filter's stored count.
async fn get_count(
    State(state): State<AppState>,
    Path((app, key)): Path<(String, String)>,
) -> Result<Json<CountBody>, ApiError> {
    let count = state.registry.count(&app, &key)?;
    Ok(Json(CountBody { count }))
}

/// PUT /apps/{app}/filters/{key}/count - Overwrite the filter's count.
async fn put_count(
    State(state): State<AppState>,
    Path((app, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<CountBody>, ApiError> {
    let CountBody { count } = parse_json(&body)?;
    state.registry.set_count(&app, &key, count)?;
    debug!(app = %app, key = %key, count, "Count updated");
    Ok(Json(CountBody { count }))
}

// ============================================================================
// Notifications
// ============================================================================

/// Request body for publishing a notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub subject_id: String,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub hints: MatchHints,
}

/// Response body for a published notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAccepted {
    /// The event as broadcast, with sequence and timestamp assigned.
    pub event: NotificationEvent,

    /// Keys whose stored count was incremented.
    pub counted: Vec<String>,
}

/// POST /apps/{app}/notifications - Publish a notification.
///
/// Stored counts are bumped before the event is broadcast, so a client
/// reacting to the event by fetching a count sees the new value.
///
/// # Responses
///
/// - `202 Accepted` - Event published
/// - `400 Bad Request` - Malformed body or empty `subjectId`
/// - `404 Not Found` - Unknown application
async fn post_notification(
    State(state): State<AppState>,
    Path(app): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<NotificationAccepted>), ApiError> {
    let request: NotificationRequest = parse_json(&body)?;
    if request.subject_id.trim().is_empty() {
        return Err(ApiError::validation("subjectId must not be empty"));
    }

    let counted = state.registry.record_notification(&app, &request.hints)?;
    let event = state
        .hub
        .publish(&app, request.subject_id, request.event_type, request.hints);

    debug!(
        app = %app,
        sequence = event.sequence,
        subject = %event.subject_id,
        counted = counted.len(),
        "Notification published"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(NotificationAccepted { event, counted }),
    ))
}

/// GET /apps/{app}/notifications - Stream the application's notifications.
///
/// Each event is written as one JSON object followed by `\n`. Only events
/// published after the request arrives are sent. The stream ends when the
/// client disconnects or the server shuts down.
///
/// # Responses
///
/// - `200 OK` - `application/x-ndjson` stream
/// - `404 Not Found` - Unknown application
/// - `503 Service Unavailable` - Server is shutting down
async fn get_notifications(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Response, ApiError> {
    if !state.registry.contains_app(&app) {
        return Err(ApiError::not_found(format!("unknown application '{app}'")));
    }
    if state.is_shutting_down() {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }

    // Subscribe before responding so nothing published after this request
    // is missed.
    let subscription = state.hub.subscribe(app.clone());
    let shutdown = state.shutdown.subscribe();
    info!(app = %app, "Notification stream opened");

    let body = Body::from_stream(ndjson_stream(subscription, shutdown));
    Ok(([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], body).into_response())
}

fn ndjson_stream(
    subscription: AppSubscription,
    shutdown: watch::Receiver<bool>,
) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(
        (subscription, shutdown),
        |(mut subscription, mut shutdown)| async move {
            loop {
                if *shutdown.borrow_and_update() {
                    debug!(app = %subscription.app(), "Notification stream closed by shutdown");
                    return None;
                }

                let event = tokio::select! {
                    event = subscription.recv() => event?,
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                        continue;
                    }
                };

                match serde_json::to_vec(&event) {
                    Ok(mut line) => {
                        line.push(b'\n');
                        return Some((Ok(Bytes::from(line)), (subscription, shutdown)));
                    }
                    Err(e) => warn!(sequence = event.sequence, error = %e, "Failed to encode notification"),
                }
            }
        },
    )
}

// ============================================================================
// GET /health
// ============================================================================

/// Health check response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status ("ok").
    pub status: String,

    /// Number of applications with a catalog.
    pub apps: usize,

    /// Number of open notification streams.
    pub subscribers: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "apps": 2,
///   "subscribers": 1,
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        apps: state.registry.app_count(),
        subscribers: state.hub.subscriber_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
