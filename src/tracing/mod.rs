//! Request correlation for logs and error bodies.
//!
//! Every inbound request gets a [`RequestId`] (taken from `x-request-id` when
//! the caller supplies a usable one). The id is stored in a task-local so
//! [`crate::errors::ServiceError`] responses and [`crate::ApiResponse`]
//! metadata can report it without threading it through every handler.

use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::{cell::RefCell, fmt, future::Future};
use tower_http::{
    classify::{SharedClassifier, StatusInRangeAsFailures},
    trace::{DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl Default for RequestId {
    fn default() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        RequestId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts a caller-supplied id only if it is short visible ASCII.
    fn from_header(value: &HeaderValue) -> Option<Self> {
        let raw = value.to_str().ok()?.trim();
        if raw.is_empty()
            || raw.len() > MAX_REQUEST_ID_LEN
            || !raw.bytes().all(|b| b.is_ascii_graphic())
        {
            return None;
        }
        Some(RequestId::new(raw))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RefCell<Option<RequestId>>;
}

pub async fn scope_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_REQUEST_ID
        .scope(RefCell::new(Some(request_id)), future)
        .await
}

pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

/// Middleware to add a request ID to every request and response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(RequestId::from_header)
        .unwrap_or_default();

    // Validated ASCII or a UUID, so header conversion only fails on a logic error.
    let header_value = HeaderValue::from_str(request_id.as_str()).ok();
    if let Some(value) = header_value.clone() {
        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.as_str(),
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = scope_request_id(request_id, next.run(request))
        .instrument(span)
        .await;

    if let Some(value) = header_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}

#[derive(Clone, Default)]
pub struct RequestSpanMaker;

impl<B> MakeSpan<B> for RequestSpanMaker {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_default();

        tracing::info_span!(
            "http.request",
            request_id = %request_id.as_str(),
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

/// HTTP trace layer: 5xx responses are classified as failures
pub fn configure_http_tracing() -> TraceLayer<
    SharedClassifier<StatusInRangeAsFailures>,
    RequestSpanMaker,
    DefaultOnRequest,
    DefaultOnResponse,
    tower_http::trace::DefaultOnBodyChunk,
    tower_http::trace::DefaultOnEos,
    DefaultOnFailure,
> {
    let classifier = SharedClassifier::new(StatusInRangeAsFailures::new(500..=599));
    TraceLayer::new(classifier)
        .make_span_with(RequestSpanMaker)
        .on_request(DefaultOnRequest::default())
        .on_response(DefaultOnResponse::default())
        .on_failure(DefaultOnFailure::default())
}
