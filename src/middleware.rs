use crate::algorithms::State as Admission;
use crate::key_generator::KeyExtractor;
use crate::rate_limiter::{Decision, RateLimiter, Request as LimitRequest};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const RATE_LIMIT_MAX_REQUESTS: HeaderName = HeaderName::from_static("x-ratelimit-max-requests");
pub const RATE_LIMIT_STATE: HeaderName = HeaderName::from_static("x-ratelimit-state");
pub const RATE_LIMIT_RETRY_AFTER: HeaderName = HeaderName::from_static("x-ratelimit-retry-after");

/// What the admission middleware needs: a way to key requests and a limiter.
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub extractor: Arc<dyn KeyExtractor>,
    pub limiter: Arc<RateLimiter>,
}

impl RateLimitLayerState {
    pub fn new(extractor: Arc<dyn KeyExtractor>, limiter: Arc<RateLimiter>) -> Self {
        Self { extractor, limiter }
    }
}

/// Admission middleware.
///
/// Keys the request, asks the limiter for a decision and only then lets the
/// request through. Rate limit headers are attached to every response that
/// has a decision; a denied request gets 429 and never reaches the inner
/// handler. Key extraction failures are 400, limiter failures are 500 with no
/// rate limit headers.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let key = match state.extractor.extract(&request) {
        Ok(key) => key,
        Err(err) => {
            return text_response(
                err.status_code(),
                format!("failed to collect rate limiting key from request: {}", err),
            )
        }
    };

    let limit_request = match LimitRequest::new(key) {
        Ok(limit_request) => limit_request,
        Err(err) => {
            return text_response(
                err.status_code(),
                format!("failed to collect rate limiting key from request: {}", err),
            )
        }
    };

    let decision = match state.limiter.run(&limit_request).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(
                target: "throttler::middleware",
                key = %limit_request.key,
                error = %err,
                "rate limiting failed"
            );
            return text_response(
                err.status_code(),
                format!("failed to run rate limiting for request: {}", err),
            );
        }
    };

    let headers = rate_limit_headers(&decision);

    if decision.state == Admission::Deny {
        info!(
            target: "throttler::middleware",
            key = %limit_request.key,
            retry_after = decision.remaining_time_secs,
            "request denied"
        );
        let mut response = text_response(
            StatusCode::TOO_MANY_REQUESTS,
            "you have sent too many requests to this service, slow down please".to_string(),
        );
        response.headers_mut().extend(headers);
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(headers);
    response
}

pub fn rate_limit_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        RATE_LIMIT_MAX_REQUESTS,
        HeaderValue::from(decision.request_limit),
    );
    headers.insert(
        RATE_LIMIT_STATE,
        HeaderValue::from_static(decision.state.as_str()),
    );
    headers.insert(
        RATE_LIMIT_RETRY_AFTER,
        HeaderValue::from(decision.remaining_time_secs),
    );
    headers
}

fn text_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    info!(
        target: "throttler::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "throttler::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

fn get_client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
