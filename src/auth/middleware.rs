//! API key authentication middleware implementation.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

/// Header carrying the API key directly.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Layer that requires an API key on every request.
///
/// # Example
///
/// ```rust,ignore
/// use mcp_gateway::ApiKeyAuthLayer;
///
/// let router = gateway.router().layer(ApiKeyAuthLayer::new("my-secret-key".to_string()));
/// ```
#[derive(Clone)]
pub struct ApiKeyAuthLayer {
    api_key: Arc<str>,
}

impl ApiKeyAuthLayer {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key: Arc::from(api_key),
        }
    }
}

impl<S> Layer<S> for ApiKeyAuthLayer {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            api_key: self.api_key.clone(),
        }
    }
}

/// Service that validates the API key.
///
/// Accepts the key via:
/// - `x-api-key: <key>`
/// - `Authorization: <key>` or `Authorization: Bearer <key>`
/// - Basic Auth: any username with the key as password
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    api_key: Arc<str>,
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let api_key = self.api_key.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match presented_key(req.headers()) {
                Some(key) if key == api_key.as_ref() => inner.call(req).await,
                Some(_) => Ok(reject(StatusCode::FORBIDDEN, "Invalid API Key")),
                None => Ok(reject(StatusCode::UNAUTHORIZED, "API Key required")),
            }
        })
    }
}

/// The key the client sent, if any. `x-api-key` wins over `Authorization`.
fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = header_value(headers, API_KEY_HEADER) {
        return Some(key.to_string());
    }

    let auth = header_value(headers, header::AUTHORIZATION.as_str())?;
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(credentials) = auth.strip_prefix("Basic ") {
        // Undecodable credentials still count as presented, so they get 403.
        return Some(basic_password(credentials.trim()).unwrap_or_default());
    }
    Some(auth.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn basic_password(credentials: &str) -> Option<String> {
    let decoded = STANDARD.decode(credentials).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded
        .split_once(':')
        .map(|(_username, password)| password.to_string())
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
