//! Shared-secret authentication for the administrative routes
//!
//! Every request must present the admin key, either in the `x-admin-key`
//! header or as a `key` query parameter (for trigger links that can only be
//! a URL). Anything else is answered with 401 before the handler runs.

use axum::{
    extract::{Query, Request},
    response::{IntoResponse, Response},
};
use pimsync_common::types::ADMIN_KEY_HEADER;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;

#[derive(Clone)]
pub struct AdminKeyLayer {
    secret: Arc<str>,
}

impl AdminKeyLayer {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self { secret: secret.into() }
    }
}

impl<S> Layer<S> for AdminKeyLayer {
    type Service = AdminKeyMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdminKeyMiddleware {
            inner,
            secret: self.secret.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AdminKeyMiddleware<S> {
    inner: S,
    secret: Arc<str>,
}

impl<S> Service<Request> for AdminKeyMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let authorized = presented_key(&request).is_some_and(|key| keys_match(&key, &self.secret));

        if !authorized {
            warn!(
                method = %request.method(),
                uri = %request.uri().path(),
                "Rejected request without a valid admin key"
            );
            return Box::pin(async {
                Ok(AppError::Unauthorized("Unauthorized".to_string()).into_response())
            });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(request).await })
    }
}

/// The header wins over the query parameter when both are present.
fn presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(ADMIN_KEY_HEADER) {
        return value.to_str().ok().map(str::to_string);
    }

    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    params.get("key").cloned()
}

/// Compare without stopping at the first differing byte.
fn keys_match(presented: &str, secret: &str) -> bool {
    let (a, b) = (presented.as_bytes(), secret.as_bytes());
    if a.len() != b.len() || b.is_empty() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
