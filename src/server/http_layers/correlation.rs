//! Correlation id middleware
//!
//! Every inbound request is handled inside its own correlation scope. The id
//! comes from the `X-Correlation-ID` request header when present and is
//! generated otherwise. The same id is echoed on the response.

use crate::correlation::{self, CORRELATION_ID_HEADER};
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

pub async fn correlate_requests(request: Request<Body>, next: Next) -> Response {
    let inbound = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| match value.to_str() {
            Ok(text) => Some(text.to_string()),
            Err(_) => {
                debug!(
                    "Ignoring non-ASCII {} header {:?}, generating a new id",
                    CORRELATION_ID_HEADER, value
                );
                None
            }
        });

    let scope = correlation::begin(inbound.as_deref());
    let id = scope.id().clone();

    let mut response = scope.run(next.run(request)).await;

    match HeaderValue::from_str(id.as_str()) {
        Ok(value) => {
            response.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }
        Err(_) => warn!("Correlation id {:?} cannot be echoed as a header", id.as_str()),
    }
    response
}
