// HTTP middleware

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use logcdn_core::metrics::HTTP_REQUEST_DURATION;

/// Records request duration by route template, method and status.
pub async fn metrics_layer(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    // Route templates keep label cardinality bounded
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUEST_DURATION
        .with_label_values(&[endpoint.as_str(), method.as_str(), status.as_str()])
        .observe(start.elapsed().as_secs_f64());

    response
}
