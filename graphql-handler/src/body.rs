//! Small helpers over the HTTP body type used by the handler.

use axum::body::Body;
use bytes::Bytes;
use http_body_util::BodyExt;

/// Collect an entire request body into memory.
///
/// The handler treats a read failure the same as an absent body, so the
/// error is surfaced for logging only.
pub(crate) async fn into_bytes(body: Body) -> Result<Bytes, axum::Error> {
    Ok(body.collect().await?.to_bytes())
}
