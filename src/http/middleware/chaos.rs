//! Fault injection middleware.
//!
//! Applies one [`Decision`] per request in a fixed order:
//! drop → latency → error → corrupt → pass through.
//!
//! Cancellation is the request future being dropped: hyper drops it when the
//! client goes away, and a draining server drops it when the grace period
//! runs out. Both waits below are plain awaits, so they end right there.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hyper::body::{Body as HttpBody, Frame};

use crate::chaos::{ChaosEngine, Corrupted, Decision};
use crate::observability::metrics;

/// Largest response body buffered for corruption.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

pub async fn chaos_middleware(
    State(engine): State<Arc<ChaosEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let decision = engine.decide();
    apply_decision(&engine, decision, request, next).await
}

async fn apply_decision(
    engine: &ChaosEngine,
    decision: Decision,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if decision.drop {
        tracing::info!(path = %path, "[chaos] Dropping request (no response)");
        metrics::record_chaos("drop");
        let _notice = CancelNotice::new("drop");
        // Only cancellation ends this request.
        return std::future::pending().await;
    }

    if !decision.latency.is_zero() {
        tracing::info!(
            path = %path,
            latency_ms = decision.latency.as_millis() as u64,
            "[chaos] Injecting latency"
        );
        metrics::record_chaos("latency");
        let notice = CancelNotice::new("latency");
        tokio::time::sleep(decision.latency).await;
        notice.disarm();
    }

    if decision.return_error {
        let status = StatusCode::from_u16(decision.error_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::info!(path = %path, status = status.as_u16(), "[chaos] Injecting error");
        metrics::record_chaos("error");
        return (status, format!("Chaos injected error {}\n", status.as_u16())).into_response();
    }

    if decision.corrupt {
        metrics::record_chaos("corrupt");
        let response = next.run(request).await;
        return corrupt_response(engine, &path, response).await;
    }

    next.run(request).await
}

/// Buffer the inner response, corrupt its body and rebuild it.
async fn corrupt_response(engine: &ChaosEngine, path: &str, response: Response) -> Response {
    let (parts, body) = response.into_parts();

    let original = match axum::body::to_bytes(body, MAX_CAPTURE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "[chaos] Failed to capture response for corruption");
            return (StatusCode::BAD_GATEWAY, "Upstream response could not be captured")
                .into_response();
        }
    };

    let corrupted = engine.corrupt(&original);
    tracing::info!(
        path = %path,
        strategy = %corrupted.strategy,
        original_bytes = original.len(),
        corrupted_bytes = corrupted.body.len(),
        advertised_length = ?corrupted.content_length,
        "[chaos] Corrupting response"
    );

    rebuild(parts, corrupted)
}

/// Reassemble a response around a corrupted body.
///
/// An advertised length goes out as-is: the body then reports no size of its
/// own, so the connection frames by the header instead of the real bytes.
fn rebuild(mut parts: axum::http::response::Parts, corrupted: Corrupted) -> Response {
    parts.headers.remove(header::TRANSFER_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);

    let body = match corrupted.content_length {
        Some(length) => {
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            Body::new(UnsizedBody(Some(Bytes::from(corrupted.body))))
        }
        None => Body::from(corrupted.body),
    };
    Response::from_parts(parts, body)
}

/// Single-chunk body with an unknown size hint.
struct UnsizedBody(Option<Bytes>);

impl HttpBody for UnsizedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let chunk = self.get_mut().0.take().filter(|bytes| !bytes.is_empty());
        Poll::Ready(chunk.map(|bytes| Ok(Frame::data(bytes))))
    }
}

/// Logs when a chaos wait is abandoned because the request went away.
struct CancelNotice {
    branch: &'static str,
    armed: bool,
}

impl CancelNotice {
    fn new(branch: &'static str) -> Self {
        Self { branch, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelNotice {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(branch = self.branch, "[chaos] Request cancelled");
        }
    }
}
