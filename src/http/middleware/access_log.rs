//! Per-request access log.
//!
//! One event per request: request id, method, path, final status, duration
//! and the bytes actually written to the client. The event fires when the
//! response body is finished or dropped, so aborted transfers report what
//! really went out. Requests abandoned before any response (dropped by chaos,
//! client gone) are logged without a status.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tower_http::request_id::RequestId;

use crate::observability::metrics;

pub async fn access_log(request: Request, next: Next) -> Response {
    let entry = AccessEntry::begin(&request);
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let entry = entry.with_status(parts.status);
    Response::from_parts(parts, Body::new(CountingBody { inner: body, entry }))
}

struct AccessEntry {
    request_id: String,
    method: Method,
    path: String,
    start: Instant,
    status: Option<StatusCode>,
    bytes: usize,
}

impl AccessEntry {
    fn begin(request: &Request) -> Self {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Self {
            request_id,
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            start: Instant::now(),
            status: None,
            bytes: 0,
        }
    }

    fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

impl Drop for AccessEntry {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        match self.status {
            Some(status) => tracing::info!(
                request_id = %self.request_id,
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                duration_ms,
                bytes = self.bytes,
                "request"
            ),
            None => tracing::info!(
                request_id = %self.request_id,
                method = %self.method,
                path = %self.path,
                duration_ms,
                "request abandoned before response"
            ),
        }
        metrics::record_request(self.method.as_str(), self.status.map(|s| s.as_u16()), self.start);
    }
}

/// Response body wrapper that counts data bytes as they are polled out.
struct CountingBody {
    inner: Body,
    entry: AccessEntry,
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled {
            if let Some(data) = frame.data_ref() {
                this.entry.bytes += data.len();
            }
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
