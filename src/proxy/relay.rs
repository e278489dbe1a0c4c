//! Response relay: stream upstream bytes to the client while keeping the
//! pooled connection accountable.
//!
//! The relay owns the checked-out connection for the life of the response
//! body. On clean end-of-stream it releases the connection back to the pool
//! (reusable only if the protocol allowed it) and emits the completion
//! event. An error, deadline expiry or client disconnect discards the
//! connection instead; its in-flight state is unknown.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Bytes, BodyDataStream};
use futures_util::Stream;
use tokio::time::Sleep;

use crate::observability::metrics;
use crate::upstream::{ConnectionPool, PooledConnection};

/// Byte counters for one in-flight request, shared with the engine.
#[derive(Debug, Default)]
pub struct ByteCounters {
    request: AtomicU64,
    response: AtomicU64,
}

impl ByteCounters {
    pub fn add_request(&self, n: u64) {
        self.request.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the running response total after adding `n`.
    pub fn add_response(&self, n: u64) -> u64 {
        self.response.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn request_bytes(&self) -> u64 {
        self.request.load(Ordering::Relaxed)
    }

    pub fn response_bytes(&self) -> u64 {
        self.response.load(Ordering::Relaxed)
    }
}

/// Relay failure surfaced into the client body stream.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream body error: {0}")]
    Upstream(axum::Error),

    #[error("deadline exceeded during relay")]
    DeadlineExceeded,

    #[error("response body exceeded limit")]
    BodyTooLarge,
}

/// Fields for the completion event, captured before the body starts.
#[derive(Debug, Clone)]
pub struct CompletionInfo {
    pub request_id: String,
    pub route: String,
    pub backend: String,
    pub method: String,
    pub status: u16,
    pub started: Instant,
}

/// Streaming response body with accounting and connection recycling.
pub struct RelayBody {
    inner: BodyDataStream,
    conn: Option<PooledConnection>,
    pool: Arc<ConnectionPool>,
    counters: Arc<ByteCounters>,
    /// Whether the transport may go back to the idle list on clean EOS.
    reusable: bool,
    max_bytes: u64,
    deadline: Pin<Box<Sleep>>,
    info: CompletionInfo,
    finished: bool,
}

impl RelayBody {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inner: BodyDataStream,
        conn: Option<PooledConnection>,
        pool: Arc<ConnectionPool>,
        counters: Arc<ByteCounters>,
        reusable: bool,
        max_bytes: u64,
        deadline: tokio::time::Instant,
        info: CompletionInfo,
    ) -> Self {
        Self {
            inner,
            conn,
            pool,
            counters,
            reusable,
            max_bytes,
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
            info,
            finished: false,
        }
    }

    /// Clean end of stream: recycle the connection, emit completion.
    fn complete(&mut self) {
        self.finished = true;
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.reusable);
        }
        let elapsed = self.info.started.elapsed();
        tracing::info!(
            request_id = %self.info.request_id,
            route = %self.info.route,
            backend = %self.info.backend,
            method = %self.info.method,
            status = self.info.status,
            bytes_in = self.counters.request_bytes(),
            bytes_out = self.counters.response_bytes(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
        metrics::record_request(
            &self.info.method,
            self.info.status,
            &self.info.backend,
            self.info.started,
        );
        metrics::record_transfer(
            &self.info.backend,
            self.counters.request_bytes(),
            self.counters.response_bytes(),
        );
    }

    /// Failed mid-stream: the transport's state is unknown, discard it.
    fn fail(&mut self, reason: &str) {
        self.finished = true;
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, false);
        }
        tracing::warn!(
            request_id = %self.info.request_id,
            route = %self.info.route,
            backend = %self.info.backend,
            reason = reason,
            bytes_out = self.counters.response_bytes(),
            "Relay aborted"
        );
        metrics::record_request(
            &self.info.method,
            self.info.status,
            &self.info.backend,
            self.info.started,
        );
    }
}

impl Stream for RelayBody {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.fail("deadline");
            return Poll::Ready(Some(Err(RelayError::DeadlineExceeded)));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let total = this.counters.add_response(chunk.len() as u64);
                if total > this.max_bytes {
                    this.fail("body_too_large");
                    return Poll::Ready(Some(Err(RelayError::BodyTooLarge)));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.fail("upstream_body");
                Poll::Ready(Some(Err(RelayError::Upstream(e))))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        // Client went away before the body finished; the connection's
        // in-flight state is unknown, so it must not be reused.
        if !self.finished {
            if let Some(conn) = self.conn.take() {
                self.pool.release(conn, false);
            }
            tracing::debug!(
                request_id = %self.info.request_id,
                backend = %self.info.backend,
                "Client disconnected mid-relay"
            );
        }
    }
}
