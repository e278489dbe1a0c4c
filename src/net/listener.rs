//! TCP listener with connection backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Enforce the max-connections cap via a semaphore
//! - Hand accepted connections to the HTTP layer
//!
//! # Design Decisions
//! - The semaphore permit rides inside the connection's IO wrapper, so
//!   the slot is held for exactly the connection's lifetime
//! - At the cap, accepts queue instead of dropping connections
//! - Accept errors are logged and retried; they never kill the loop

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),
}

/// A bounded TCP listener.
///
/// When `max_connections` streams are open, further accepts wait until a
/// connection closes and returns its permit.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            tracker: ConnectionTracker::new(),
            max_connections: config.max_connections,
        })
    }

    /// Wrap an already-bound tokio listener (tests bind to port 0).
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            tracker: ConnectionTracker::new(),
            max_connections,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Currently available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Open client connections.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

impl axum::serve::Listener for Listener {
    type Io = TrackedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .expect("connection semaphore never closes");

            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    let guard = self.tracker.track();
                    tracing::debug!(
                        peer_addr = %addr,
                        connection_id = %guard.id(),
                        available_permits = self.connection_limit.available_permits(),
                        "Connection accepted"
                    );
                    return (TrackedStream::new(stream, permit, guard), addr);
                }
                Err(e) => {
                    // Transient accept failures (EMFILE and friends); back
                    // off briefly instead of spinning.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> Result<Self::Addr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// A client stream carrying its connection-slot permit and tracking guard.
/// Dropping the stream releases both.
pub struct TrackedStream {
    inner: TcpStream,
    _permit: OwnedSemaphorePermit,
    _guard: ConnectionGuard,
}

impl TrackedStream {
    fn new(inner: TcpStream, permit: OwnedSemaphorePermit, guard: ConnectionGuard) -> Self {
        Self {
            inner,
            _permit: permit,
            _guard: guard,
        }
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::serve::Listener as _;

    #[tokio::test]
    async fn permits_cap_concurrent_connections() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let mut listener = Listener::from_tcp(tcp, 2);

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();

        let (s1, _) = listener.accept().await;
        let (s2, _) = listener.accept().await;
        assert_eq!(listener.available_permits(), 0);
        assert_eq!(listener.active_connections(), 2);

        drop(s1);
        assert_eq!(listener.available_permits(), 1);

        drop(s2);
        assert_eq!(listener.available_permits(), 2);
        assert_eq!(listener.active_connections(), 0);
    }

    #[tokio::test]
    async fn invalid_bind_address_is_an_error() {
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            max_connections: 10,
        };
        assert!(Listener::bind(&config).await.is_err());
    }
}
