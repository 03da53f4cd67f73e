//! Control server accept loop

use super::session::{run_session, SessionContext};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

/// Backoff after a failed `accept`, so descriptor exhaustion does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listening control server
pub struct ControlServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl ControlServer {
    /// Bind the listener. Failure here is fatal for the service.
    pub async fn bind(addr: &str, ctx: Arc<SessionContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled, spawning one task per session
    /// on `sessions` so shutdown can wait for them.
    pub async fn serve(self, cancel: CancellationToken, sessions: TaskTracker) {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Control server listening");
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let span = tracing::info_span!("session", id = %Uuid::new_v4(), peer = %peer);
            let ctx = self.ctx.clone();
            let cancel = cancel.clone();
            sessions.spawn(
                async move {
                    tracing::info!("Client connected");
                    let (reader, writer) = stream.into_split();
                    match run_session(reader, writer, ctx, cancel).await {
                        Ok(()) => tracing::info!("Client disconnected"),
                        Err(e) => tracing::warn!(error = %e, "Session ended with error"),
                    }
                }
                .instrument(span),
            );
        }
        tracing::info!("Control server stopped accepting connections");
    }
}
