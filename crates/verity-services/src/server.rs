//! SessionServer — TCP accept loop.
//!
//! Each accepted connection gets its own task running one
//! [`TransferSession`]. A semaphore caps how many run at once; with a limit
//! of one the next connection is only accepted after the previous session
//! has closed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use crate::session::{SessionContext, TransferSession};

pub struct SessionServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    limiter: Arc<Semaphore>,
    shutdown: broadcast::Receiver<()>,
}

impl SessionServer {
    pub async fn bind(
        addr: &str,
        ctx: Arc<SessionContext>,
        max_sessions: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            ctx,
            limiter: Arc::new(Semaphore::new(max_sessions.max(1))),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> io::Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "session server listening");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.recv() => break,
                permit = self.limiter.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break, // semaphore closed
                },
            };

            let (stream, peer) = tokio::select! {
                _ = self.shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                serve_connection(stream, peer, ctx).await;
                drop(permit);
            });
        }

        tracing::info!("session server shutting down");
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    let _ = stream.set_nodelay(true);
    tracing::debug!(peer = %peer, "connection accepted");

    match TransferSession::new(stream, peer.to_string(), ctx).run().await {
        Ok(outcome) => tracing::info!(
            peer = %peer,
            operation = ?outcome.operation,
            filename = outcome.filename.as_deref().unwrap_or("-"),
            success = outcome.success,
            final_state = %outcome.final_state,
            "session closed"
        ),
        Err(e) => tracing::warn!(peer = %peer, error = %e, "session failed"),
    }
}
