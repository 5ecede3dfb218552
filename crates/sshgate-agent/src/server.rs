use crate::dispatcher::{ConnectionOutcome, Dispatcher};
use crate::engine::ProxyEngine;
use crate::mux::Multiplexer;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Accept loop: one supervised task per peer connection.
pub struct Server<M, E> {
    dispatcher: Arc<Dispatcher<M, E>>,
    limit: Arc<Semaphore>,
    shutdown_grace: Duration,
}

impl<M, E> Server<M, E>
where
    M: Multiplexer,
    E: ProxyEngine,
{
    pub fn new(
        dispatcher: Arc<Dispatcher<M, E>>,
        max_connections: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            dispatcher,
            limit: Arc::new(Semaphore::new(max_connections)),
            shutdown_grace,
        }
    }

    /// Serve until `shutdown` fires, then give in-flight connections
    /// `shutdown_grace` to finish. Connections still open after that are
    /// dropped.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        let abandon = CancellationToken::new();

        loop {
            // Hold a permit before accepting so excess peers wait in the backlog.
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.limit).acquire_owned() => {
                    permit.context("connection limiter closed")?
                }
            };
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(err = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            let abandoned = abandon.clone();
            tracker.spawn(
                async move {
                    let _permit = permit;
                    tracing::info!("new connection");
                    let result = tokio::select! {
                        _ = abandoned.cancelled() => {
                            tracing::info!("connection dropped at shutdown");
                            return;
                        }
                        result = dispatcher.handle(stream) => result,
                    };
                    match result {
                        Ok(ConnectionOutcome::Denied) => {
                            tracing::info!("connection closed after denial");
                        }
                        Ok(ConnectionOutcome::HandedOff {
                            next_transport_byte,
                        }) => {
                            tracing::info!(next_transport_byte, "session handed off");
                        }
                        Err(e) => {
                            tracing::warn!(err = %format!("{e:#}"), "connection failed");
                        }
                    }
                }
                .instrument(tracing::info_span!("connection", %peer)),
            );
        }

        tracker.close();
        if tokio::time::timeout(self.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = tracker.len(),
                "shutdown grace elapsed, dropping connections"
            );
            abandon.cancel();
            tracker.wait().await;
        }
        Ok(())
    }
}
