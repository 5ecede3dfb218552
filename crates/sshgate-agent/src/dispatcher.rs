use crate::engine::ProxyEngine;
use crate::forwarding::read_connection_prelude;
use crate::mux::{MuxSession, Multiplexer};
use crate::proxy::SessionProxy;
use anyhow::{Context, Result};
use sshgate::codec::{expect_message, write_message};
use sshgate::{ExecutionApproved, ExecutionDenied, ExecutionRequest};
use sshgate_policy::{ClientEndpoint, Decision, DecisionEngine};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Denied,
    HandedOff { next_transport_byte: u32 },
}

/// Handles one peer connection from first control frame to handoff.
pub struct Dispatcher<M, E> {
    mux: M,
    decisions: DecisionEngine,
    proxy: SessionProxy<E>,
}

impl<M, E> Dispatcher<M, E>
where
    M: Multiplexer,
    E: ProxyEngine,
{
    pub fn new(mux: M, decisions: DecisionEngine, proxy: SessionProxy<E>) -> Self {
        Self {
            mux,
            decisions,
            proxy,
        }
    }

    pub async fn handle<C>(&self, conn: C) -> Result<ConnectionOutcome>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (conn, notice) = read_connection_prelude(conn)
            .await
            .context("failed to read connection prelude")?;
        let mut session = self
            .mux
            .open(conn)
            .context("failed to start multiplexed session")?;
        let mut control = session
            .accept()
            .await
            .context("failed to accept control stream")?;

        // Anything but a well-formed request ends the connection here,
        // before the policy store is touched.
        let request: ExecutionRequest = expect_message(&mut control)
            .await
            .context("failed to read execution request")?;
        let client = match notice {
            Some(notice) => ClientEndpoint::from(notice),
            None => ClientEndpoint::local(&request.user),
        };
        tracing::info!(
            %client,
            user = %request.user,
            server = %request.server,
            command = %request.command,
            "execution requested"
        );

        if self.decisions.decide(&client, &request).await == Decision::Denied {
            tracing::info!(
                %client,
                user = %request.user,
                server = %request.server,
                "request denied"
            );
            write_message(&mut control, &ExecutionDenied)
                .await
                .context("failed to send denial")?;
            control.shutdown().await.ok();
            drop(control);
            // Dropping the session before the peer hangs up can lose the
            // queued denial.
            session.close();
            session.closed().await;
            return Ok(ConnectionOutcome::Denied);
        }
        write_message(&mut control, &ExecutionApproved)
            .await
            .context("failed to send approval")?;

        let data = session
            .accept()
            .await
            .context("failed to accept data stream")?;
        let transport = session
            .accept()
            .await
            .context("failed to accept transport stream")?;

        let result = self
            .proxy
            .run(&request, data, transport, &mut control)
            .await;
        control.shutdown().await.ok();
        drop(control);

        // The peer resumes raw forwarding on its own connection; it closes
        // ours once it has taken over.
        session.closed().await;

        let next_transport_byte = result.context("proxy session failed")?;
        Ok(ConnectionOutcome::HandedOff {
            next_transport_byte,
        })
    }
}
