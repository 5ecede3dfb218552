//! The seam between the session proxy and whatever speaks SSH.

use crate::known_hosts::KnownHostEntry;
use sshgate::ExecutionRequest;
use sshgate_policy::ServerAddr;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// What the engine needs to authenticate to the server on the user's behalf.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user: String,
    /// Trusted keys for the target; never empty.
    pub host_keys: Vec<KnownHostEntry>,
    /// ssh-agent socket holding the user's keys.
    pub auth_sock: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ProxyParams {
    pub request: ExecutionRequest,
    pub server: ServerAddr,
    pub client_config: ClientConfig,
}

pub trait ProxyEngine: Send + Sync + 'static {
    /// Bind a session between the end client and the server transport.
    fn start<C, S>(&self, params: ProxyParams, client: C, server: S) -> impl ProxySession
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static;
}

pub trait ProxySession: Send {
    /// Drive the session until it is complete.
    fn run(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Bytes read from the server side but not yet passed to the client.
    fn buffered_from_server(&self) -> usize;
}

/// Relays bytes between client and server without interpreting them.
///
/// The end client authenticates and checks host keys itself. The session is
/// complete once the client stops sending.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueRelayEngine;

impl ProxyEngine for OpaqueRelayEngine {
    fn start<C, S>(&self, params: ProxyParams, client: C, server: S) -> impl ProxySession
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tracing::debug!(
            server = %params.server,
            user = %params.client_config.user,
            "starting opaque relay"
        );
        OpaqueRelay {
            client,
            server,
            pending: Vec::new(),
        }
    }
}

pub struct OpaqueRelay<C, S> {
    client: C,
    server: S,
    /// Server bytes read but not yet written to the client.
    pending: Vec<u8>,
}

impl<C, S> OpaqueRelay<C, S>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn relay(&mut self) -> io::Result<()> {
        let (mut client_rd, mut client_wr) = tokio::io::split(&mut self.client);
        let (mut server_rd, mut server_wr) = tokio::io::split(&mut self.server);
        let pending = &mut self.pending;
        // Client bytes read but not yet written to the server.
        let mut outgoing: Vec<u8> = Vec::new();
        let mut up = vec![0u8; RELAY_BUF_SIZE];
        let mut down = vec![0u8; RELAY_BUF_SIZE];
        let mut client_open = true;
        let mut server_open = true;

        // Each direction writes partially so a stalled peer never blocks the other.
        while client_open || !outgoing.is_empty() {
            tokio::select! {
                n = client_rd.read(&mut up), if client_open && outgoing.is_empty() => {
                    let n = n?;
                    if n == 0 {
                        client_open = false;
                    } else {
                        outgoing.extend_from_slice(&up[..n]);
                    }
                }
                n = server_wr.write(&outgoing[..]), if !outgoing.is_empty() => {
                    let n = n?;
                    if n == 0 {
                        return Err(io::ErrorKind::WriteZero.into());
                    }
                    outgoing.drain(..n);
                }
                n = server_rd.read(&mut down), if server_open && pending.is_empty() => {
                    let n = n?;
                    if n == 0 {
                        server_open = false;
                    } else {
                        pending.extend_from_slice(&down[..n]);
                    }
                }
                n = client_wr.write(&pending[..]), if !pending.is_empty() => {
                    let n = n?;
                    if n == 0 {
                        return Err(io::ErrorKind::WriteZero.into());
                    }
                    pending.drain(..n);
                }
            }
        }

        server_wr.flush().await?;
        client_wr.flush().await
    }
}

impl<C, S> ProxySession for OpaqueRelay<C, S>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(&mut self) -> io::Result<()> {
        self.relay().await
    }

    fn buffered_from_server(&self) -> usize {
        self.pending.len()
    }
}
