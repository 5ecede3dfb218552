use crate::counting::CountingStream;
use crate::engine::{ClientConfig, ProxyEngine, ProxyParams, ProxySession};
use crate::known_hosts::KnownHosts;
use sshgate::codec::write_message;
use sshgate::{ExecutionRequest, HandoffComplete, ProtocolError};
use sshgate_policy::ServerAddr;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to read known hosts {path}")]
    KnownHosts {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no known host key for {0}")]
    UnknownHost(String),

    #[error("proxy engine failed")]
    Engine(#[source] io::Error),

    #[error("handoff offset out of range: read {bytes_read}, buffered {buffered}")]
    Handoff { bytes_read: u64, buffered: usize },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Where the proxied session stopped on the outbound transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffState {
    /// Bytes read from the transport stream over the whole session.
    pub bytes_read: u64,
    /// Of those, bytes the engine had not consumed when it finished.
    pub buffered: usize,
}

impl HandoffState {
    /// First transport byte the engine did not consume.
    ///
    /// The peer replays the transport from this offset, so an impossible or
    /// unrepresentable value is an error rather than a wrapped number.
    pub fn next_transport_byte(&self) -> Result<u32, SessionError> {
        let err = || SessionError::Handoff {
            bytes_read: self.bytes_read,
            buffered: self.buffered,
        };
        let buffered = u64::try_from(self.buffered).map_err(|_| err())?;
        let offset = self.bytes_read.checked_sub(buffered).ok_or_else(err)?;
        u32::try_from(offset).map_err(|_| err())
    }
}

/// Runs one approved session and reports the handoff offset.
pub struct SessionProxy<E> {
    engine: E,
    known_hosts: PathBuf,
    auth_sock: Option<PathBuf>,
}

impl<E: ProxyEngine> SessionProxy<E> {
    pub fn new(engine: E, known_hosts: PathBuf, auth_sock: Option<PathBuf>) -> Self {
        Self {
            engine,
            known_hosts,
            auth_sock,
        }
    }

    /// Proxy `client` to `transport`, then write `HandoffComplete` on
    /// `control`. Nothing is written on failure.
    pub async fn run<C, T, K>(
        &self,
        request: &ExecutionRequest,
        client: C,
        transport: T,
        control: &mut K,
    ) -> Result<u32, SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        K: AsyncWrite + Unpin,
    {
        let server = ServerAddr::parse(&request.server);
        let known_hosts = KnownHosts::load(&self.known_hosts)
            .await
            .map_err(|source| SessionError::KnownHosts {
                path: self.known_hosts.clone(),
                source,
            })?;
        let host_name = server.known_hosts_name();
        let host_keys = known_hosts.host_keys(&host_name);
        if host_keys.is_empty() {
            return Err(SessionError::UnknownHost(host_name));
        }

        let params = ProxyParams {
            request: request.clone(),
            server,
            client_config: ClientConfig {
                user: request.user.clone(),
                host_keys,
                auth_sock: self.auth_sock.clone(),
            },
        };

        let (transport, counter) = CountingStream::new(transport);
        let mut session = self.engine.start(params, client, transport);
        session.run().await.map_err(SessionError::Engine)?;

        let handoff = HandoffState {
            bytes_read: counter.get(),
            buffered: session.buffered_from_server(),
        };
        let next_transport_byte = handoff.next_transport_byte()?;
        drop(session);

        tracing::debug!(
            bytes_read = handoff.bytes_read,
            buffered = handoff.buffered,
            next_transport_byte,
            "session proxied"
        );
        write_message(control, &HandoffComplete { next_transport_byte }).await?;
        Ok(next_transport_byte)
    }
}
