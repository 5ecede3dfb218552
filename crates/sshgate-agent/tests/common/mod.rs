//! Shared fixtures for agent integration tests.
//!
//! `ScriptedMux` stands in for the multiplexer: each expected connection gets
//! a queue the test pushes streams into, in the order the peer "opens" them.

#![allow(dead_code)]

use sshgate::{AgentForwardingNotice, ExecutionRequest};
use sshgate_agent::forwarding::relay_agent_connection;
use sshgate_agent::mux::{MuxSession, Multiplexer};
use sshgate_agent::{Dispatcher, OpaqueRelayEngine, SessionProxy};
use sshgate_policy::{Approval, ApprovalBroker, DecisionEngine, PolicyStore};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const KNOWN_HOSTS: &str = "\
db1 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl
[bastion]:2222 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFdbmQTf3r6P6lq2eZbcFRjWIdkjVw1hzGNuXOA0+JAL
";

pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "sshgate_agent=debug,sshgate_policy=debug".into()),
            )
            .with_test_writer()
            .init();
    });
}

/// What a multiplexer client sends first: a window update opening stream 1.
pub const MUX_OPENING: [u8; 12] = [0, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0];

/// An in-memory connection whose peer has started its multiplexed session.
/// Returns the agent side and the peer side.
pub async fn connect() -> (DuplexStream, DuplexStream) {
    let (agent, mut peer) = duplex(1024);
    peer.write_all(&MUX_OPENING).await.unwrap();
    (agent, peer)
}

/// Like [`connect`], but relayed through the forwarding helper for `notice`.
pub async fn connect_forwarded(notice: AgentForwardingNotice) -> (DuplexStream, DuplexStream) {
    let (agent, helper_agent_side) = duplex(1024);
    let (helper_remote_side, mut remote) = duplex(1024);
    tokio::spawn(async move {
        relay_agent_connection(helper_remote_side, helper_agent_side, &notice).await
    });
    remote.write_all(&MUX_OPENING).await.unwrap();
    (agent, remote)
}

pub fn forwarded_from(hostname: &str, username: &str) -> AgentForwardingNotice {
    AgentForwardingNotice {
        hostname: hostname.into(),
        port: 22,
        username: username.into(),
    }
}

pub fn request(command: &str, server: &str) -> ExecutionRequest {
    ExecutionRequest {
        user: "alice".into(),
        command: command.into(),
        server: server.into(),
    }
}

/// Peer side of one scripted connection.
pub struct PeerStreams {
    tx: mpsc::UnboundedSender<DuplexStream>,
}

impl PeerStreams {
    /// Open the next stream; the agent accepts streams in this order.
    pub fn open(&self) -> DuplexStream {
        self.open_with_capacity(64 * 1024)
    }

    pub fn open_with_capacity(&self, capacity: usize) -> DuplexStream {
        let (agent, peer) = duplex(capacity);
        self.tx.send(agent).unwrap();
        peer
    }
}

#[derive(Default)]
struct ScriptedState {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<DuplexStream>>>,
    opened: AtomicUsize,
}

/// Clones share the same queue of expected connections.
#[derive(Clone, Default)]
pub struct ScriptedMux {
    state: Arc<ScriptedState>,
}

impl ScriptedMux {
    /// Register the next connection the agent will see.
    pub fn expect_connection(&self) -> PeerStreams {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.pending.lock().unwrap().push_back(rx);
        PeerStreams { tx }
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }
}

impl Multiplexer for ScriptedMux {
    type Session = ScriptedSession;

    fn open<C>(&self, mut conn: C) -> io::Result<ScriptedSession>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let incoming = self
            .state
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::other("unexpected connection"))?;
        self.state.opened.fetch_add(1, Ordering::SeqCst);

        let peer_closed = CancellationToken::new();
        let token = peer_closed.clone();
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut conn, &mut tokio::io::sink()).await;
            token.cancel();
        });
        Ok(ScriptedSession {
            incoming,
            peer_closed,
        })
    }
}

pub struct ScriptedSession {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
    peer_closed: CancellationToken,
}

impl MuxSession for ScriptedSession {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> io::Result<DuplexStream> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "peer gone"))
    }

    async fn closed(&self) {
        self.peer_closed.cancelled().await
    }

    fn close(&mut self) {
        self.incoming.close();
    }
}

/// A dispatcher over a scripted multiplexer, a temp policy store and an
/// approver that always gives the same answer.
pub struct Fixture {
    pub mux: ScriptedMux,
    pub dispatcher: Arc<Dispatcher<ScriptedMux, OpaqueRelayEngine>>,
    pub store: Arc<PolicyStore>,
    pub asked: Arc<AtomicUsize>,
    pub dir: TempDir,
}

impl Fixture {
    pub async fn new(answer: Approval) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        std::fs::write(&known_hosts, KNOWN_HOSTS).unwrap();
        let store = Arc::new(
            PolicyStore::load(dir.path().join("policy.json"))
                .await
                .unwrap(),
        );

        let (broker, mut inbox) = ApprovalBroker::channel(8);
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        tokio::spawn(async move {
            while let Some(req) = inbox.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                req.respond(answer);
            }
        });

        let mux = ScriptedMux::default();
        let dispatcher = Dispatcher::new(
            mux.clone(),
            DecisionEngine::new(Arc::clone(&store), broker),
            SessionProxy::new(OpaqueRelayEngine, known_hosts, None),
        );

        Self {
            mux,
            dispatcher: Arc::new(dispatcher),
            store,
            asked,
            dir,
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
