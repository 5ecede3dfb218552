use anyhow::{Context, Result};
use clap::Parser;
use sshgate_agent::config::Overrides;
use sshgate_agent::{
    AgentConfig, Dispatcher, OpaqueRelayEngine, Server, SessionProxy, YamuxMultiplexer, prompt,
};
use sshgate_policy::{ApprovalBroker, DecisionEngine, PolicyStore};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Pending approvals queued for the prompt.
const APPROVAL_BACKLOG: usize = 16;

#[derive(Parser, Debug)]
#[command(author, version, about = "sshgate agent: approves and proxies outbound SSH sessions")]
struct Args {
    /// Path to the config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on for peer connections.
    #[arg(short = 'l', long)]
    listen_port: Option<u16>,

    /// Address to bind.
    #[arg(long = "bind")]
    bind_address: Option<IpAddr>,

    /// known_hosts file to verify servers against.
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// Policy store file.
    #[arg(long = "policy")]
    policy_path: Option<PathBuf>,

    /// ssh-agent socket (default: $SSH_AUTH_SOCK).
    #[arg(long)]
    auth_sock: Option<PathBuf>,

    /// Maximum concurrent peer connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Deny every request that needs approval instead of prompting.
    #[arg(long)]
    auto_deny: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen_port: self.listen_port,
            bind_address: self.bind_address,
            known_hosts: self.known_hosts.clone(),
            policy_path: self.policy_path.clone(),
            auth_sock: self.auth_sock.clone(),
            max_connections: self.max_connections,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sshgate_agent=info,sshgate_policy=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref(), &args.overrides())
        .context("failed to load configuration")?;

    let store = PolicyStore::load(&config.policy_path)
        .await
        .with_context(|| {
            format!(
                "failed to load policy store {}",
                config.policy_path.display()
            )
        })?;
    tracing::info!(
        path = %config.policy_path.display(),
        scopes = store.len().await,
        "policy store loaded"
    );

    let (approvals, inbox) = ApprovalBroker::channel(APPROVAL_BACKLOG);
    if args.auto_deny {
        tracing::warn!("--auto-deny set; requests without a stored rule will be denied");
        tokio::spawn(prompt::auto_deny(inbox));
    } else {
        // Blocking stdin reads would stall runtime shutdown, so the prompt
        // gets its own thread.
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            if let Err(e) = prompt::run_terminal(inbox, stdin.lock(), std::io::stderr()) {
                tracing::error!(err = %e, "approval prompt failed");
            }
        });
    }

    let dispatcher = Arc::new(Dispatcher::new(
        YamuxMultiplexer::default(),
        DecisionEngine::new(Arc::new(store), approvals),
        SessionProxy::new(
            OpaqueRelayEngine,
            config.known_hosts.clone(),
            config.auth_sock.clone(),
        ),
    ));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    tracing::info!(%addr, known_hosts = %config.known_hosts.display(), "sshgate agent listening");

    let shutdown = CancellationToken::new();
    let server = Server::new(dispatcher, config.max_connections, config.shutdown_grace);
    let mut serve = tokio::spawn(server.run(listener, shutdown.clone()));

    tokio::select! {
        result = &mut serve => return result.context("server task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    }
    serve.await.context("server task panicked")?
}
