//! The sshgate agent: accepts multiplexed connections from peers, decides
//! whether the requested command may run, proxies the approved SSH session
//! and reports the transport offset at which the peer takes over.

pub mod config;
pub mod counting;
pub mod dispatcher;
pub mod engine;
pub mod forwarding;
pub mod known_hosts;
pub mod mux;
pub mod prompt;
pub mod proxy;
pub mod server;

pub use config::AgentConfig;
pub use dispatcher::{ConnectionOutcome, Dispatcher};
pub use engine::{ClientConfig, OpaqueRelayEngine, ProxyEngine, ProxyParams, ProxySession};
pub use mux::{MuxSession, Multiplexer, YamuxMultiplexer};
pub use proxy::{HandoffState, SessionError, SessionProxy};
pub use server::Server;
