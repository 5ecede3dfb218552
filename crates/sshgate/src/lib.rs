//! Control-channel protocol for sshgate.
//!
//! A peer asks the agent to run a command on a server, the agent answers with
//! an approval or a denial, and once the proxied session is done the agent
//! reports where raw forwarding of the transport stream may resume.

pub mod client;
pub mod codec;
pub mod error;
pub mod messages;
pub mod wire;

pub use codec::{ControlCodec, ControlPacket, MAX_CONTROL_FRAME};
pub use error::ProtocolError;
pub use messages::{
    AgentForwardingNotice, ControlKind, ExecutionApproved, ExecutionDenied, ExecutionRequest,
    HandoffComplete,
};
pub use wire::WireMessage;

/// Default TCP port the agent listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 2345;
