//! Out-of-band approval requests.
//!
//! The decision engine never talks to a user directly. It posts an
//! [`ApprovalRequest`] to whatever UI holds the [`ApprovalInbox`] and waits
//! for the answer on a oneshot channel.

use crate::scope::Scope;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// A user's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Deny,
    /// Allow this request only; nothing is remembered.
    ApproveOnce,
    /// Allow this command for the scope from now on.
    ApproveCommandForever,
    /// Allow every command for the scope from now on.
    ApproveAllForever,
}

impl Approval {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Approval::Deny)
    }
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approval::Deny => write!(f, "deny"),
            Approval::ApproveOnce => write!(f, "approve once"),
            Approval::ApproveCommandForever => write!(f, "approve command forever"),
            Approval::ApproveAllForever => write!(f, "approve all commands forever"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no approval prompt is running")]
    Unavailable,

    #[error("approval prompt dropped the request without answering")]
    Abandoned,
}

/// A pending question for the approval UI.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub scope: Scope,
    pub command: String,
    reply: oneshot::Sender<Approval>,
}

impl ApprovalRequest {
    /// Answer the request. Returns false if the requester already gave up.
    pub fn respond(self, approval: Approval) -> bool {
        self.reply.send(approval).is_ok()
    }

    /// Display form of the command; the empty command is a login shell.
    pub fn command_label(&self) -> &str {
        if self.command.is_empty() {
            "<interactive shell>"
        } else {
            &self.command
        }
    }
}

/// Engine-side handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApprovalBroker {
    tx: mpsc::Sender<ApprovalRequest>,
}

/// UI-side handle. Yields requests in arrival order.
#[derive(Debug)]
pub struct ApprovalInbox {
    rx: mpsc::Receiver<ApprovalRequest>,
}

impl ApprovalBroker {
    pub fn channel(capacity: usize) -> (ApprovalBroker, ApprovalInbox) {
        let (tx, rx) = mpsc::channel(capacity);
        (ApprovalBroker { tx }, ApprovalInbox { rx })
    }

    /// Post a request and wait for the answer.
    pub async fn ask(&self, scope: Scope, command: &str) -> Result<Approval, ApprovalError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(ApprovalRequest {
                scope,
                command: command.to_string(),
                reply,
            })
            .await
            .map_err(|_| ApprovalError::Unavailable)?;
        answer.await.map_err(|_| ApprovalError::Abandoned)
    }
}

impl ApprovalInbox {
    /// Next pending request, or `None` once every broker is gone.
    pub async fn recv(&mut self) -> Option<ApprovalRequest> {
        self.rx.recv().await
    }

    /// Blocking form of [`recv`](Self::recv) for prompts that run on their
    /// own thread. Panics if called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<ApprovalRequest> {
        self.rx.blocking_recv()
    }
}
