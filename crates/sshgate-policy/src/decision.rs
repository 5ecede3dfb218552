use crate::approval::{Approval, ApprovalBroker};
use crate::scope::{ClientEndpoint, Scope};
use crate::store::PolicyStore;
use sshgate::ExecutionRequest;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

/// Turns an execution request into an allow/deny decision.
///
/// Stored rules are consulted first. Only requests they do not cover reach
/// the approval prompt, and durable answers are written back to the store.
#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<PolicyStore>,
    approvals: ApprovalBroker,
}

impl DecisionEngine {
    pub fn new(store: Arc<PolicyStore>, approvals: ApprovalBroker) -> Self {
        Self { store, approvals }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Decide `req` as sent from `client`.
    pub async fn decide(&self, client: &ClientEndpoint, req: &ExecutionRequest) -> Decision {
        let scope = Scope::new(client, req);
        let command = req.command.as_str();

        if self.store.get_rule(&scope).await.is_approved(command) {
            tracing::debug!(%scope, command, "request covered by stored rule");
            return Decision::Allowed;
        }

        let approval = match self.approvals.ask(scope.clone(), command).await {
            Ok(approval) => approval,
            Err(e) => {
                tracing::warn!(%scope, command, err = %e, "approval unavailable, denying");
                return Decision::Denied;
            }
        };
        tracing::info!(%scope, command, %approval, "approval answered");

        let persisted = match approval {
            Approval::Deny => return Decision::Denied,
            Approval::ApproveOnce => Ok(()),
            Approval::ApproveCommandForever => {
                self.store.set_command_allowed(scope.clone(), command).await
            }
            Approval::ApproveAllForever => self.store.set_all_allowed(scope.clone()).await,
        };
        if let Err(e) = persisted {
            // The user approved; losing the durable copy only costs a re-prompt later.
            tracing::error!(%scope, command, err = %e, "failed to persist approval");
        }
        Decision::Allowed
    }
}
