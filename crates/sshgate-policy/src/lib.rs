pub mod approval;
pub mod decision;
pub mod scope;
pub mod store;

pub use approval::{Approval, ApprovalBroker, ApprovalError, ApprovalInbox, ApprovalRequest};
pub use decision::{Decision, DecisionEngine};
pub use scope::{ClientEndpoint, Rule, Scope, ServerAddr};
pub use store::{PolicyStore, StoreError, StoreSnapshot};
