//! Signing workflow engine: session initiation, status polling,
//! webhook handling and the reconciliation state machine.
//!
//! All signing-related writes to the store flow through this crate.
//! The web layer, PDF rendering and mail transport stay outside; they
//! are reached through the narrow seams in this module.

use thiserror::Error;

use styresign_core::{ConfigError, ProviderError};
use styresign_storage::{Meeting, StorageError};

mod reconcile;
mod registry;
mod service;
#[cfg(test)]
mod testutil;

pub use reconcile::{reconcile, ReconcileInput, ReconcileOutcome};
pub use registry::{configured_provider_key, provider_from_env, PROVIDER_ENV_VAR};
pub use service::{SendOutcome, SigningService, WebhookOutcome};

/// Board role allowed to initiate and refresh signing.
pub const CHAIR_ROLE: &str = "styreleder";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("meeting not found: {0}")]
    MeetingNotFound(String),
    #[error("only the board chair can perform this action")]
    NotAuthorized,
    #[error("the protocol is already signed")]
    AlreadySigned,
    #[error("no active board member has an email address")]
    NoEligibleRecipients,
    #[error("meeting is not managed by a signing provider")]
    NotProviderManaged,
    #[error("meeting is provider-managed; email-link signing is unavailable")]
    ProviderManaged,
    #[error("signing link is invalid, used or expired")]
    InvalidToken,
    #[error("no signing provider is configured")]
    SigningDisabled,
    #[error("protocol rendering failed: {0}")]
    Render(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Renders the protocol PDF for a meeting. Rendering is a separate
/// subsystem; failures come back untyped.
pub trait ProtocolRenderer: Send + Sync {
    fn render_protocol(&self, meeting: &Meeting) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Best-effort outbound mail. Senders log failures and move on; a lost
/// notification never rolls back signing state.
pub trait Mailer: Send + Sync {
    fn send(&self, mail: &OutboundMail) -> anyhow::Result<()>;
}
