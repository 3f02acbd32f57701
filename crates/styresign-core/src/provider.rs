//! Provider-agnostic signing contracts.
//!
//! Every backend adapter translates its own wire protocol into these
//! types; nothing here is persisted as-is. Raw provider payloads are
//! carried through as opaque [`serde_json::Value`] blobs for audit and
//! never drive control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{ProviderKey, SignatureStatus};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed ({status}): {detail}")]
    RequestFailed {
        provider: ProviderKey,
        status: u16,
        detail: String,
    },
    #[error("{provider} transport error: {detail}")]
    Transport {
        provider: ProviderKey,
        detail: String,
    },
    #[error("{provider} returned a malformed response: {detail}")]
    MalformedResponse {
        provider: ProviderKey,
        detail: String,
    },
    /// The provider has not produced the finished signed container yet.
    /// Recoverable; callers retry on a later poll or webhook.
    #[error("{provider} signed artifact not ready: {detail}")]
    ArtifactNotReady {
        provider: ProviderKey,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown signing provider: {0}")]
    UnknownProvider(String),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

/// One recipient slot in a signing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRecipient {
    pub board_member_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Everything an adapter needs to create one external package covering
/// every signer of a meeting's protocol.
#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub meeting_id: String,
    pub company_id: String,
    pub company_name: String,
    pub protocol_date_label: String,
    pub file_name: String,
    pub document: Vec<u8>,
    /// Stable hex sha256 of `document`, computed by the caller.
    pub document_sha256: String,
    pub recipients: Vec<SigningRecipient>,
    pub redirect_url: Option<String>,
    /// Callback URL registered with the provider at creation time.
    pub postback_url: Option<String>,
}

/// A provider-issued signing link for one recipient, when the backend
/// returns one at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerLink {
    pub board_member_id: String,
    pub email: String,
    pub signature_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSessionResult {
    /// Opaque external identifier; the single join key for the whole
    /// meeting thereafter.
    pub provider_session_id: String,
    pub signature_level: Option<String>,
    pub signer_links: Vec<SignerLink>,
    pub raw: Value,
}

/// One normalized per-signer status observation.
#[derive(Debug, Clone)]
pub struct SignerUpdate {
    pub board_member_id: Option<String>,
    pub email: Option<String>,
    pub provider_signer_id: Option<String>,
    pub status: SignatureStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// Result of a side-effect-free status poll.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub package_status: Option<SignatureStatus>,
    pub signer_updates: Vec<SignerUpdate>,
    pub raw: Value,
}

impl SessionStatus {
    pub fn is_completed(&self) -> bool {
        self.package_status == Some(SignatureStatus::Completed)
    }
}

/// Normalized inbound provider callback.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider_session_id: String,
    pub event_type: Option<String>,
    pub signer_updates: Vec<SignerUpdate>,
    pub package_status: Option<SignatureStatus>,
    pub completed: bool,
    pub raw: Value,
}

/// An evidence or audit blob produced at finalization time.
#[derive(Debug, Clone)]
pub struct SigningArtifact {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A framework-free carrier for an inbound webhook delivery: header
/// names are matched case-insensitively, the body is the raw bytes as
/// received. The HTTP ingress layer stays outside this crate.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.headers
            .iter()
            .find(|(header, _)| *header == wanted)
            .map(|(_, value)| value.as_str())
    }

    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// The capability set every signing backend implements. Implemented
/// identically by every adapter; the registry selects one instance at
/// startup.
pub trait SigningProvider: Send + Sync {
    fn key(&self) -> ProviderKey;

    /// Creates one external package with one signer slot per recipient.
    /// Must not leave partial local state behind on failure; callers
    /// persist session identifiers only after success.
    fn create_signing_session(
        &self,
        input: &CreateSessionInput,
    ) -> Result<CreateSessionResult, ProviderError>;

    /// Idempotent, side-effect-free poll of the session's current state.
    fn signing_session_status(
        &self,
        provider_session_id: &str,
    ) -> Result<SessionStatus, ProviderError>;

    /// Fetches the final signed document. `ArtifactNotReady` signals
    /// "not yet", never "never".
    fn download_signed_document(
        &self,
        provider_session_id: &str,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Fetches evidence artifacts; at minimum an audit record of the
    /// session status at fetch time.
    fn download_evidence(
        &self,
        provider_session_id: &str,
    ) -> Result<Vec<SigningArtifact>, ProviderError>;

    /// Validates and normalizes an inbound callback. Returns `None`
    /// when authentication fails or the payload cannot be mapped, so
    /// the ingress layer can acknowledge and move on.
    fn parse_webhook(&self, request: &WebhookRequest) -> Option<WebhookEvent>;
}
