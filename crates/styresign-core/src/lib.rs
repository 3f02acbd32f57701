use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod provider;

pub use provider::{
    ConfigError, CreateSessionInput, CreateSessionResult, ProviderError, SessionStatus,
    SignerLink, SignerUpdate, SigningArtifact, SigningProvider, SigningRecipient, WebhookEvent,
    WebhookRequest,
};

/// The closed set of supported signing backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKey {
    Dokobit,
    Signicat,
}

impl ProviderKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::Dokobit => "dokobit",
            ProviderKey::Signicat => "signicat",
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "dokobit" => Ok(ProviderKey::Dokobit),
            "signicat" => Ok(ProviderKey::Signicat),
            other => Err(format!("Unknown signing provider: {other}")),
        }
    }
}

/// Normalized signature lifecycle vocabulary shared by every adapter.
///
/// `Completed` is reserved for package-level "all done, artifact
/// available" and must never be reported for an individual signer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    Created,
    Sent,
    Viewed,
    Signed,
    Declined,
    Failed,
    Expired,
    Cancelled,
    Completed,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Created => "created",
            SignatureStatus::Sent => "sent",
            SignatureStatus::Viewed => "viewed",
            SignatureStatus::Signed => "signed",
            SignatureStatus::Declined => "declined",
            SignatureStatus::Failed => "failed",
            SignatureStatus::Expired => "expired",
            SignatureStatus::Cancelled => "cancelled",
            SignatureStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignatureStatus::Signed
                | SignatureStatus::Declined
                | SignatureStatus::Failed
                | SignatureStatus::Expired
                | SignatureStatus::Cancelled
                | SignatureStatus::Completed
        )
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "created" => Ok(SignatureStatus::Created),
            "sent" => Ok(SignatureStatus::Sent),
            "viewed" => Ok(SignatureStatus::Viewed),
            "signed" => Ok(SignatureStatus::Signed),
            "declined" => Ok(SignatureStatus::Declined),
            "failed" => Ok(SignatureStatus::Failed),
            "expired" => Ok(SignatureStatus::Expired),
            "cancelled" | "canceled" => Ok(SignatureStatus::Cancelled),
            "completed" => Ok(SignatureStatus::Completed),
            other => Err(format!("Unknown signature status: {other}")),
        }
    }
}

/// Meeting lifecycle. `Signed` is terminal and may only be entered by
/// the reconciliation engine (provider path) or the all-signed check
/// (legacy path).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Draft,
    InvitationSent,
    ProtocolDraft,
    PendingSignatures,
    Signed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Draft => "draft",
            MeetingStatus::InvitationSent => "invitation_sent",
            MeetingStatus::ProtocolDraft => "protocol_draft",
            MeetingStatus::PendingSignatures => "pending_signatures",
            MeetingStatus::Signed => "signed",
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "draft" => Ok(MeetingStatus::Draft),
            "invitation_sent" => Ok(MeetingStatus::InvitationSent),
            "protocol_draft" => Ok(MeetingStatus::ProtocolDraft),
            "pending_signatures" => Ok(MeetingStatus::PendingSignatures),
            "signed" => Ok(MeetingStatus::Signed),
            other => Err(format!("Unknown meeting status: {other}")),
        }
    }
}

/// How a meeting's protocol is being signed. Once a meeting is
/// provider-mediated, legacy email-link sign actions are rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SigningMethod {
    EmailLink,
    ProviderBankid,
}

impl SigningMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningMethod::EmailLink => "email_link",
            SigningMethod::ProviderBankid => "provider_bankid",
        }
    }
}

impl fmt::Display for SigningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningMethod {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "email_link" | "legacy" => Ok(SigningMethod::EmailLink),
            "provider_bankid" | "provider" => Ok(SigningMethod::ProviderBankid),
            other => Err(format!("Unknown signing method: {other}")),
        }
    }
}

/// Canonical lowercased/trimmed email form used for signer resolution
/// when a provider echoes back only an email address.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_status_roundtrips_through_strings() {
        for status in [
            SignatureStatus::Created,
            SignatureStatus::Sent,
            SignatureStatus::Viewed,
            SignatureStatus::Signed,
            SignatureStatus::Declined,
            SignatureStatus::Failed,
            SignatureStatus::Expired,
            SignatureStatus::Cancelled,
            SignatureStatus::Completed,
        ] {
            let parsed: SignatureStatus = status.as_str().parse().expect("parse");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn status_parsing_accepts_spelling_variants() {
        assert_eq!(
            "canceled".parse::<SignatureStatus>().expect("parse"),
            SignatureStatus::Cancelled
        );
        assert_eq!(
            " Signed ".parse::<SignatureStatus>().expect("parse"),
            SignatureStatus::Signed
        );
        assert!("archived".parse::<SignatureStatus>().is_err());
    }

    #[test]
    fn provider_key_parsing_is_case_insensitive() {
        assert_eq!(
            "Dokobit".parse::<ProviderKey>().expect("parse"),
            ProviderKey::Dokobit
        );
        assert_eq!(
            "SIGNICAT".parse::<ProviderKey>().expect("parse"),
            ProviderKey::Signicat
        );
        assert!("docusign".parse::<ProviderKey>().is_err());
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Kari@Example.NO "), "kari@example.no");
    }
}
