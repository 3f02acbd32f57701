//! Public operations: send a protocol for signature, refresh a
//! session, handle a webhook, and the legacy email-link signing path.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use styresign_core::{
    CreateSessionInput, ProviderKey, SigningMethod, SigningProvider, SigningRecipient,
    WebhookRequest,
};
use styresign_storage::{
    ArtifactVault, BoardMember, BoardStore, Meeting, MeetingStatus, SigningToken,
};

use crate::reconcile::{all_active_members_signed, reconcile, ReconcileInput, ReconcileOutcome};
use crate::{EngineError, Mailer, OutboundMail, ProtocolRenderer, CHAIR_ROLE};

const PROTOCOL_FILE_NAME: &str = "protokoll.pdf";
const SIGNING_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A provider session was created; signers follow provider links.
    Provider { provider: ProviderKey },
    /// No provider configured; signers received single-use email links.
    EmailLink { recipients: usize },
}

/// Always 200-able webhook result for the ingress layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// No provider configured; nothing to validate against.
    Disabled,
    /// Wrong provider, failed authentication or unmappable payload.
    Rejected,
    /// Valid payload for a session this system never tracked.
    Ignored,
    Handled { meeting_id: String, finalized: bool },
}

pub struct SigningService {
    store: BoardStore,
    vault: ArtifactVault,
    provider: Option<Arc<dyn SigningProvider>>,
    renderer: Arc<dyn ProtocolRenderer>,
    mailer: Arc<dyn Mailer>,
    base_url: String,
}

impl SigningService {
    pub fn new(
        store: BoardStore,
        vault: ArtifactVault,
        provider: Option<Arc<dyn SigningProvider>>,
        renderer: Arc<dyn ProtocolRenderer>,
        mailer: Arc<dyn Mailer>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vault,
            provider,
            renderer,
            mailer,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn vault(&self) -> &ArtifactVault {
        &self.vault
    }

    /// Sends the meeting's protocol out for signature: provider session
    /// when one is configured, single-use email links otherwise.
    pub fn send_for_signature(
        &self,
        meeting_id: &str,
        actor_member_id: &str,
    ) -> Result<SendOutcome, EngineError> {
        let meeting = self.meeting(meeting_id)?;
        self.authorize_chair(&meeting, actor_member_id)?;
        if meeting.status == MeetingStatus::Signed {
            return Err(EngineError::AlreadySigned);
        }

        let members = self.store.board_members(&meeting.company_id)?;
        let active: Vec<&BoardMember> = members.iter().filter(|member| member.active).collect();
        let recipients: Vec<SigningRecipient> = active
            .iter()
            .filter_map(|member| {
                let email = member.email.as_deref()?.trim();
                if email.is_empty() {
                    return None;
                }
                Some(SigningRecipient {
                    board_member_id: member.member_id.clone(),
                    name: member.name.clone(),
                    email: email.to_string(),
                    role: Some(member.role.clone()),
                })
            })
            .collect();
        if recipients.is_empty() {
            return Err(EngineError::NoEligibleRecipients);
        }

        let document = self
            .renderer
            .render_protocol(&meeting)
            .map_err(|err| EngineError::Render(err.to_string()))?;

        match self.provider.as_deref() {
            Some(provider) => {
                self.send_via_provider(&meeting, &active, recipients, document, provider)
            }
            None => self.send_via_email_links(&meeting, &active, recipients, document),
        }
    }

    fn send_via_provider(
        &self,
        meeting: &Meeting,
        active: &[&BoardMember],
        recipients: Vec<SigningRecipient>,
        document: Vec<u8>,
        provider: &dyn SigningProvider,
    ) -> Result<SendOutcome, EngineError> {
        let input = CreateSessionInput {
            meeting_id: meeting.meeting_id.clone(),
            company_id: meeting.company_id.clone(),
            company_name: meeting.company_name.clone(),
            protocol_date_label: meeting.protocol_date_label.clone(),
            file_name: PROTOCOL_FILE_NAME.to_string(),
            document_sha256: sha256_hex(&document),
            document,
            recipients,
            redirect_url: Some(format!(
                "{}/meetings/{}",
                self.base_url, meeting.meeting_id
            )),
            postback_url: Some(format!(
                "{}/api/signing/{}/webhook",
                self.base_url,
                provider.key()
            )),
        };

        // Session creation happens before any local signing write, so
        // a provider failure leaves the meeting untouched and safe to
        // retry.
        let created = provider.create_signing_session(&input)?;

        for member in active {
            self.store
                .ensure_signature(&meeting.meeting_id, &member.member_id)?;
        }
        let protocol_path = self.vault.store_unsigned_protocol(
            &meeting.company_id,
            &meeting.meeting_id,
            &input.document,
        )?;
        self.store.record_provider_session(
            &meeting.meeting_id,
            provider.key(),
            &created.provider_session_id,
            created.signature_level.as_deref(),
            &protocol_path,
        )?;

        for link in &created.signer_links {
            let Some(url) = link.signature_url.as_deref() else {
                continue;
            };
            let mail = OutboundMail {
                to: link.email.clone(),
                subject: format!("Protokoll til signering - {}", meeting.company_name),
                body: format!(
                    "Protokollen fra styremøtet {} i {} venter på din signatur:\n{}",
                    meeting.protocol_date_label, meeting.company_name, url
                ),
            };
            if let Err(err) = self.mailer.send(&mail) {
                warn!(to = %link.email, error = %err, "signing link email failed");
            }
        }

        Ok(SendOutcome::Provider {
            provider: provider.key(),
        })
    }

    fn send_via_email_links(
        &self,
        meeting: &Meeting,
        active: &[&BoardMember],
        recipients: Vec<SigningRecipient>,
        document: Vec<u8>,
    ) -> Result<SendOutcome, EngineError> {
        let protocol_path = self.vault.store_unsigned_protocol(
            &meeting.company_id,
            &meeting.meeting_id,
            &document,
        )?;
        self.store
            .record_email_link_send(&meeting.meeting_id, &protocol_path)?;
        for member in active {
            self.store
                .ensure_signature(&meeting.meeting_id, &member.member_id)?;
        }

        let expires_at = Utc::now() + chrono::Duration::days(SIGNING_TOKEN_TTL_DAYS);
        for recipient in &recipients {
            let token = Uuid::new_v4().to_string();
            self.store.insert_signing_token(&SigningToken {
                token: token.clone(),
                meeting_id: meeting.meeting_id.clone(),
                board_member_id: recipient.board_member_id.clone(),
                expires_at,
                used_at: None,
            })?;

            let mail = OutboundMail {
                to: recipient.email.clone(),
                subject: format!("Protokoll til signering - {}", meeting.company_name),
                body: format!(
                    "Protokollen fra styremøtet {} i {} venter på din signatur:\n{}/sign/{}\n\nLenken er gyldig i {} dager.",
                    meeting.protocol_date_label,
                    meeting.company_name,
                    self.base_url,
                    token,
                    SIGNING_TOKEN_TTL_DAYS
                ),
            };
            if let Err(err) = self.mailer.send(&mail) {
                warn!(to = %recipient.email, error = %err, "signing link email failed");
            }
        }

        Ok(SendOutcome::EmailLink {
            recipients: recipients.len(),
        })
    }

    /// On-demand poll, feeding the result through the same
    /// reconciliation path a webhook takes.
    pub fn refresh_status(
        &self,
        meeting_id: &str,
        actor_member_id: &str,
    ) -> Result<ReconcileOutcome, EngineError> {
        let meeting = self.meeting(meeting_id)?;
        self.authorize_chair(&meeting, actor_member_id)?;

        let session_id = match (meeting.signing_method, &meeting.signing_provider_session_id) {
            (Some(SigningMethod::ProviderBankid), Some(session_id)) => session_id.as_str(),
            _ => return Err(EngineError::NotProviderManaged),
        };
        let provider = self
            .provider
            .as_deref()
            .ok_or(EngineError::SigningDisabled)?;

        let status = provider.signing_session_status(session_id)?;
        reconcile(
            &self.store,
            &self.vault,
            provider,
            &ReconcileInput {
                provider_session_id: session_id,
                signer_updates: &status.signer_updates,
                package_status: status.package_status,
                completed: status.is_completed(),
            },
        )
    }

    /// Validates and applies an inbound provider callback. Every
    /// outcome maps to an HTTP 200 upstream; provider retries of a
    /// delivery this system cannot use are noise, not signal.
    pub fn handle_webhook(
        &self,
        provider_key: ProviderKey,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, EngineError> {
        let Some(provider) = self.provider.as_deref() else {
            return Ok(WebhookOutcome::Disabled);
        };
        if provider.key() != provider_key {
            warn!(
                configured = %provider.key(),
                received = %provider_key,
                "webhook for unconfigured provider"
            );
            return Ok(WebhookOutcome::Rejected);
        }
        let Some(event) = provider.parse_webhook(request) else {
            return Ok(WebhookOutcome::Rejected);
        };

        let outcome = reconcile(
            &self.store,
            &self.vault,
            provider,
            &ReconcileInput {
                provider_session_id: &event.provider_session_id,
                signer_updates: &event.signer_updates,
                package_status: event.package_status,
                completed: event.completed,
            },
        )?;
        Ok(match outcome {
            ReconcileOutcome::Ignored => WebhookOutcome::Ignored,
            ReconcileOutcome::Applied {
                meeting_id,
                finalized,
            } => WebhookOutcome::Handled {
                meeting_id,
                finalized,
            },
        })
    }

    /// Legacy email-link signing via a mailed single-use token.
    pub fn sign_with_token(&self, token: &str, typed_name: &str) -> Result<(), EngineError> {
        let record = self
            .store
            .signing_token(token)?
            .ok_or(EngineError::InvalidToken)?;
        if record.used_at.is_some() || record.expires_at <= Utc::now() {
            return Err(EngineError::InvalidToken);
        }

        self.apply_typed_signature(&record.meeting_id, &record.board_member_id, typed_name)?;
        self.store.mark_signing_token_used(token, Utc::now())?;
        Ok(())
    }

    /// Legacy signing for a member authenticated by the surrounding
    /// application (in-app signing without a mailed link).
    pub fn sign_as_member(
        &self,
        meeting_id: &str,
        board_member_id: &str,
        typed_name: &str,
    ) -> Result<(), EngineError> {
        self.apply_typed_signature(meeting_id, board_member_id, typed_name)
    }

    fn apply_typed_signature(
        &self,
        meeting_id: &str,
        board_member_id: &str,
        typed_name: &str,
    ) -> Result<(), EngineError> {
        let meeting = self.meeting(meeting_id)?;
        if meeting.signing_method == Some(SigningMethod::ProviderBankid) {
            return Err(EngineError::ProviderManaged);
        }
        if meeting.status == MeetingStatus::Signed {
            return Err(EngineError::AlreadySigned);
        }

        let record = self
            .store
            .ensure_and_fetch_signature(meeting_id, board_member_id)?;
        if !self
            .store
            .record_typed_signature(&record.signature_id, typed_name, Utc::now())?
        {
            return Err(EngineError::AlreadySigned);
        }

        let members = self.store.board_members(&meeting.company_id)?;
        let records = self.store.signatures(meeting_id)?;
        if all_active_members_signed(&members, &records) {
            // The typed-name path has no external artifact; the stored
            // protocol itself becomes the signed document of record.
            match meeting.protocol_path.as_deref() {
                Some(protocol_path) => {
                    let bytes = self.vault.get(protocol_path)?;
                    let signed_path = self.vault.store_signed_protocol(
                        &meeting.company_id,
                        meeting_id,
                        &bytes,
                    )?;
                    self.store
                        .mark_meeting_signed(meeting_id, &signed_path, Utc::now())?;
                }
                None => self.store.set_meeting_status(meeting_id, MeetingStatus::Signed)?,
            }
        }
        Ok(())
    }

    fn meeting(&self, meeting_id: &str) -> Result<Meeting, EngineError> {
        self.store
            .meeting(meeting_id)?
            .ok_or_else(|| EngineError::MeetingNotFound(meeting_id.to_string()))
    }

    fn authorize_chair(
        &self,
        meeting: &Meeting,
        actor_member_id: &str,
    ) -> Result<(), EngineError> {
        let members = self.store.board_members(&meeting.company_id)?;
        let is_chair = members.iter().any(|member| {
            member.member_id == actor_member_id
                && member.active
                && member.role.eq_ignore_ascii_case(CHAIR_ROLE)
        });
        if is_chair {
            Ok(())
        } else {
            Err(EngineError::NotAuthorized)
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(output, "{byte:02x}");
    }
    output
}
