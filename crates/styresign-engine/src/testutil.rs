//! Shared fixtures for engine tests: an in-memory board with two
//! members, a tempdir-backed vault, and a scriptable provider that
//! counts its artifact downloads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use styresign_core::{
    CreateSessionInput, CreateSessionResult, ProviderError, ProviderKey, SessionStatus,
    SignatureStatus, SignerLink, SignerUpdate, SigningArtifact, SigningProvider, WebhookEvent,
    WebhookRequest,
};
use styresign_storage::{ArtifactVault, BoardMember, BoardStore, Meeting, MeetingStatus};

use crate::{Mailer, OutboundMail, ProtocolRenderer};

pub struct VaultFixture {
    _dir: tempfile::TempDir,
    pub vault: ArtifactVault,
}

impl VaultFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let vault = ArtifactVault::new(dir.path());
        Self { _dir: dir, vault }
    }
}

/// Meeting `m-1` for `company-1` with chair alice and member bob, no
/// signing state yet.
pub fn fresh_board_fixture() -> BoardStore {
    let store = BoardStore::open_in_memory().expect("open db");
    store
        .insert_meeting(&Meeting {
            meeting_id: "m-1".to_string(),
            company_id: "company-1".to_string(),
            company_name: "Fjellheim AS".to_string(),
            title: Some("Styremøte mars".to_string()),
            protocol_date_label: "14.03.2026".to_string(),
            status: MeetingStatus::ProtocolDraft,
            signing_provider: None,
            signing_provider_session_id: None,
            signing_method: None,
            signature_level: None,
            protocol_path: None,
            signed_protocol_path: None,
            signing_completed_at: None,
        })
        .expect("insert meeting");
    store
        .insert_board_member(&BoardMember {
            member_id: "member-alice".to_string(),
            company_id: "company-1".to_string(),
            name: "Alice Nordmann".to_string(),
            email: Some("alice@example.no".to_string()),
            role: "styreleder".to_string(),
            active: true,
        })
        .expect("insert alice");
    store
        .insert_board_member(&BoardMember {
            member_id: "member-bob".to_string(),
            company_id: "company-1".to_string(),
            name: "Bob Hansen".to_string(),
            email: Some("bob@example.no".to_string()),
            role: "styremedlem".to_string(),
            active: true,
        })
        .expect("insert bob");
    store
}

/// The same board, already sent for provider signing under session
/// `sess-1` with a signature row per member.
pub fn board_fixture() -> BoardStore {
    let store = fresh_board_fixture();
    store
        .record_provider_session(
            "m-1",
            ProviderKey::Dokobit,
            "sess-1",
            Some("aes"),
            "company-1/m-1/protokoll.pdf",
        )
        .expect("record session");
    store.ensure_signature("m-1", "member-alice").expect("alice row");
    store.ensure_signature("m-1", "member-bob").expect("bob row");
    store
}

pub fn signed_update(board_member_id: &str) -> SignerUpdate {
    update_with(Some(board_member_id), None, SignatureStatus::Signed, None)
}

pub fn update_with(
    board_member_id: Option<&str>,
    email: Option<&str>,
    status: SignatureStatus,
    signed_at: Option<DateTime<Utc>>,
) -> SignerUpdate {
    SignerUpdate {
        board_member_id: board_member_id.map(ToString::to_string),
        email: email.map(ToString::to_string),
        provider_signer_id: None,
        status,
        signed_at,
        raw: Value::Null,
    }
}

pub struct MockProvider {
    pub downloads: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub fail_create: bool,
    artifact: Mutex<Option<Vec<u8>>>,
    status: Mutex<Option<SessionStatus>>,
    webhook_event: Mutex<Option<WebhookEvent>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            downloads: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            fail_create: false,
            artifact: Mutex::new(Some(b"%PDF-signed".to_vec())),
            status: Mutex::new(None),
            webhook_event: Mutex::new(None),
        }
    }

    pub fn failing_create() -> Self {
        let mut provider = Self::new();
        provider.fail_create = true;
        provider
    }

    /// `None` makes the signed artifact read as not-ready.
    pub fn set_artifact(&self, artifact: Option<Vec<u8>>) {
        *self.artifact.lock().expect("artifact lock") = artifact;
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock().expect("status lock") = Some(status);
    }

    pub fn set_webhook_event(&self, event: Option<WebhookEvent>) {
        *self.webhook_event.lock().expect("webhook lock") = event;
    }
}

impl SigningProvider for MockProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::Dokobit
    }

    fn create_signing_session(
        &self,
        input: &CreateSessionInput,
    ) -> Result<CreateSessionResult, ProviderError> {
        if self.fail_create {
            return Err(ProviderError::RequestFailed {
                provider: self.key(),
                status: 502,
                detail: "backend unavailable".to_string(),
            });
        }
        Ok(CreateSessionResult {
            provider_session_id: "sess-1".to_string(),
            signature_level: Some("aes".to_string()),
            signer_links: input
                .recipients
                .iter()
                .map(|recipient| SignerLink {
                    board_member_id: recipient.board_member_id.clone(),
                    email: recipient.email.clone(),
                    signature_url: Some(format!(
                        "https://sign.test/{}",
                        recipient.board_member_id
                    )),
                })
                .collect(),
            raw: json!({ "mock": true }),
        })
    }

    fn signing_session_status(
        &self,
        _provider_session_id: &str,
    ) -> Result<SessionStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .status
            .lock()
            .expect("status lock")
            .clone()
            .unwrap_or(SessionStatus {
                package_status: None,
                signer_updates: Vec::new(),
                raw: Value::Null,
            }))
    }

    fn download_signed_document(
        &self,
        _provider_session_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.artifact
            .lock()
            .expect("artifact lock")
            .clone()
            .ok_or(ProviderError::ArtifactNotReady {
                provider: self.key(),
                detail: "container still building".to_string(),
            })
    }

    fn download_evidence(
        &self,
        _provider_session_id: &str,
    ) -> Result<Vec<SigningArtifact>, ProviderError> {
        Ok(vec![SigningArtifact {
            filename: "audit.json".to_string(),
            content_type: "application/json".to_string(),
            content: b"{}".to_vec(),
        }])
    }

    fn parse_webhook(&self, _request: &WebhookRequest) -> Option<WebhookEvent> {
        self.webhook_event.lock().expect("webhook lock").clone()
    }
}

pub struct MockRenderer;

impl ProtocolRenderer for MockRenderer {
    fn render_protocol(&self, _meeting: &Meeting) -> anyhow::Result<Vec<u8>> {
        Ok(b"%PDF-1.7 protokoll".to_vec())
    }
}

#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<OutboundMail>>,
    pub fail: bool,
}

impl Mailer for MockMailer {
    fn send(&self, mail: &OutboundMail) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().expect("sent lock").push(mail.clone());
        Ok(())
    }
}
