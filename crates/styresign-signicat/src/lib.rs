//! Signicat signing adapter.
//!
//! Signicat splits a signing transaction across three resources: the
//! uploaded document, a document collection wrapping it, and one
//! signing session per recipient. The first session id doubles as the
//! package key; recipients are correlated back through an
//! `externalReference` of the form `meeting:member:timestamp`. Auth is
//! OAuth2 client credentials with a short-lived bearer token.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use styresign_core::{
    CreateSessionInput, CreateSessionResult, ProviderError, ProviderKey, SessionStatus,
    SignatureStatus, SignerLink, SignerUpdate, SigningArtifact, SigningProvider, WebhookEvent,
    WebhookRequest,
};

const KEY: ProviderKey = ProviderKey::Signicat;

const ERROR_DETAIL_LIMIT: usize = 4096;

/// Tokens within this window of expiry are refreshed eagerly so an
/// in-flight request cannot outlive its bearer token.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 10;

#[derive(Debug, Clone)]
pub struct SignicatConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: Option<String>,
    pub token_path: String,
    pub scope: String,
    pub documents_path: String,
    pub document_collections_path: String,
    pub signings_path: String,
    pub idp_name: String,
    pub vendor: String,
    pub signing_flow: String,
    pub ui_language: String,
    pub timeout: Duration,
}

impl SignicatConfig {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            webhook_secret: None,
            token_path: "/auth/open/connect/token".to_string(),
            scope: "signicat-api".to_string(),
            documents_path: "/sign/documents".to_string(),
            document_collections_path: "/sign/document-collections".to_string(),
            signings_path: "/sign/signing-sessions".to_string(),
            idp_name: "nbid".to_string(),
            vendor: "NBID".to_string(),
            signing_flow: "PKISIGNING".to_string(),
            ui_language: "nb".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, styresign_core::ConfigError> {
        let required = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or(styresign_core::ConfigError::MissingCredential(name))
        };
        let mut config = Self::new(
            required("SIGNICAT_BASE_URL")?,
            required("SIGNICAT_CLIENT_ID")?,
            required("SIGNICAT_CLIENT_SECRET")?,
        );

        config.webhook_secret = std::env::var("SIGNICAT_WEBHOOK_SECRET")
            .ok()
            .filter(|value| !value.is_empty());
        if let Ok(value) = std::env::var("SIGNICAT_TOKEN_PATH") {
            config.token_path = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_SCOPE") {
            config.scope = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_DOCUMENTS_PATH") {
            config.documents_path = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_DOCUMENT_COLLECTIONS_PATH") {
            config.document_collections_path = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_SIGNINGS_PATH") {
            config.signings_path = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_IDP_NAME") {
            config.idp_name = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_VENDOR") {
            config.vendor = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_SIGNING_FLOW") {
            config.signing_flow = value;
        }
        if let Ok(value) = std::env::var("SIGNICAT_UI_LANGUAGE") {
            config.ui_language = value;
        }

        Ok(config)
    }

    fn uses_pki_signing(&self) -> bool {
        self.signing_flow.eq_ignore_ascii_case("PKISIGNING")
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn still_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + chrono::Duration::seconds(TOKEN_EXPIRY_SLACK_SECS)
    }
}

pub struct SignicatProvider {
    config: SignicatConfig,
    agent: ureq::Agent,
    // Owned by this instance, never shared across adapters. The mutex
    // makes a concurrent refresh waste at most one extra token call.
    token_cache: Mutex<Option<CachedToken>>,
}

impl SignicatProvider {
    pub fn new(config: SignicatConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(config.timeout)
            .build();
        Self {
            config,
            agent,
            token_cache: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn access_token(&self) -> Result<String, ProviderError> {
        let mut cache = self
            .token_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = cache.as_ref() {
            if token.still_valid(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let response = http_result(
            self.agent
                .post(&self.url(&self.config.token_path))
                .send_form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", &self.config.client_id),
                    ("client_secret", &self.config.client_secret),
                    ("scope", &self.config.scope),
                ]),
        )?;
        let payload = safe_json(response);
        let token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("token response missing access_token"))?
            .to_string();
        let expires_in = payload
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(300);

        *cache = Some(CachedToken {
            value: token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        });
        Ok(token)
    }

    fn get_json(&self, path: &str) -> Result<Value, ProviderError> {
        let token = self.access_token()?;
        let response = http_result(
            self.agent
                .get(&self.url(path))
                .set("Authorization", &format!("Bearer {token}"))
                .call(),
        )?;
        Ok(safe_json(response))
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let token = self.access_token()?;
        let serialized = serde_json::to_string(body).map_err(|err| ProviderError::Transport {
            provider: KEY,
            detail: err.to_string(),
        })?;
        let response = http_result(
            self.agent
                .post(&self.url(path))
                .set("Authorization", &format!("Bearer {token}"))
                .set("Content-Type", "application/json")
                .send_string(&serialized),
        )?;
        Ok(safe_json(response))
    }

    fn fetch_session(&self, provider_session_id: &str) -> Result<Value, ProviderError> {
        self.get_json(&format!(
            "{}/{}",
            self.config.signings_path, provider_session_id
        ))
    }

    fn signing_setup(&self) -> Value {
        if self.config.uses_pki_signing() {
            json!([{ "signingFlow": "PKISIGNING", "vendor": self.config.vendor }])
        } else {
            json!([{
                "identityProviders": [{ "idpName": self.config.idp_name }],
                "signingFlow": self.config.signing_flow,
            }])
        }
    }
}

impl SigningProvider for SignicatProvider {
    fn key(&self) -> ProviderKey {
        KEY
    }

    fn create_signing_session(
        &self,
        input: &CreateSessionInput,
    ) -> Result<CreateSessionResult, ProviderError> {
        let token = self.access_token()?;
        let upload = http_result(
            self.agent
                .post(&self.url(&self.config.documents_path))
                .set("Authorization", &format!("Bearer {token}"))
                .set("Content-Type", "application/pdf")
                .send_bytes(&input.document),
        )?;
        let document_raw = safe_json(upload);
        let document_id = document_raw
            .get("documentId")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("document upload did not return documentId"))?
            .to_string();

        let collection_raw = self.post_json(
            &self.config.document_collections_path,
            &json!({ "documents": [{ "documentId": document_id }] }),
        )?;
        let collection_id = collection_raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("document collection response did not include id"))?
            .to_string();

        let mut signer_links = Vec::with_capacity(input.recipients.len());
        let mut session_entries = Vec::with_capacity(input.recipients.len());
        let mut provider_session_id: Option<String> = None;

        for recipient in &input.recipients {
            let external_reference = format!(
                "{}:{}:{}",
                input.meeting_id,
                recipient.board_member_id,
                Utc::now().timestamp_millis()
            );
            let mut session = json!({
                "title": format!(
                    "Protokollsignering - {} - {}",
                    input.company_name, input.protocol_date_label
                ),
                "externalReference": external_reference,
                "documents": [{
                    "action": "SIGN",
                    "documentCollectionId": collection_id,
                    "documentId": document_id,
                }],
                "signingSetup": self.signing_setup(),
                "ui": { "language": self.config.ui_language },
            });
            if !self.config.uses_pki_signing() {
                session["packageTo"] = json!(["PADES_CONTAINER"]);
            }
            if let Some(redirect_url) = input.redirect_url.as_deref() {
                session["redirectSettings"] = json!({
                    "success": redirect_url,
                    "error": redirect_url,
                    "cancel": redirect_url,
                });
            }

            let raw = self.post_json(&self.config.signings_path, &json!([session]))?;
            let record = raw
                .as_array()
                .and_then(|sessions| sessions.first())
                .and_then(Value::as_object)
                .ok_or_else(|| malformed("signing session response was not a non-empty array"))?;
            let session_id = record
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("signing session response did not include id"))?
                .to_string();
            let signature_url = record
                .get("signatureUrl")
                .and_then(Value::as_str)
                .map(ToString::to_string);

            if provider_session_id.is_none() {
                provider_session_id = Some(session_id.clone());
            }
            signer_links.push(SignerLink {
                board_member_id: recipient.board_member_id.clone(),
                email: recipient.email.clone(),
                signature_url: signature_url.clone(),
            });
            session_entries.push(json!({
                "boardMemberId": recipient.board_member_id,
                "email": recipient.email,
                "sessionId": session_id,
                "signatureUrl": signature_url,
                "externalReference": external_reference,
            }));
        }

        let provider_session_id = provider_session_id
            .ok_or_else(|| malformed("no signing session was created (empty recipient list)"))?;

        Ok(CreateSessionResult {
            provider_session_id,
            signature_level: Some("aes".to_string()),
            signer_links,
            raw: json!({
                "document": document_raw,
                "documentCollection": collection_raw,
                "signingSessions": session_entries,
                "signingSetupDefaults": {
                    "signingFlow": self.config.signing_flow,
                    "vendor": self.config.vendor,
                    "idpName": self.config.idp_name,
                },
            }),
        })
    }

    fn signing_session_status(
        &self,
        provider_session_id: &str,
    ) -> Result<SessionStatus, ProviderError> {
        let raw = self.fetch_session(provider_session_id)?;
        Ok(parse_session_status(&raw, provider_session_id))
    }

    fn download_signed_document(
        &self,
        provider_session_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let session = self.fetch_session(provider_session_id)?;
        let result_document_id =
            find_pades_result_document(&session).ok_or(ProviderError::ArtifactNotReady {
                provider: KEY,
                detail: "signing session does not contain a PAdES result document yet".to_string(),
            })?;

        let token = self.access_token()?;
        let response = http_result(
            self.agent
                .get(&self.url(&format!(
                    "{}/{}",
                    self.config.documents_path, result_document_id
                )))
                .set("Authorization", &format!("Bearer {token}"))
                .call(),
        )?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| ProviderError::Transport {
                provider: KEY,
                detail: err.to_string(),
            })?;
        Ok(bytes)
    }

    fn download_evidence(
        &self,
        provider_session_id: &str,
    ) -> Result<Vec<SigningArtifact>, ProviderError> {
        let status = self.signing_session_status(provider_session_id)?;
        let audit = json!({
            "provider": KEY.as_str(),
            "providerSessionId": provider_session_id,
            "fetchedAt": Utc::now().to_rfc3339(),
            "status": status.raw,
        });
        let content = serde_json::to_vec_pretty(&audit).map_err(|err| {
            ProviderError::MalformedResponse {
                provider: KEY,
                detail: err.to_string(),
            }
        })?;
        Ok(vec![SigningArtifact {
            filename: "audit.json".to_string(),
            content_type: "application/json".to_string(),
            content,
        }])
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Option<WebhookEvent> {
        if let Some(secret) = self.config.webhook_secret.as_deref() {
            if !webhook_secret_matches(request, secret) {
                warn!(provider = KEY.as_str(), "webhook rejected: bad secret");
                return None;
            }
        }
        let body = request.json_body()?;
        parse_webhook_payload(&body)
    }
}

/// Package lifecycle state as reported by the signing-session resource.
fn map_lifecycle_state(state: &str) -> Option<SignatureStatus> {
    match state.trim().to_lowercase().as_str() {
        "ready" => Some(SignatureStatus::Sent),
        "signed" => Some(SignatureStatus::Completed),
        "cancelled" | "canceled" => Some(SignatureStatus::Cancelled),
        "expired" => Some(SignatureStatus::Expired),
        other => normalize_status(other),
    }
}

fn parse_session_status(raw: &Value, provider_session_id: &str) -> SessionStatus {
    let record = raw.as_object();
    let lifecycle_state = record
        .and_then(|object| object.get("lifecycle"))
        .and_then(Value::as_object)
        .and_then(|lifecycle| lifecycle.get("state"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let package_status = map_lifecycle_state(lifecycle_state);

    let mut signer_updates = Vec::new();
    if package_status == Some(SignatureStatus::Completed) {
        // Each Signicat session covers one signer; a completed package
        // means that signer has signed. The external reference carries
        // the board member id in its middle segment.
        let board_member_id = record
            .and_then(|object| object.get("externalReference"))
            .and_then(Value::as_str)
            .and_then(member_from_external_reference);
        signer_updates.push(SignerUpdate {
            board_member_id,
            email: None,
            provider_signer_id: Some(provider_session_id.to_string()),
            status: SignatureStatus::Signed,
            signed_at: None,
            raw: raw.clone(),
        });
    }

    SessionStatus {
        package_status,
        signer_updates,
        raw: raw.clone(),
    }
}

fn find_pades_result_document(session: &Value) -> Option<String> {
    session
        .get("output")
        .and_then(Value::as_object)?
        .get("packages")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_object)
        .find(|package| {
            package
                .get("packageType")
                .and_then(Value::as_str)
                .map(|package_type| package_type == "PADES_CONTAINER")
                .unwrap_or(false)
        })?
        .get("resultDocumentId")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn parse_webhook_payload(body: &Value) -> Option<WebhookEvent> {
    let record = body.as_object()?;
    let provider_session_id = str_field(record, &["signingId", "id", "packageId", "sessionId"])
        .map(ToString::to_string)
        .or_else(|| {
            record
                .get("eventData")
                .and_then(Value::as_object)
                .and_then(|event_data| str_field(event_data, &["id"]))
                .map(ToString::to_string)
        })?;

    let event_type = str_field(record, &["eventName", "eventType", "type"]);
    let package_status = match event_type {
        Some("package.completed") | Some("signing-session.completed") => {
            Some(SignatureStatus::Completed)
        }
        Some("signing-session.opened") => Some(SignatureStatus::Viewed),
        Some("package.failed") => Some(SignatureStatus::Failed),
        _ => str_field(record, &["status"])
            .and_then(normalize_status)
            .or_else(|| str_field(record, &["state"]).and_then(normalize_status))
            .or_else(|| event_type.and_then(normalize_status)),
    };

    let mut candidates: Vec<Value> = Vec::new();
    for key in ["signers", "signatures", "events"] {
        if let Some(array) = record.get(key).and_then(Value::as_array) {
            candidates.extend(array.iter().cloned());
        }
    }
    if let Some(event_data) = record.get("eventData").filter(|value| value.is_object()) {
        candidates.push(event_data.clone());
    }

    let signer_updates: Vec<SignerUpdate> = candidates
        .into_iter()
        .filter_map(|candidate| parse_signer_candidate(&candidate))
        .collect();

    let completed = matches!(
        event_type,
        Some("package.completed") | Some("signing-session.completed")
    ) || package_status == Some(SignatureStatus::Completed);

    Some(WebhookEvent {
        provider_session_id,
        event_type: event_type.map(ToString::to_string),
        signer_updates,
        package_status,
        completed,
        raw: body.clone(),
    })
}

fn parse_signer_candidate(candidate: &Value) -> Option<SignerUpdate> {
    let signer = candidate.as_object()?;
    let status = str_field(signer, &["status"])
        .and_then(normalize_status)
        .or_else(|| str_field(signer, &["state"]).and_then(normalize_status))
        .or_else(|| str_field(signer, &["eventType"]).and_then(normalize_status))
        .or_else(|| str_field(signer, &["type"]).and_then(normalize_status))?;

    let board_member_id = str_field(signer, &["externalId", "boardMemberId"])
        .map(ToString::to_string)
        .or_else(|| {
            str_field(signer, &["externalReference"]).and_then(member_from_external_reference)
        });
    let signed_at = str_field(signer, &["signedAt", "completedAt"])
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Some(SignerUpdate {
        board_member_id,
        email: str_field(signer, &["email", "signerEmail"]).map(ToString::to_string),
        provider_signer_id: str_field(signer, &["id", "signerId"]).map(ToString::to_string),
        status,
        signed_at,
        raw: candidate.clone(),
    })
}

fn member_from_external_reference(reference: &str) -> Option<String> {
    reference
        .split(':')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

fn webhook_secret_matches(request: &WebhookRequest, secret: &str) -> bool {
    let header = request
        .header("x-signicat-signature")
        .or_else(|| request.header("x-webhook-secret"))
        .or_else(|| request.header("authorization"));
    match header {
        Some(value) => value == secret || value == format!("Bearer {secret}"),
        None => false,
    }
}

/// Signicat's status vocabulary, mapped into the shared one.
fn normalize_status(value: &str) -> Option<SignatureStatus> {
    match value.trim().to_lowercase().as_str() {
        "created" | "draft" => Some(SignatureStatus::Created),
        "sent" | "invited" | "invitation_sent" => Some(SignatureStatus::Sent),
        "opened" | "viewed" => Some(SignatureStatus::Viewed),
        "signed" | "completed_by_signer" => Some(SignatureStatus::Signed),
        "declined" | "rejected" => Some(SignatureStatus::Declined),
        "failed" | "error" => Some(SignatureStatus::Failed),
        "expired" | "timeout" => Some(SignatureStatus::Expired),
        "cancelled" | "canceled" => Some(SignatureStatus::Cancelled),
        "completed" | "finalized" => Some(SignatureStatus::Completed),
        _ => None,
    }
}

fn str_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

fn http_result(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response, ProviderError> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, response)) => Err(ProviderError::RequestFailed {
            provider: KEY,
            status,
            detail: error_detail(response),
        }),
        Err(err) => Err(ProviderError::Transport {
            provider: KEY,
            detail: err.to_string(),
        }),
    }
}

fn error_detail(response: ureq::Response) -> String {
    let mut detail = response.into_string().unwrap_or_default();
    let mut limit = ERROR_DETAIL_LIMIT.min(detail.len());
    while !detail.is_char_boundary(limit) {
        limit -= 1;
    }
    detail.truncate(limit);
    detail
}

fn safe_json(response: ureq::Response) -> Value {
    match response.into_string() {
        Ok(text) if text.trim().is_empty() => Value::Null,
        Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Err(_) => Value::Null,
    }
}

fn malformed(detail: &str) -> ProviderError {
    ProviderError::MalformedResponse {
        provider: KEY,
        detail: detail.to_string(),
    }
}
