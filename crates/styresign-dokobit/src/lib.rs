//! Dokobit signing adapter.
//!
//! Dokobit issues one combined package per create call: the document
//! and the whole signer list travel in a single form-encoded request,
//! signer progress comes back as postback notifications, and status /
//! download live behind `{token}` path templates.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::io::Read;
use std::time::Duration;
use tracing::warn;

use styresign_core::{
    CreateSessionInput, CreateSessionResult, ProviderError, ProviderKey, SessionStatus,
    SignatureStatus, SignerLink, SignerUpdate, SigningArtifact, SigningProvider, SigningRecipient,
    WebhookEvent, WebhookRequest,
};

const KEY: ProviderKey = ProviderKey::Dokobit;

/// Maximum bytes of an error body carried into a `ProviderError`.
const ERROR_DETAIL_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `access_token` query parameter (Dokobit default).
    Query,
    /// `Authorization: Bearer` header.
    Header,
}

#[derive(Debug, Clone)]
pub struct DokobitConfig {
    pub base_url: String,
    pub access_token: String,
    pub webhook_secret: Option<String>,
    pub create_path: String,
    pub status_path_template: String,
    pub download_path_template: String,
    pub signer_url_template: Option<String>,
    pub language: String,
    pub postback_mode: String,
    pub auth_mode: AuthMode,
    pub timeout: Duration,
}

impl DokobitConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: "https://beta.dokobit.com".to_string(),
            access_token: access_token.into(),
            webhook_secret: None,
            create_path: "/api/signing-external/create.json".to_string(),
            status_path_template: "/api/signing/{token}/status.json".to_string(),
            download_path_template: "/api/signing/{token}/download".to_string(),
            signer_url_template: None,
            language: "lt".to_string(),
            postback_mode: "json".to_string(),
            auth_mode: AuthMode::Query,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, styresign_core::ConfigError> {
        let access_token = std::env::var("DOKOBIT_ACCESS_TOKEN")
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or(styresign_core::ConfigError::MissingCredential(
                "DOKOBIT_ACCESS_TOKEN",
            ))?;
        let mut config = Self::new(access_token);

        if let Ok(value) = std::env::var("DOKOBIT_BASE_URL") {
            config.base_url = value.trim_end_matches('/').to_string();
        }
        config.webhook_secret = std::env::var("DOKOBIT_WEBHOOK_SECRET")
            .ok()
            .filter(|value| !value.is_empty());
        if let Ok(value) = std::env::var("DOKOBIT_SIGNING_CREATE_PATH") {
            config.create_path = value;
        }
        if let Ok(value) = std::env::var("DOKOBIT_SIGNING_STATUS_PATH_TEMPLATE") {
            config.status_path_template = value;
        }
        if let Ok(value) = std::env::var("DOKOBIT_SIGNING_DOWNLOAD_PATH_TEMPLATE") {
            config.download_path_template = value;
        }
        config.signer_url_template = std::env::var("DOKOBIT_SIGNER_URL_TEMPLATE")
            .ok()
            .filter(|value| !value.is_empty());
        if let Ok(value) = std::env::var("DOKOBIT_LANGUAGE") {
            config.language = value;
        }
        if let Ok(value) = std::env::var("DOKOBIT_POSTBACK_MODE") {
            config.postback_mode = value.to_lowercase();
        }
        if let Ok(value) = std::env::var("DOKOBIT_AUTH_MODE") {
            if value.trim().eq_ignore_ascii_case("header") {
                config.auth_mode = AuthMode::Header;
            }
        }

        Ok(config)
    }
}

pub struct DokobitProvider {
    config: DokobitConfig,
    agent: ureq::Agent,
}

impl DokobitProvider {
    pub fn new(config: DokobitConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(config.timeout)
            .build();
        Self { config, agent }
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn prepare(&self, request: ureq::Request) -> ureq::Request {
        match self.config.auth_mode {
            AuthMode::Query => request.query("access_token", &self.config.access_token),
            AuthMode::Header => request.set(
                "Authorization",
                &format!("Bearer {}", self.config.access_token),
            ),
        }
    }

    fn get_json(&self, path: &str) -> Result<Value, ProviderError> {
        let response = http_result(self.prepare(self.agent.get(&self.url(path))).call())?;
        Ok(safe_json(response))
    }
}

impl SigningProvider for DokobitProvider {
    fn key(&self) -> ProviderKey {
        KEY
    }

    fn create_signing_session(
        &self,
        input: &CreateSessionInput,
    ) -> Result<CreateSessionResult, ProviderError> {
        let pairs = build_create_form(input, &self.config);
        let form: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();

        let response = http_result(
            self.prepare(self.agent.post(&self.url(&self.config.create_path)))
                .send_form(&form),
        )?;
        let raw = safe_json(response);
        parse_create_response(&raw, &input.recipients, self.config.signer_url_template.as_deref())
    }

    fn signing_session_status(
        &self,
        provider_session_id: &str,
    ) -> Result<SessionStatus, ProviderError> {
        let path = apply_template(
            &self.config.status_path_template,
            &[("token", provider_session_id)],
        );
        let raw = self.get_json(&path)?;
        Ok(parse_status_response(&raw))
    }

    fn download_signed_document(
        &self,
        provider_session_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let path = apply_template(
            &self.config.download_path_template,
            &[("token", provider_session_id)],
        );
        let result = self.prepare(self.agent.get(&self.url(&path))).call();
        let response = match result {
            // The container shows up at this path only once Dokobit has
            // produced it; until then the endpoint 404s.
            Err(ureq::Error::Status(404, response)) => {
                return Err(ProviderError::ArtifactNotReady {
                    provider: KEY,
                    detail: error_detail(response),
                });
            }
            other => http_result(other)?,
        };

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

fn build_create_form(input: &CreateSessionInput, config: &DokobitConfig) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("type".to_string(), "pdf".to_string()),
        (
            "name".to_string(),
            format!(
                "Protokollsignering {} {}",
                input.company_name, input.protocol_date_label
            ),
        ),
        (
            "subject".to_string(),
            format!("Protokoll til signering - {}", input.company_name),
        ),
        ("files[0][name]".to_string(), input.file_name.clone()),
        (
            "files[0][content]".to_string(),
            BASE64.encode(&input.document),
        ),
        ("files[0][digest]".to_string(), input.document_sha256.clone()),
    ];

    if let Some(postback_url) = input.postback_url.as_deref() {
        pairs.push(("postback_url".to_string(), postback_url.to_string()));
        pairs.push(("postback".to_string(), config.postback_mode.clone()));
    }

    for (index, recipient) in input.recipients.iter().enumerate() {
        let (name, surname) = split_name(&recipient.name);
        pairs.push((format!("signers[{index}][name]"), name));
        pairs.push((format!("signers[{index}][surname]"), surname));
        pairs.push((format!("signers[{index}][email]"), recipient.email.clone()));
        pairs.push((
            format!("signers[{index}][external_id]"),
            recipient.board_member_id.clone(),
        ));
        pairs.push((
            format!("signers[{index}][notifications_language]"),
            config.language.clone(),
        ));
    }

    pairs
}

fn parse_create_response(
    raw: &Value,
    recipients: &[SigningRecipient],
    signer_url_template: Option<&str>,
) -> Result<CreateSessionResult, ProviderError> {
    let root = raw.as_object().ok_or_else(|| malformed("create response is not an object"))?;
    let provider_session_id = str_field(root, &["token", "id"])
        .ok_or_else(|| malformed("create response did not include token/id"))?
        .to_string();

    let signers = root
        .get("signers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let signer_links = recipients
        .iter()
        .enumerate()
        .map(|(index, recipient)| {
            let signer = signers.get(index).and_then(Value::as_object);
            let signer_token = signer.and_then(|s| str_field(s, &["token", "signer_token"]));
            let redirect = signer.and_then(|s| str_field(s, &["redirect_uri", "redirectUrl"]));
            let signature_url = redirect.map(ToString::to_string).or_else(|| {
                match (signer_url_template, signer_token) {
                    (Some(template), Some(token)) => Some(apply_template(
                        template,
                        &[
                            ("signerToken", token),
                            ("token", &provider_session_id),
                        ],
                    )),
                    _ => None,
                }
            });
            SignerLink {
                board_member_id: recipient.board_member_id.clone(),
                email: recipient.email.clone(),
                signature_url,
            }
        })
        .collect();

    Ok(CreateSessionResult {
        provider_session_id,
        signature_level: Some("aes".to_string()),
        signer_links,
        raw: raw.clone(),
    })
}

fn parse_status_response(raw: &Value) -> SessionStatus {
    let root = raw.as_object();
    let signers = root
        .and_then(|object| object.get("signers"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let signer_updates: Vec<SignerUpdate> = signers
        .iter()
        .filter_map(|candidate| {
            let signer = candidate.as_object()?;
            Some(SignerUpdate {
                board_member_id: str_field(signer, &["external_id"]).map(ToString::to_string),
                email: str_field(signer, &["email"]).map(ToString::to_string),
                provider_signer_id: str_field(signer, &["token", "signer_token"])
                    .map(ToString::to_string),
                status: str_field(signer, &["status"])
                    .and_then(normalize_status)
                    .or_else(|| str_field(signer, &["action"]).and_then(normalize_status))
                    .unwrap_or(SignatureStatus::Created),
                signed_at: None,
                raw: candidate.clone(),
            })
        })
        .collect();

    let package_status = root
        .and_then(|object| str_field(object, &["status"]))
        .and_then(normalize_status)
        .or_else(|| {
            root.and_then(|object| str_field(object, &["action"]))
                .and_then(normalize_status)
        })
        .or_else(|| {
            // Dokobit sometimes reports only per-signer state; infer
            // package completion from a fully signed signer list.
            if !signer_updates.is_empty()
                && signer_updates
                    .iter()
                    .all(|update| update.status == SignatureStatus::Signed)
            {
                Some(SignatureStatus::Completed)
            } else {
                None
            }
        });

    SessionStatus {
        package_status,
        signer_updates,
        raw: raw.clone(),
    }
}

fn parse_webhook_payload(body: &Value) -> Option<WebhookEvent> {
    let root = body.as_object()?;
    let provider_session_id =
        str_field(root, &["token", "signing_token", "id"])?.to_string();

    let signer = root
        .get("signer")
        .and_then(Value::as_object)
        .or_else(|| root.get("signer_info").and_then(Value::as_object));
    let signer_status = str_field(root, &["action"])
        .and_then(normalize_status)
        .or_else(|| str_field(root, &["status"]).and_then(normalize_status))
        .or_else(|| {
            signer
                .and_then(|object| str_field(object, &["status"]))
                .and_then(normalize_status)
        });

    let signer_updates = match (signer, signer_status) {
        (Some(signer), Some(status)) => vec![SignerUpdate {
            board_member_id: str_field(signer, &["external_id"]).map(ToString::to_string),
            email: str_field(signer, &["email"]).map(ToString::to_string),
            provider_signer_id: str_field(signer, &["token", "signer_token"])
                .map(ToString::to_string),
            // A per-signer "completed" from Dokobit means that signer
            // is done, not the package.
            status: if status == SignatureStatus::Completed {
                SignatureStatus::Signed
            } else {
                status
            },
            signed_at: None,
            raw: Value::Object(signer.clone()),
        }],
        _ => Vec::new(),
    };

    let package_status = str_field(root, &["status"])
        .and_then(normalize_status)
        .or_else(|| str_field(root, &["action"]).and_then(normalize_status));
    let completed = matches!(
        package_status,
        Some(SignatureStatus::Completed) | Some(SignatureStatus::Signed)
    );

    Some(WebhookEvent {
        provider_session_id,
        event_type: str_field(root, &["action"]).map(ToString::to_string),
        signer_updates,
        package_status: if completed {
            Some(SignatureStatus::Completed)
        } else {
            package_status
        },
        completed,
        raw: body.clone(),
    })
}

fn webhook_secret_matches(request: &WebhookRequest, secret: &str) -> bool {
    let header = request
        .header("x-dokobit-signature")
        .or_else(|| request.header("x-webhook-secret"))
        .or_else(|| request.header("authorization"));
    match header {
        Some(value) => value == secret || value == format!("Bearer {secret}"),
        None => false,
    }
}

/// Dokobit's status vocabulary, mapped into the shared one.
fn normalize_status(value: &str) -> Option<SignatureStatus> {
    match value.trim().to_lowercase().as_str() {
        "created" | "pending" | "draft" => Some(SignatureStatus::Created),
        "sent" | "invited" | "invitation_sent" => Some(SignatureStatus::Sent),
        "viewed" | "opened" | "seen" => Some(SignatureStatus::Viewed),
        "signed" | "completed_by_signer" | "signed_by_signer" => Some(SignatureStatus::Signed),
        "declined" | "rejected" => Some(SignatureStatus::Declined),
        "failed" | "error" => Some(SignatureStatus::Failed),
        "expired" | "timeout" => Some(SignatureStatus::Expired),
        "cancelled" | "canceled" => Some(SignatureStatus::Cancelled),
        "completed" | "signed_all" | "done" | "archived" => Some(SignatureStatus::Completed),
        _ => None,
    }
}

fn split_name(full_name: &str) -> (String, String) {
    let parts: Vec<&str> = full_name.split_whitespace().collect();
    match parts.as_slice() {
        [] => ("Signer".to_string(), "User".to_string()),
        [only] => (only.to_string(), ".".to_string()),
        [given @ .., surname] => (given.join(" "), surname.to_string()),
    }
}

fn apply_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in values {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
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

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients() -> Vec<SigningRecipient> {
        vec![
            SigningRecipient {
                board_member_id: "member-alice".to_string(),
                name: "Alice Berg Hansen".to_string(),
                email: "alice@example.no".to_string(),
                role: None,
            },
            SigningRecipient {
                board_member_id: "member-bob".to_string(),
                name: "Bob".to_string(),
                email: "bob@example.no".to_string(),
                role: None,
            },
        ]
    }

    #[test]
    fn status_synonyms_normalize_into_shared_vocabulary() {
        assert_eq!(normalize_status("pending"), Some(SignatureStatus::Created));
        assert_eq!(normalize_status("seen"), Some(SignatureStatus::Viewed));
        assert_eq!(
            normalize_status("signed_by_signer"),
            Some(SignatureStatus::Signed)
        );
        assert_eq!(
            normalize_status("signed_all"),
            Some(SignatureStatus::Completed)
        );
        assert_eq!(normalize_status("archived"), Some(SignatureStatus::Completed));
        assert_eq!(normalize_status("unheard_of"), None);
    }

    #[test]
    fn split_name_handles_single_and_multi_part_names() {
        assert_eq!(
            split_name("Alice Berg Hansen"),
            ("Alice Berg".to_string(), "Hansen".to_string())
        );
        assert_eq!(split_name("Bob"), ("Bob".to_string(), ".".to_string()));
        assert_eq!(split_name("  "), ("Signer".to_string(), "User".to_string()));
    }

    #[test]
    fn apply_template_substitutes_token_placeholders() {
        assert_eq!(
            apply_template("/api/signing/{token}/status.json", &[("token", "abc-1")]),
            "/api/signing/abc-1/status.json"
        );
        assert_eq!(
            apply_template(
                "https://x.test/{token}/{signerToken}",
                &[("token", "p"), ("signerToken", "s")]
            ),
            "https://x.test/p/s"
        );
    }

    #[test]
    fn create_response_yields_session_id_and_per_signer_links() {
        let raw = json!({
            "token": "pkg-1",
            "signers": [
                { "token": "sig-a", "redirect_uri": "https://dokobit.test/sign/a" },
                { "signer_token": "sig-b" }
            ]
        });

        let result = parse_create_response(
            &raw,
            &recipients(),
            Some("https://dokobit.test/signing/{signerToken}"),
        )
        .expect("parse");

        assert_eq!(result.provider_session_id, "pkg-1");
        assert_eq!(result.signature_level.as_deref(), Some("aes"));
        assert_eq!(result.signer_links.len(), 2);
        assert_eq!(
            result.signer_links[0].signature_url.as_deref(),
            Some("https://dokobit.test/sign/a")
        );
        assert_eq!(
            result.signer_links[1].signature_url.as_deref(),
            Some("https://dokobit.test/signing/sig-b")
        );
    }

    #[test]
    fn create_response_without_token_is_malformed() {
        let raw = json!({ "status": "ok" });
        let err = parse_create_response(&raw, &recipients(), None).expect_err("must fail");
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[test]
    fn status_response_maps_signers_and_infers_package_completion() {
        let raw = json!({
            "signers": [
                { "external_id": "member-alice", "email": "alice@example.no", "token": "sig-a", "status": "signed" },
                { "external_id": "member-bob", "signer_token": "sig-b", "status": "signed" }
            ]
        });

        let status = parse_status_response(&raw);
        assert_eq!(status.package_status, Some(SignatureStatus::Completed));
        assert_eq!(status.signer_updates.len(), 2);
        assert_eq!(status.signer_updates[0].status, SignatureStatus::Signed);
        assert_eq!(
            status.signer_updates[0].board_member_id.as_deref(),
            Some("member-alice")
        );
        assert_eq!(
            status.signer_updates[1].provider_signer_id.as_deref(),
            Some("sig-b")
        );
    }

    #[test]
    fn status_response_with_partial_signatures_has_no_package_status() {
        let raw = json!({
            "signers": [
                { "external_id": "member-alice", "status": "signed" },
                { "external_id": "member-bob", "status": "viewed" }
            ]
        });

        let status = parse_status_response(&raw);
        assert_eq!(status.package_status, None);
        assert_eq!(status.signer_updates[1].status, SignatureStatus::Viewed);
    }

    #[test]
    fn webhook_maps_per_signer_completed_to_signed() {
        let body = json!({
            "token": "pkg-1",
            "action": "completed",
            "signer": { "external_id": "member-alice", "token": "sig-a", "status": "completed" }
        });

        let event = parse_webhook_payload(&body).expect("event");
        assert_eq!(event.provider_session_id, "pkg-1");
        assert_eq!(event.signer_updates.len(), 1);
        assert_eq!(event.signer_updates[0].status, SignatureStatus::Signed);
        assert!(event.completed);
        assert_eq!(event.package_status, Some(SignatureStatus::Completed));
    }

    #[test]
    fn webhook_without_session_token_is_unmappable() {
        assert!(parse_webhook_payload(&json!({ "action": "signed" })).is_none());
        assert!(parse_webhook_payload(&json!("not an object")).is_none());
    }

    #[test]
    fn webhook_secret_accepts_plain_and_bearer_forms() {
        let plain = WebhookRequest::new(
            vec![("x-dokobit-signature".to_string(), "s3cret".to_string())],
            Vec::new(),
        );
        let bearer = WebhookRequest::new(
            vec![("Authorization".to_string(), "Bearer s3cret".to_string())],
            Vec::new(),
        );
        let wrong = WebhookRequest::new(
            vec![("x-webhook-secret".to_string(), "other".to_string())],
            Vec::new(),
        );

        assert!(webhook_secret_matches(&plain, "s3cret"));
        assert!(webhook_secret_matches(&bearer, "s3cret"));
        assert!(!webhook_secret_matches(&wrong, "s3cret"));
        assert!(!webhook_secret_matches(&WebhookRequest::default(), "s3cret"));
    }

    #[test]
    fn rejected_webhook_parses_to_none_via_provider() {
        let mut config = DokobitConfig::new("token");
        config.webhook_secret = Some("s3cret".to_string());
        let provider = DokobitProvider::new(config);

        let request = WebhookRequest::new(
            vec![("x-dokobit-signature".to_string(), "wrong".to_string())],
            serde_json::to_vec(&json!({ "token": "pkg-1", "action": "signed" })).expect("body"),
        );
        assert!(provider.parse_webhook(&request).is_none());
    }

    #[test]
    fn create_form_carries_document_digest_and_signer_slots() {
        let input = CreateSessionInput {
            meeting_id: "m-1".to_string(),
            company_id: "company-1".to_string(),
            company_name: "Fjellheim AS".to_string(),
            protocol_date_label: "14.03.2026".to_string(),
            file_name: "protokoll.pdf".to_string(),
            document: b"%PDF-1.7".to_vec(),
            document_sha256: "abc123".to_string(),
            recipients: recipients(),
            redirect_url: None,
            postback_url: Some("https://app.test/api/signing/dokobit/webhook".to_string()),
        };
        let config = DokobitConfig::new("token");

        let pairs = build_create_form(&input, &config);
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("type"), Some("pdf"));
        assert_eq!(get("files[0][digest]"), Some("abc123"));
        assert_eq!(
            get("postback_url"),
            Some("https://app.test/api/signing/dokobit/webhook")
        );
        assert_eq!(get("signers[0][external_id]"), Some("member-alice"));
        assert_eq!(get("signers[0][surname]"), Some("Hansen"));
        assert_eq!(get("signers[1][name]"), Some("Bob"));
        assert_eq!(get("signers[1][surname]"), Some("."));
    }
}
