//! Reconciliation: the single routine that turns provider status
//! observations into durable signature and meeting state.
//!
//! Webhook deliveries and manual polls both land here, possibly
//! concurrently for the same session. Safety is structural: per-field
//! merges are monotonic at the SQL level, and finalization re-checks
//! persisted terminal state immediately before acting, so the second
//! of two racing writers observes completion and no-ops.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use styresign_core::{
    normalize_email, ProviderError, SignatureStatus, SignerUpdate, SigningProvider,
};
use styresign_storage::{ArtifactVault, BoardStore, MeetingStatus, SignerRecord};

use crate::EngineError;

/// One status observation for a session, from either entry point.
pub struct ReconcileInput<'a> {
    pub provider_session_id: &'a str,
    pub signer_updates: &'a [SignerUpdate],
    pub package_status: Option<SignatureStatus>,
    /// The caller's completion hint: a webhook completion event, or a
    /// poll whose package status reads completed.
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The session id matched no local meeting. Not an error; callers
    /// still acknowledge receipt.
    Ignored,
    Applied {
        meeting_id: String,
        finalized: bool,
    },
}

pub fn reconcile(
    store: &BoardStore,
    vault: &ArtifactVault,
    provider: &dyn SigningProvider,
    input: &ReconcileInput<'_>,
) -> Result<ReconcileOutcome, EngineError> {
    let Some(meeting) = store.meeting_by_provider_session(input.provider_session_id)? else {
        debug!(
            provider = %provider.key(),
            provider_session_id = input.provider_session_id,
            "reconcile: unknown session, ignoring"
        );
        return Ok(ReconcileOutcome::Ignored);
    };

    let members = store.board_members(&meeting.company_id)?;
    let records = store.signatures(&meeting.meeting_id)?;

    let known_member_ids: Vec<&str> = members
        .iter()
        .map(|member| member.member_id.as_str())
        .chain(records.iter().map(|record| record.board_member_id.as_str()))
        .collect();
    let mut members_by_email: HashMap<String, &str> = HashMap::new();
    for member in &members {
        if let Some(email) = member.email.as_deref() {
            members_by_email.insert(normalize_email(email), member.member_id.as_str());
        }
    }

    for update in input.signer_updates {
        let member_id = resolve_member_id(update, &known_member_ids, &members_by_email);
        let Some(member_id) = member_id else {
            warn!(
                provider = %provider.key(),
                meeting_id = %meeting.meeting_id,
                status = %update.status,
                "reconcile: signer update matched no board member, skipping"
            );
            continue;
        };

        let record = store.ensure_and_fetch_signature(&meeting.meeting_id, member_id)?;
        let provider_signer_id = merge_provider_signer_id(&meeting.meeting_id, &record, update);
        let raw_meta = match &update.raw {
            Value::Null => None,
            raw => serde_json::to_string(raw).ok(),
        };
        store.update_signature_provider_state(
            &record.signature_id,
            provider.key(),
            provider_signer_id.as_deref(),
            update.status,
            update.signed_at,
            raw_meta.as_deref(),
        )?;

        if update.status == SignatureStatus::Signed {
            store.mark_signed_if_unsigned(
                &record.signature_id,
                update.signed_at.unwrap_or_else(Utc::now),
            )?;
        }
    }

    if input.package_status.is_some() {
        // Never moves an already-signed meeting; the terminal write is
        // the reconciler's alone and goes through mark_meeting_signed.
        let status_hint = if meeting.status == MeetingStatus::Signed {
            None
        } else {
            Some(MeetingStatus::PendingSignatures)
        };
        store.record_package_observation(&meeting.meeting_id, provider.key(), status_hint)?;
    }

    let records = store.signatures(&meeting.meeting_id)?;
    let all_signed = all_active_members_signed(&members, &records);

    if !(input.completed && all_signed) {
        return Ok(ReconcileOutcome::Applied {
            meeting_id: meeting.meeting_id,
            finalized: false,
        });
    }

    let current = store
        .meeting(&meeting.meeting_id)?
        .ok_or_else(|| EngineError::MeetingNotFound(meeting.meeting_id.clone()))?;
    if current.is_finalized() {
        debug!(meeting_id = %meeting.meeting_id, "reconcile: already finalized, skipping");
        return Ok(ReconcileOutcome::Applied {
            meeting_id: meeting.meeting_id,
            finalized: false,
        });
    }

    let signed_bytes = match provider.download_signed_document(input.provider_session_id) {
        Ok(bytes) => bytes,
        Err(ProviderError::ArtifactNotReady { detail, .. }) => {
            info!(
                meeting_id = %meeting.meeting_id,
                detail = %detail,
                "reconcile: signed artifact not ready, deferring finalization"
            );
            return Ok(ReconcileOutcome::Applied {
                meeting_id: meeting.meeting_id,
                finalized: false,
            });
        }
        Err(err) => return Err(err.into()),
    };

    let signed_path =
        vault.store_signed_protocol(&meeting.company_id, &meeting.meeting_id, &signed_bytes)?;
    let mut evidence_paths = Vec::new();
    for artifact in provider.download_evidence(input.provider_session_id)? {
        evidence_paths.push(vault.store_evidence(
            &meeting.company_id,
            &meeting.meeting_id,
            &artifact.filename,
            &artifact.content,
        )?);
    }

    store.mark_meeting_signed(&meeting.meeting_id, &signed_path, Utc::now())?;

    if let Some(first_evidence) = evidence_paths.first() {
        for record in store.signatures(&meeting.meeting_id)? {
            if record.evidence_path.is_none() {
                store.set_evidence_path_if_absent(&record.signature_id, first_evidence)?;
            }
        }
    }

    info!(
        meeting_id = %meeting.meeting_id,
        provider = %provider.key(),
        signed_path = %signed_path,
        "reconcile: signing session finalized"
    );
    Ok(ReconcileOutcome::Applied {
        meeting_id: meeting.meeting_id,
        finalized: true,
    })
}

/// Stable id first, normalized email as the fallback; providers vary
/// in which identifier they echo back.
fn resolve_member_id<'a>(
    update: &'a SignerUpdate,
    known_member_ids: &[&'a str],
    members_by_email: &HashMap<String, &'a str>,
) -> Option<&'a str> {
    if let Some(id) = update.board_member_id.as_deref() {
        if known_member_ids.contains(&id) {
            return Some(id);
        }
    }
    update
        .email
        .as_deref()
        .and_then(|email| members_by_email.get(&normalize_email(email)).copied())
}

/// Fill-if-absent. A provider reporting a different signer id for an
/// already-correlated record is suspicious; keep the original and log.
fn merge_provider_signer_id(
    meeting_id: &str,
    record: &SignerRecord,
    update: &SignerUpdate,
) -> Option<String> {
    match (
        record.provider_signer_id.as_deref(),
        update.provider_signer_id.as_deref(),
    ) {
        (Some(existing), Some(incoming)) if existing != incoming => {
            warn!(
                meeting_id,
                board_member_id = %record.board_member_id,
                existing,
                incoming,
                "reconcile: conflicting provider signer id, keeping existing"
            );
            Some(existing.to_string())
        }
        (Some(existing), _) => Some(existing.to_string()),
        (None, incoming) => incoming.map(ToString::to_string),
    }
}

/// All-signed over the active board, not over existing records: a
/// member added after session creation blocks completion until they
/// have a signed record. An empty board never reads complete.
pub(crate) fn all_active_members_signed(
    members: &[styresign_storage::BoardMember],
    records: &[SignerRecord],
) -> bool {
    let active: Vec<&styresign_storage::BoardMember> =
        members.iter().filter(|member| member.active).collect();
    if active.is_empty() {
        return false;
    }
    active.iter().all(|member| {
        records
            .iter()
            .any(|record| record.board_member_id == member.member_id && record.signed_at.is_some())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{board_fixture, signed_update, update_with, MockProvider, VaultFixture};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use styresign_core::ProviderKey;

    fn input<'a>(updates: &'a [SignerUpdate], completed: bool) -> ReconcileInput<'a> {
        ReconcileInput {
            provider_session_id: "sess-1",
            signer_updates: updates,
            package_status: completed.then_some(SignatureStatus::Completed),
            completed,
        }
    }

    #[test]
    fn partial_signatures_keep_meeting_pending() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let updates = vec![signed_update("member-alice")];
        let outcome = reconcile(&store, &vault.vault, &provider, &input(&updates, false))
            .expect("reconcile");
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: false
            }
        );

        let meeting = store.meeting("m-1").expect("lookup").expect("exists");
        assert_eq!(meeting.status, MeetingStatus::PendingSignatures);
        assert!(meeting.signed_protocol_path.is_none());
        assert_eq!(provider.downloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn final_signature_with_completion_finalizes_once() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let first = vec![signed_update("member-alice")];
        reconcile(&store, &vault.vault, &provider, &input(&first, false)).expect("first");

        let second = vec![signed_update("member-bob")];
        let outcome = reconcile(&store, &vault.vault, &provider, &input(&second, true))
            .expect("second");
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: true
            }
        );

        let meeting = store.meeting("m-1").expect("lookup").expect("exists");
        assert_eq!(meeting.status, MeetingStatus::Signed);
        let signed_path = meeting.signed_protocol_path.as_deref().expect("artifact path");
        assert_eq!(signed_path, "company-1/m-1/protokoll-signed.pdf");
        assert!(vault.vault.exists(signed_path));
        assert!(meeting.signing_completed_at.is_some());
        assert_eq!(provider.downloads.load(Ordering::SeqCst), 1);

        // Every signer record got the evidence backfill.
        for record in store.signatures("m-1").expect("records") {
            assert!(record.evidence_path.is_some());
        }
    }

    #[test]
    fn unknown_session_is_ignored_without_writes() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let updates = vec![signed_update("member-alice")];
        let outcome = reconcile(
            &store,
            &vault.vault,
            &provider,
            &ReconcileInput {
                provider_session_id: "sess-unknown",
                signer_updates: &updates,
                package_status: Some(SignatureStatus::Completed),
                completed: true,
            },
        )
        .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Ignored);

        let meeting = store.meeting("m-1").expect("lookup").expect("exists");
        assert_eq!(meeting.status, MeetingStatus::PendingSignatures);
        for record in store.signatures("m-1").expect("records") {
            assert!(record.signed_at.is_none());
        }
        assert_eq!(provider.downloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_completion_reports_finalize_exactly_once() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let updates = vec![signed_update("member-alice"), signed_update("member-bob")];
        let first = reconcile(&store, &vault.vault, &provider, &input(&updates, true))
            .expect("first");
        let second = reconcile(&store, &vault.vault, &provider, &input(&updates, true))
            .expect("second");

        assert_eq!(
            first,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: true
            }
        );
        assert_eq!(
            second,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: false
            }
        );
        assert_eq!(provider.downloads.load(Ordering::SeqCst), 1);

        let meeting = store.meeting("m-1").expect("lookup").expect("exists");
        let completed_at = meeting.signing_completed_at.expect("completed at");
        // A third pass moves neither the timestamp nor the artifact.
        reconcile(&store, &vault.vault, &provider, &input(&updates, true)).expect("third");
        let meeting = store.meeting("m-1").expect("lookup").expect("exists");
        assert_eq!(meeting.signing_completed_at, Some(completed_at));
    }

    #[test]
    fn replaying_a_signed_update_is_idempotent_on_the_timestamp() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).single().expect("ts");
        let updates = vec![update_with(
            Some("member-alice"),
            None,
            SignatureStatus::Signed,
            Some(ts),
        )];
        reconcile(&store, &vault.vault, &provider, &input(&updates, false)).expect("first");

        let later = ts + chrono::Duration::hours(3);
        let replay = vec![update_with(
            Some("member-alice"),
            None,
            SignatureStatus::Signed,
            Some(later),
        )];
        reconcile(&store, &vault.vault, &provider, &input(&replay, false)).expect("replay");

        let record = store
            .signature_by_member("m-1", "member-alice")
            .expect("lookup")
            .expect("record");
        assert_eq!(record.signed_at, Some(ts));
    }

    #[test]
    fn signer_update_resolves_by_normalized_email_fallback() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let updates = vec![update_with(
            None,
            Some("  Alice@Example.NO "),
            SignatureStatus::Signed,
            None,
        )];
        reconcile(&store, &vault.vault, &provider, &input(&updates, false)).expect("reconcile");

        let record = store
            .signature_by_member("m-1", "member-alice")
            .expect("lookup")
            .expect("record");
        assert!(record.signed_at.is_some());
    }

    #[test]
    fn unresolvable_update_is_skipped_and_the_batch_continues() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let updates = vec![
            update_with(None, Some("stranger@example.no"), SignatureStatus::Signed, None),
            signed_update("member-bob"),
        ];
        reconcile(&store, &vault.vault, &provider, &input(&updates, false)).expect("reconcile");

        let bob = store
            .signature_by_member("m-1", "member-bob")
            .expect("lookup")
            .expect("record");
        assert!(bob.signed_at.is_some());
        assert!(store
            .signature_by_member("m-1", "member-alice")
            .expect("lookup")
            .expect("record")
            .signed_at
            .is_none());
    }

    #[test]
    fn member_without_record_blocks_completion() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        // A member joined after the session was created; no updates
        // ever name them.
        store
            .insert_board_member(&styresign_storage::BoardMember {
                member_id: "member-carol".to_string(),
                company_id: "company-1".to_string(),
                name: "Carol Berg".to_string(),
                email: Some("carol@example.no".to_string()),
                role: "styremedlem".to_string(),
                active: true,
            })
            .expect("insert member");

        let updates = vec![signed_update("member-alice"), signed_update("member-bob")];
        let outcome = reconcile(&store, &vault.vault, &provider, &input(&updates, true))
            .expect("reconcile");
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: false
            }
        );
        assert_eq!(provider.downloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn conflicting_provider_signer_id_keeps_the_existing_value() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let mut first = update_with(Some("member-alice"), None, SignatureStatus::Sent, None);
        first.provider_signer_id = Some("signer-1".to_string());
        reconcile(&store, &vault.vault, &provider, &input(&[first], false)).expect("first");

        let mut second = update_with(Some("member-alice"), None, SignatureStatus::Viewed, None);
        second.provider_signer_id = Some("signer-other".to_string());
        reconcile(&store, &vault.vault, &provider, &input(&[second], false)).expect("second");

        let record = store
            .signature_by_member("m-1", "member-alice")
            .expect("lookup")
            .expect("record");
        assert_eq!(record.provider_signer_id.as_deref(), Some("signer-1"));
        assert_eq!(record.provider_status, Some(SignatureStatus::Viewed));
    }

    #[test]
    fn artifact_not_ready_defers_finalization() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();
        provider.set_artifact(None);

        let updates = vec![signed_update("member-alice"), signed_update("member-bob")];
        let outcome = reconcile(&store, &vault.vault, &provider, &input(&updates, true))
            .expect("reconcile");
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: false
            }
        );
        let meeting = store.meeting("m-1").expect("lookup").expect("exists");
        assert_eq!(meeting.status, MeetingStatus::PendingSignatures);
        assert!(meeting.signed_protocol_path.is_none());

        // The artifact shows up later; the next observation finalizes.
        provider.set_artifact(Some(b"%PDF-signed".to_vec()));
        let outcome = reconcile(&store, &vault.vault, &provider, &input(&updates, true))
            .expect("retry");
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                meeting_id: "m-1".to_string(),
                finalized: true
            }
        );
    }

    #[test]
    fn raw_payload_is_carried_into_the_signer_record() {
        let store = board_fixture();
        let vault = VaultFixture::new();
        let provider = MockProvider::new();

        let mut update = signed_update("member-alice");
        update.raw = json!({ "status": "signed", "vendor": "test" });
        reconcile(&store, &vault.vault, &provider, &input(&[update], false)).expect("reconcile");

        let record = store
            .signature_by_member("m-1", "member-alice")
            .expect("lookup")
            .expect("record");
        let meta = record.raw_provider_meta.expect("raw meta");
        assert!(meta.contains("\"vendor\":\"test\""));
        assert_eq!(record.provider, Some(ProviderKey::Dokobit));
    }
}
