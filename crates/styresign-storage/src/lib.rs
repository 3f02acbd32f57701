use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub use styresign_core::{MeetingStatus, ProviderKey, SignatureStatus, SigningMethod};

mod vault;

pub use vault::ArtifactVault;

pub const BOARD_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub meeting_id: String,
    pub company_id: String,
    pub company_name: String,
    pub title: Option<String>,
    pub protocol_date_label: String,
    pub status: MeetingStatus,
    pub signing_provider: Option<ProviderKey>,
    pub signing_provider_session_id: Option<String>,
    pub signing_method: Option<SigningMethod>,
    pub signature_level: Option<String>,
    pub protocol_path: Option<String>,
    pub signed_protocol_path: Option<String>,
    pub signing_completed_at: Option<DateTime<Utc>>,
}

impl Meeting {
    /// A meeting counts as finalized only when the terminal status and
    /// the stored signed-artifact reference are both present.
    pub fn is_finalized(&self) -> bool {
        self.status == MeetingStatus::Signed && self.signed_protocol_path.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardMember {
    pub member_id: String,
    pub company_id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: String,
    pub active: bool,
}

/// One board member's slot within a meeting's signing attempt. The
/// non-null `signed_at` is the only fact that counts toward "fully
/// signed"; `provider_status` is advisory display state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRecord {
    pub signature_id: String,
    pub meeting_id: String,
    pub board_member_id: String,
    pub provider: Option<ProviderKey>,
    pub provider_signer_id: Option<String>,
    pub provider_status: Option<SignatureStatus>,
    pub signed_at_provider: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub typed_name: Option<String>,
    pub raw_provider_meta: Option<String>,
    pub evidence_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningToken {
    pub token: String,
    pub meeting_id: String,
    pub board_member_id: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

pub struct BoardStore {
    conn: Connection,
}

impl BoardStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > BOARD_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: BOARD_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_board_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn insert_meeting(&self, meeting: &Meeting) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO meetings (
                meeting_id,
                company_id,
                company_name,
                title,
                protocol_date_label,
                status,
                signing_provider,
                signing_provider_session_id,
                signing_method,
                signature_level,
                protocol_path,
                signed_protocol_path,
                signing_completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
            params![
                meeting.meeting_id,
                meeting.company_id,
                meeting.company_name,
                meeting.title,
                meeting.protocol_date_label,
                meeting.status.as_str(),
                meeting.signing_provider.map(|key| key.as_str()),
                meeting.signing_provider_session_id,
                meeting.signing_method.map(|method| method.as_str()),
                meeting.signature_level,
                meeting.protocol_path,
                meeting.signed_protocol_path,
                meeting.signing_completed_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn meeting(&self, meeting_id: &str) -> Result<Option<Meeting>, StorageError> {
        let row = self
            .conn
            .query_row(
                &format!("{MEETING_SELECT} WHERE meeting_id = ?1"),
                [meeting_id],
                meeting_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn meeting_by_provider_session(
        &self,
        provider_session_id: &str,
    ) -> Result<Option<Meeting>, StorageError> {
        let row = self
            .conn
            .query_row(
                &format!("{MEETING_SELECT} WHERE signing_provider_session_id = ?1"),
                [provider_session_id],
                meeting_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_meeting_status(
        &self,
        meeting_id: &str,
        status: MeetingStatus,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE meetings SET status = ?1 WHERE meeting_id = ?2",
            params![status.as_str(), meeting_id],
        )?;
        Ok(())
    }

    /// Persists the identifiers of a freshly created provider session
    /// and moves the meeting to pending signatures in one write.
    pub fn record_provider_session(
        &self,
        meeting_id: &str,
        provider: ProviderKey,
        provider_session_id: &str,
        signature_level: Option<&str>,
        protocol_path: &str,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE meetings SET
                signing_provider = ?1,
                signing_provider_session_id = ?2,
                signing_method = ?3,
                signature_level = ?4,
                protocol_path = ?5,
                status = ?6
            WHERE meeting_id = ?7
            ",
            params![
                provider.as_str(),
                provider_session_id,
                SigningMethod::ProviderBankid.as_str(),
                signature_level,
                protocol_path,
                MeetingStatus::PendingSignatures.as_str(),
                meeting_id,
            ],
        )?;
        Ok(())
    }

    /// Bookkeeping for a legacy email-link send: no provider session,
    /// the meeting just holds the unsigned protocol and waits for the
    /// per-member token links.
    pub fn record_email_link_send(
        &self,
        meeting_id: &str,
        protocol_path: &str,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE meetings SET
                signing_method = ?1,
                protocol_path = ?2,
                status = ?3
            WHERE meeting_id = ?4
            ",
            params![
                SigningMethod::EmailLink.as_str(),
                protocol_path,
                MeetingStatus::PendingSignatures.as_str(),
                meeting_id,
            ],
        )?;
        Ok(())
    }

    /// Package-level bookkeeping from a status observation. Method and
    /// signature level backfill only; `status` is applied when given
    /// (callers never pass a downgrade away from signed).
    pub fn record_package_observation(
        &self,
        meeting_id: &str,
        provider: ProviderKey,
        status: Option<MeetingStatus>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE meetings SET
                signing_provider = ?1,
                signing_method = COALESCE(signing_method, ?2),
                signature_level = COALESCE(signature_level, 'aes'),
                status = COALESCE(?3, status)
            WHERE meeting_id = ?4
            ",
            params![
                provider.as_str(),
                SigningMethod::ProviderBankid.as_str(),
                status.map(|value| value.as_str()),
                meeting_id,
            ],
        )?;
        Ok(())
    }

    /// Terminal transition. The artifact reference and completion
    /// timestamp coalesce so a concurrent second writer cannot move
    /// either once set.
    pub fn mark_meeting_signed(
        &self,
        meeting_id: &str,
        signed_protocol_path: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE meetings SET
                status = ?1,
                signed_protocol_path = COALESCE(signed_protocol_path, ?2),
                signing_completed_at = COALESCE(signing_completed_at, ?3)
            WHERE meeting_id = ?4
            ",
            params![
                MeetingStatus::Signed.as_str(),
                signed_protocol_path,
                completed_at.to_rfc3339(),
                meeting_id,
            ],
        )?;
        Ok(())
    }

    pub fn insert_board_member(&self, member: &BoardMember) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO board_members (member_id, company_id, name, email, role, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                member.member_id,
                member.company_id,
                member.name,
                member.email,
                member.role,
                i64::from(member.active),
            ],
        )?;
        Ok(())
    }

    pub fn board_members(&self, company_id: &str) -> Result<Vec<BoardMember>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT member_id, company_id, name, email, role, active
            FROM board_members
            WHERE company_id = ?1
            ORDER BY name ASC
            ",
        )?;
        let rows = statement.query_map([company_id], member_from_row)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn board_member_by_email(
        &self,
        company_id: &str,
        email: &str,
    ) -> Result<Option<BoardMember>, StorageError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT member_id, company_id, name, email, role, active
                FROM board_members
                WHERE company_id = ?1 AND email IS NOT NULL
                  AND LOWER(TRIM(email)) = LOWER(TRIM(?2))
                ",
                params![company_id, email],
                member_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Idempotent: a second attempt for the same meeting+member pair is
    /// a no-op. Returns whether a new record was created.
    pub fn ensure_signature(
        &self,
        meeting_id: &str,
        board_member_id: &str,
    ) -> Result<bool, StorageError> {
        let signature_id = uuid::Uuid::new_v4().to_string();
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO signatures (signature_id, meeting_id, board_member_id)
            VALUES (?1, ?2, ?3)
            ",
            params![signature_id, meeting_id, board_member_id],
        )?;
        Ok(changes > 0)
    }

    /// Ensure-then-read variant for callers that need the row back.
    pub fn ensure_and_fetch_signature(
        &self,
        meeting_id: &str,
        board_member_id: &str,
    ) -> Result<SignerRecord, StorageError> {
        self.ensure_signature(meeting_id, board_member_id)?;
        let row = self.conn.query_row(
            &format!("{SIGNATURE_SELECT} WHERE meeting_id = ?1 AND board_member_id = ?2"),
            params![meeting_id, board_member_id],
            signature_from_row,
        )?;
        Ok(row)
    }

    pub fn signatures(&self, meeting_id: &str) -> Result<Vec<SignerRecord>, StorageError> {
        let mut statement = self
            .conn
            .prepare(&format!("{SIGNATURE_SELECT} WHERE meeting_id = ?1"))?;
        let rows = statement.query_map([meeting_id], signature_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn signature_by_member(
        &self,
        meeting_id: &str,
        board_member_id: &str,
    ) -> Result<Option<SignerRecord>, StorageError> {
        let row = self
            .conn
            .query_row(
                &format!("{SIGNATURE_SELECT} WHERE meeting_id = ?1 AND board_member_id = ?2"),
                params![meeting_id, board_member_id],
                signature_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Overwrites the provider-observed fields of a signer record. The
    /// authoritative `signed_at` is not touched here; see
    /// [`BoardStore::mark_signed_if_unsigned`].
    pub fn update_signature_provider_state(
        &self,
        signature_id: &str,
        provider: ProviderKey,
        provider_signer_id: Option<&str>,
        provider_status: SignatureStatus,
        signed_at_provider: Option<DateTime<Utc>>,
        raw_provider_meta: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE signatures SET
                provider = ?1,
                provider_signer_id = ?2,
                provider_status = ?3,
                signed_at_provider = COALESCE(?4, signed_at_provider),
                raw_provider_meta = COALESCE(?5, raw_provider_meta)
            WHERE signature_id = ?6
            ",
            params![
                provider.as_str(),
                provider_signer_id,
                provider_status.as_str(),
                signed_at_provider.map(|ts| ts.to_rfc3339()),
                raw_provider_meta,
                signature_id,
            ],
        )?;
        Ok(())
    }

    /// Monotonic: once `signed_at` is set it never moves. Returns
    /// whether this call set it.
    pub fn mark_signed_if_unsigned(
        &self,
        signature_id: &str,
        signed_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE signatures SET signed_at = ?1
            WHERE signature_id = ?2 AND signed_at IS NULL
            ",
            params![signed_at.to_rfc3339(), signature_id],
        )?;
        Ok(changes > 0)
    }

    /// Legacy email-link signing: records the typed name alongside the
    /// timestamp, with the same once-only guard.
    pub fn record_typed_signature(
        &self,
        signature_id: &str,
        typed_name: &str,
        signed_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE signatures SET signed_at = ?1, typed_name = ?2
            WHERE signature_id = ?3 AND signed_at IS NULL
            ",
            params![signed_at.to_rfc3339(), typed_name, signature_id],
        )?;
        Ok(changes > 0)
    }

    pub fn set_evidence_path_if_absent(
        &self,
        signature_id: &str,
        evidence_path: &str,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE signatures SET evidence_path = COALESCE(evidence_path, ?1)
            WHERE signature_id = ?2
            ",
            params![evidence_path, signature_id],
        )?;
        Ok(())
    }

    pub fn insert_signing_token(&self, token: &SigningToken) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO signing_tokens (token, meeting_id, board_member_id, expires_at, used_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                token.token,
                token.meeting_id,
                token.board_member_id,
                token.expires_at.to_rfc3339(),
                token.used_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn signing_token(&self, token: &str) -> Result<Option<SigningToken>, StorageError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT token, meeting_id, board_member_id, expires_at, used_at
                FROM signing_tokens
                WHERE token = ?1
                ",
                [token],
                |row| {
                    Ok(SigningToken {
                        token: row.get(0)?,
                        meeting_id: row.get(1)?,
                        board_member_id: row.get(2)?,
                        expires_at: timestamp_column(row.get::<_, String>(3)?, 3)?,
                        used_at: optional_timestamp_column(row.get(4)?, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn mark_signing_token_used(
        &self,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE signing_tokens SET used_at = COALESCE(used_at, ?1) WHERE token = ?2",
            params![used_at.to_rfc3339(), token],
        )?;
        Ok(())
    }
}

const MEETING_SELECT: &str = "
    SELECT meeting_id, company_id, company_name, title, protocol_date_label, status,
           signing_provider, signing_provider_session_id, signing_method, signature_level,
           protocol_path, signed_protocol_path, signing_completed_at
    FROM meetings
";

const SIGNATURE_SELECT: &str = "
    SELECT signature_id, meeting_id, board_member_id, provider, provider_signer_id,
           provider_status, signed_at_provider, signed_at, typed_name, raw_provider_meta,
           evidence_path
    FROM signatures
";

fn meeting_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Meeting> {
    Ok(Meeting {
        meeting_id: row.get(0)?,
        company_id: row.get(1)?,
        company_name: row.get(2)?,
        title: row.get(3)?,
        protocol_date_label: row.get(4)?,
        status: enum_column(row.get::<_, String>(5)?, 5)?,
        signing_provider: optional_enum_column(row.get(6)?, 6)?,
        signing_provider_session_id: row.get(7)?,
        signing_method: optional_enum_column(row.get(8)?, 8)?,
        signature_level: row.get(9)?,
        protocol_path: row.get(10)?,
        signed_protocol_path: row.get(11)?,
        signing_completed_at: optional_timestamp_column(row.get(12)?, 12)?,
    })
}

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BoardMember> {
    Ok(BoardMember {
        member_id: row.get(0)?,
        company_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
    })
}

fn signature_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignerRecord> {
    Ok(SignerRecord {
        signature_id: row.get(0)?,
        meeting_id: row.get(1)?,
        board_member_id: row.get(2)?,
        provider: optional_enum_column(row.get(3)?, 3)?,
        provider_signer_id: row.get(4)?,
        provider_status: optional_enum_column(row.get(5)?, 5)?,
        signed_at_provider: optional_timestamp_column(row.get(6)?, 6)?,
        signed_at: optional_timestamp_column(row.get(7)?, 7)?,
        typed_name: row.get(8)?,
        raw_provider_meta: row.get(9)?,
        evidence_path: row.get(10)?,
    })
}

fn enum_column<T: FromStr<Err = String>>(value: String, index: usize) -> rusqlite::Result<T> {
    value.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        )
    })
}

fn optional_enum_column<T: FromStr<Err = String>>(
    value: Option<String>,
    index: usize,
) -> rusqlite::Result<Option<T>> {
    value.map(|value| enum_column(value, index)).transpose()
}

fn timestamp_column(value: String, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn optional_timestamp_column(
    value: Option<String>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value
        .map(|value| timestamp_column(value, index))
        .transpose()
}
