//! Filesystem blob store for protocol documents and signing evidence.
//!
//! Every write target is uniquely named per meeting and purpose; the
//! unsigned and signed protocol never share a path, so a half-written
//! signed file can never be read as the unsigned one (or vice versa).

use std::fs;
use std::path::{Path, PathBuf};

use crate::StorageError;

const UNSIGNED_PROTOCOL_FILE: &str = "protokoll.pdf";
const SIGNED_PROTOCOL_FILE: &str = "protokoll-signed.pdf";
const EVIDENCE_DIR: &str = "signing-evidence";

pub struct ArtifactVault {
    root: PathBuf,
}

impl ArtifactVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn put(&self, relative_path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let target = self.root.join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        Ok(relative_path.to_string())
    }

    pub fn get(&self, relative_path: &str) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.root.join(relative_path))?)
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.root.join(relative_path).exists()
    }

    pub fn store_unsigned_protocol(
        &self,
        company_id: &str,
        meeting_id: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        self.put(&join(&[company_id, meeting_id, UNSIGNED_PROTOCOL_FILE]), bytes)
    }

    pub fn store_signed_protocol(
        &self,
        company_id: &str,
        meeting_id: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        self.put(&join(&[company_id, meeting_id, SIGNED_PROTOCOL_FILE]), bytes)
    }

    pub fn store_evidence(
        &self,
        company_id: &str,
        meeting_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        self.put(
            &join(&[company_id, meeting_id, EVIDENCE_DIR, filename]),
            bytes,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn join(parts: &[&str]) -> String {
    parts.join("/")
}
