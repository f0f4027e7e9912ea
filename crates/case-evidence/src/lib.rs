// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-evidence
//!
//! The evidence store: an append-only, content-hashed blob layer holding
//! the original uploaded file and every audit artifact produced while a
//! case is processed. Writes never overwrite; the container policy this
//! layer assumes is immutable storage with a multi-year retention lock.
#![deny(unsafe_code)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use case_core::sha256_hex;

/// The fixed set of per-case artifacts the evidence store's path layout
/// names explicitly (spec section 6, "blob store paths").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The original uploaded workbook, stored under `orders-incoming/`.
    OriginalFile,
    /// The canonical order snapshot, as JSON.
    CanonicalOrder,
    /// The committee's raw per-provider votes, as JSON.
    CommitteeVotes,
    /// User-submitted corrections, as JSON.
    Corrections,
    /// The outbound request sent to the external bookkeeping service.
    ExternalRequest,
    /// The inbound response from the external bookkeeping service.
    ExternalResponse,
}

impl ArtifactKind {
    /// Returns the per-case relative path for this artifact kind.
    ///
    /// `extension` is only consulted for [`ArtifactKind::OriginalFile`],
    /// whose extension varies with the uploaded workbook's type; every
    /// other kind has a fixed filename.
    fn relative_path(self, case_id: Uuid, extension: &str) -> PathBuf {
        match self {
            Self::OriginalFile => PathBuf::from(format!("orders-incoming/{case_id}/original.{extension}")),
            Self::CanonicalOrder => PathBuf::from(format!("orders-audit/{case_id}/canonical.json")),
            Self::CommitteeVotes => PathBuf::from(format!("orders-audit/{case_id}/committee-votes.json")),
            Self::Corrections => PathBuf::from(format!("orders-audit/{case_id}/corrections.json")),
            Self::ExternalRequest => PathBuf::from(format!("orders-audit/{case_id}/external-request.json")),
            Self::ExternalResponse => PathBuf::from(format!("orders-audit/{case_id}/external-response.json")),
        }
    }
}

/// A pointer to a stored artifact: where it lives and the SHA-256 of its
/// bytes at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the evidence store's root.
    pub path: String,
    /// SHA-256 hex digest of the stored bytes.
    pub sha256_hex: String,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.sha256_hex)
    }
}

/// Errors from the evidence store.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    /// The underlying filesystem operation failed.
    #[error("evidence store io error at {path}: {source}")]
    Io {
        /// The path being operated on.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A write targeted a path that already holds different bytes.
    ///
    /// Evidence artifacts are immutable: a second write with the same
    /// content is treated as an idempotent no-op, but a second write with
    /// different content is rejected rather than silently overwriting the
    /// retained artifact.
    #[error("refusing to overwrite immutable artifact at {path} (existing sha256 {existing_sha256}, new {new_sha256})")]
    ImmutableOverwrite {
        /// The path that already exists.
        path: String,
        /// The digest already stored.
        existing_sha256: String,
        /// The digest of the bytes being written.
        new_sha256: String,
    },
    /// The requested artifact does not exist.
    #[error("artifact not found at {path}")]
    NotFound {
        /// The path that was looked up.
        path: String,
    },
}

/// Append-only, content-hashed blob storage rooted at a filesystem
/// directory.
///
/// Grounded on the receipt store pattern: create the per-case directory on
/// first write, hash everything written, and never mutate a path once
/// populated.
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    /// Opens (without creating) an evidence store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory this store is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `bytes` to the path for `(case_id, kind)`, creating parent
    /// directories as needed.
    ///
    /// If the path already holds identical bytes, this is a no-op
    /// (idempotent retry after a crash between write and audit-event
    /// append). If it holds different bytes, returns
    /// [`EvidenceError::ImmutableOverwrite`].
    pub fn put(&self, case_id: Uuid, kind: ArtifactKind, extension: &str, bytes: &[u8]) -> Result<ArtifactRef, EvidenceError> {
        let relative = kind.relative_path(case_id, extension);
        let absolute = self.root.join(&relative);
        let new_sha256 = sha256_hex(bytes);

        if absolute.exists() {
            let existing = std::fs::read(&absolute).map_err(|source| EvidenceError::Io {
                path: relative.display().to_string(),
                source,
            })?;
            let existing_sha256 = sha256_hex(&existing);
            if existing_sha256 == new_sha256 {
                tracing::debug!(case_id = %case_id, path = %relative.display(), "idempotent evidence write, bytes unchanged");
                return Ok(ArtifactRef {
                    path: relative.display().to_string(),
                    sha256_hex: existing_sha256,
                });
            }
            return Err(EvidenceError::ImmutableOverwrite {
                path: relative.display().to_string(),
                existing_sha256,
                new_sha256,
            });
        }

        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EvidenceError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(&absolute, bytes).map_err(|source| EvidenceError::Io {
            path: relative.display().to_string(),
            source,
        })?;
        tracing::info!(case_id = %case_id, path = %relative.display(), sha256 = %new_sha256, "wrote evidence artifact");
        Ok(ArtifactRef {
            path: relative.display().to_string(),
            sha256_hex: new_sha256,
        })
    }

    /// Reads back the bytes at a relative path previously returned in an
    /// [`ArtifactRef`].
    pub fn get(&self, relative_path: &str) -> Result<Vec<u8>, EvidenceError> {
        let absolute = self.root.join(relative_path);
        std::fs::read(&absolute).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                EvidenceError::NotFound {
                    path: relative_path.to_string(),
                }
            } else {
                EvidenceError::Io {
                    path: relative_path.to_string(),
                    source,
                }
            }
        })
    }

    /// Recomputes the SHA-256 of the bytes at `artifact.path` and compares
    /// it against `artifact.sha256_hex`.
    pub fn verify(&self, artifact: &ArtifactRef) -> Result<bool, EvidenceError> {
        let bytes = self.get(&artifact.path)?;
        Ok(sha256_hex(&bytes) == artifact.sha256_hex)
    }
}
