//! Data model shared by the download subsystem and the ingestion pipeline.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::digest::{shares_digest, DigestSet};

pub type ArtifactId = u64;
pub type ContentId = u64;

/// A content-addressed binary blob.
///
/// Artifacts move forward along `Pending` -> `Downloaded` -> `Persisted` and
/// never regress. `Pending` may carry only partial expectations (some digest
/// values known from remote metadata, size optional); `Downloaded` has real
/// bytes on disk but no durable identity yet; `Persisted` is in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Pending {
        expected_digests: DigestSet,
        expected_size: Option<u64>,
    },
    Downloaded {
        file: PathBuf,
        digests: DigestSet,
        size: u64,
    },
    Persisted {
        id: ArtifactId,
        digests: DigestSet,
        size: u64,
        storage_path: PathBuf,
    },
}

impl Artifact {
    /// An artifact with nothing known about it yet.
    pub fn unknown() -> Self {
        Artifact::Pending {
            expected_digests: DigestSet::new(),
            expected_size: None,
        }
    }

    /// The digests currently known for this artifact. For a pending
    /// artifact these are expectations, not measurements.
    pub fn digests(&self) -> &DigestSet {
        match self {
            Artifact::Pending { expected_digests, .. } => expected_digests,
            Artifact::Downloaded { digests, .. } => digests,
            Artifact::Persisted { digests, .. } => digests,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            Artifact::Pending { expected_size, .. } => *expected_size,
            Artifact::Downloaded { size, .. } => Some(*size),
            Artifact::Persisted { size, .. } => Some(*size),
        }
    }

    pub fn id(&self) -> Option<ArtifactId> {
        match self {
            Artifact::Persisted { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Artifact::Pending { .. })
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Artifact::Persisted { .. })
    }

    /// Identity check: does this artifact share any non-empty digest with
    /// `other`?
    pub fn shares_digest(&self, other: &DigestSet) -> bool {
        shares_digest(self.digests(), other)
    }
}

/// Immutable natural key of a content unit: ordered field name -> value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey(BTreeMap<String, String>);

impl NaturalKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Exact equality over every field. Used to re-check query results so a
    /// superset match from storage is never mistaken for the same unit.
    pub fn matches(&self, other: &NaturalKey) -> bool {
        self.0 == other.0
    }
}

/// A logical content item identified by type plus natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub content_type: String,
    pub natural_key: NaturalKey,
}

impl ContentUnit {
    pub fn new(content_type: impl Into<String>, natural_key: NaturalKey) -> Self {
        Self {
            content_type: content_type.into(),
            natural_key,
        }
    }
}

/// A content unit that has durable identity in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedContent {
    pub id: ContentId,
    pub unit: ContentUnit,
}

/// Join entity linking a content unit to one of its artifacts.
///
/// `artifact_id` is `None` for on-demand content whose bytes were never
/// fetched; the accompanying [`RemoteArtifact`] still allows fetching them
/// later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentArtifact {
    pub content_id: ContentId,
    pub artifact_id: Option<ArtifactId>,
    pub relative_path: String,
}

/// Where and how an artifact can be re-fetched after local eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub url: String,
    pub remote_name: String,
    pub expected_digests: DigestSet,
    pub expected_size: Option<u64>,
}

/// Read-only configuration for reaching an upstream content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
    /// PEM-encoded CA bundle used to validate the upstream certificate.
    pub ca_pem: Option<Vec<u8>>,
    /// PEM-encoded client certificate for mutual TLS.
    pub client_cert_pem: Option<Vec<u8>>,
    /// PEM-encoded private key belonging to `client_cert_pem`. Both must be
    /// set together.
    pub client_key_pem: Option<Vec<u8>>,
    /// Disabling this turns off certificate and hostname checks. Off is a
    /// documented non-default escape hatch, never the default.
    pub tls_validation: bool,
    pub proxy_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Hard ceiling on concurrent connections to this remote.
    pub connection_limit: usize,
}

pub const DEFAULT_CONNECTION_LIMIT: usize = 10;

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ca_pem: None,
            client_cert_pem: None,
            client_key_pem: None,
            tls_validation: true,
            proxy_url: None,
            username: None,
            password: None,
            headers: Vec::new(),
            connection_limit: DEFAULT_CONNECTION_LIMIT,
        }
    }
}

/// Immutable snapshot of a repository's content-unit membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    pub repository: String,
    pub number: u64,
}

/// Content-addressed location of an artifact below the storage root.
///
/// Prefers the sha256 digest; falls back to any digest present.
pub fn artifact_storage_path(root: &Path, digests: &DigestSet) -> Option<PathBuf> {
    let hex = digests
        .get(&crate::digest::DigestAlgorithm::Sha256)
        .or_else(|| digests.values().next())?;
    if hex.len() < 3 {
        return None;
    }
    Some(root.join("artifacts").join(&hex[..2]).join(&hex[2..]))
}
