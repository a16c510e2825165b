//! Storage interface consumed by the ingestion pipeline.
//!
//! The pipeline only ever talks to storage through this trait: batched
//! lookups, bulk creates, and set-based repository-version membership
//! changes. Per-item loops belong to backends, not callers.

mod memory;

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
};

use async_trait::async_trait;

pub use memory::MemoryStorage;

use crate::{
    digest::DigestSet,
    models::{ArtifactId, ContentId, ContentUnit, NaturalKey, PersistedContent, RemoteArtifact,
        RepositoryVersion},
    CoreResult,
};

/// A persisted artifact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    pub digests: DigestSet,
    pub size: u64,
    pub storage_path: PathBuf,
}

/// An artifact about to be persisted.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub digests: DigestSet,
    pub size: u64,
    pub storage_path: PathBuf,
}

/// Linkage to persist alongside a content unit: the artifact reference plus
/// the re-fetch metadata.
#[derive(Debug, Clone)]
pub struct LinkToSave {
    pub artifact_id: Option<ArtifactId>,
    pub relative_path: String,
    pub remote: RemoteArtifact,
}

/// One content unit plus its linkage, committed atomically as a group.
#[derive(Debug, Clone)]
pub struct ContentToSave {
    pub unit: ContentUnit,
    pub links: Vec<LinkToSave>,
}

/// Membership of one repository version: content type -> natural key -> id.
pub type VersionMembership = HashMap<String, HashMap<NaturalKey, ContentId>>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// One batched lookup matching any artifact that shares a non-empty
    /// digest with any entry in `criteria` (OR across items).
    async fn find_artifacts(&self, criteria: &[DigestSet]) -> CoreResult<Vec<ArtifactRecord>>;

    /// Persists a batch of artifacts in one call. Returned records are in
    /// input order. An input sharing a non-empty digest with an existing
    /// artifact, or with an earlier input of the same batch, yields the
    /// existing record instead of a new row.
    async fn bulk_create_artifacts(
        &self,
        artifacts: Vec<NewArtifact>,
    ) -> CoreResult<Vec<ArtifactRecord>>;

    /// One OR-query over natural keys for a single content type. May return
    /// superset matches; callers re-check keys exactly.
    async fn find_content(
        &self,
        content_type: &str,
        keys: &[NaturalKey],
    ) -> CoreResult<Vec<PersistedContent>>;

    /// Persists content units and their linkage records. Each batch commits
    /// atomically: a unit and its ContentArtifact/RemoteArtifact rows are
    /// never visible separately. Returned records are in input order.
    async fn save_content_batch(
        &self,
        batch: Vec<ContentToSave>,
    ) -> CoreResult<Vec<PersistedContent>>;

    /// Creates the next version of `repository`, seeded with the previous
    /// version's membership. Creates the repository on first use.
    async fn create_version(&self, repository: &str) -> CoreResult<RepositoryVersion>;

    /// Full membership snapshot of a version.
    async fn version_membership(
        &self,
        version: &RepositoryVersion,
    ) -> CoreResult<VersionMembership>;

    /// Set-based add of content units to a version. Returns how many were
    /// newly added.
    async fn add_content(
        &self,
        version: &RepositoryVersion,
        content_type: &str,
        ids: &HashSet<ContentId>,
    ) -> CoreResult<u64>;

    /// Set-based removal of content units from a version. Returns how many
    /// were removed.
    async fn remove_content(
        &self,
        version: &RepositoryVersion,
        content_type: &str,
        ids: &HashSet<ContentId>,
    ) -> CoreResult<u64>;
}
