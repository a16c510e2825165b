//! In-memory storage backend.
//!
//! Backs tests and small embedded deployments. Batch atomicity falls out of
//! holding the single state lock for the whole batch.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    digest::{shares_digest, DigestSet},
    error::CoreError,
    models::{ArtifactId, ContentArtifact, ContentId, NaturalKey, PersistedContent,
        RemoteArtifact, RepositoryVersion},
    CoreResult,
};

use super::{ArtifactRecord, ContentToSave, NewArtifact, Storage, VersionMembership};

#[derive(Default)]
struct Inner {
    artifacts: BTreeMap<ArtifactId, ArtifactRecord>,
    next_artifact_id: ArtifactId,
    content: BTreeMap<ContentId, PersistedContent>,
    content_index: HashMap<(String, NaturalKey), ContentId>,
    next_content_id: ContentId,
    links: HashMap<ContentId, Vec<(ContentArtifact, RemoteArtifact)>>,
    // version N's membership lives at index N-1
    repositories: HashMap<String, Vec<HashSet<ContentId>>>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linkage rows for one content unit. Not part of the [`Storage`]
    /// trait; the pipeline never reads links back.
    pub fn content_links(&self, id: ContentId) -> Vec<(ContentArtifact, RemoteArtifact)> {
        self.inner
            .lock()
            .unwrap()
            .links
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn artifact_count(&self) -> usize {
        self.inner.lock().unwrap().artifacts.len()
    }
}

impl Inner {
    fn membership(
        &self,
        version: &RepositoryVersion,
    ) -> CoreResult<&HashSet<ContentId>> {
        let versions = self
            .repositories
            .get(&version.repository)
            .ok_or_else(|| CoreError::UnknownRepository(version.repository.clone()))?;
        versions
            .get((version.number as usize).wrapping_sub(1))
            .ok_or_else(|| {
                CoreError::UnknownVersion {
                    repository: version.repository.clone(),
                    number: version.number,
                }
            })
    }

    fn membership_mut(
        &mut self,
        version: &RepositoryVersion,
    ) -> CoreResult<&mut HashSet<ContentId>> {
        let versions = self
            .repositories
            .get_mut(&version.repository)
            .ok_or_else(|| CoreError::UnknownRepository(version.repository.clone()))?;
        versions
            .get_mut((version.number as usize).wrapping_sub(1))
            .ok_or_else(|| {
                CoreError::UnknownVersion {
                    repository: version.repository.clone(),
                    number: version.number,
                }
            })
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_artifacts(&self, criteria: &[DigestSet]) -> CoreResult<Vec<ArtifactRecord>> {
        let inner = self.inner.lock().unwrap();
        let found: Vec<ArtifactRecord> = inner
            .artifacts
            .values()
            .filter(|record| criteria.iter().any(|c| shares_digest(&record.digests, c)))
            .cloned()
            .collect();
        debug!(criteria = criteria.len(), found = found.len(), "artifact lookup");
        Ok(found)
    }

    async fn bulk_create_artifacts(
        &self,
        artifacts: Vec<NewArtifact>,
    ) -> CoreResult<Vec<ArtifactRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let mut created = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if artifact.digests.is_empty() {
                return Err(CoreError::MissingDigest);
            }
            // a shared non-empty digest means same content; reuse that row
            // instead of minting a second identity for the same bytes
            let existing = inner
                .artifacts
                .values()
                .find(|record| shares_digest(&record.digests, &artifact.digests))
                .cloned();
            if let Some(record) = existing {
                created.push(record);
                continue;
            }
            inner.next_artifact_id += 1;
            let record = ArtifactRecord {
                id: inner.next_artifact_id,
                digests: artifact.digests,
                size: artifact.size,
                storage_path: artifact.storage_path,
            };
            inner.artifacts.insert(record.id, record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn find_content(
        &self,
        content_type: &str,
        keys: &[NaturalKey],
    ) -> CoreResult<Vec<PersistedContent>> {
        let inner = self.inner.lock().unwrap();
        // A unit matches when some queried key is a subset of the unit's
        // key, the way an OR-of-ANDs column query behaves. Callers re-check
        // for exact equality.
        let matched = inner
            .content
            .values()
            .filter(|record| record.unit.content_type == content_type)
            .filter(|record| {
                keys.iter().any(|key| {
                    key.fields()
                        .all(|(field, value)| record.unit.natural_key.get(field) == Some(value))
                })
            })
            .cloned()
            .collect();
        Ok(matched)
    }

    async fn save_content_batch(
        &self,
        batch: Vec<ContentToSave>,
    ) -> CoreResult<Vec<PersistedContent>> {
        let mut inner = self.inner.lock().unwrap();
        let mut saved = Vec::with_capacity(batch.len());
        for item in batch {
            let index_key = (item.unit.content_type.clone(), item.unit.natural_key.clone());
            let id = match inner.content_index.get(&index_key) {
                Some(&existing) => existing,
                None => {
                    inner.next_content_id += 1;
                    let id = inner.next_content_id;
                    inner.content.insert(
                        id,
                        PersistedContent {
                            id,
                            unit: item.unit.clone(),
                        },
                    );
                    inner.content_index.insert(index_key, id);
                    id
                }
            };
            let links = item
                .links
                .into_iter()
                .map(|link| {
                    (
                        ContentArtifact {
                            content_id: id,
                            artifact_id: link.artifact_id,
                            relative_path: link.relative_path,
                        },
                        link.remote,
                    )
                })
                .collect();
            inner.links.insert(id, links);
            saved.push(PersistedContent {
                id,
                unit: item.unit,
            });
        }
        Ok(saved)
    }

    async fn create_version(&self, repository: &str) -> CoreResult<RepositoryVersion> {
        let mut inner = self.inner.lock().unwrap();
        let versions = inner.repositories.entry(repository.to_string()).or_default();
        let seed = versions.last().cloned().unwrap_or_default();
        versions.push(seed);
        let version = RepositoryVersion {
            repository: repository.to_string(),
            number: versions.len() as u64,
        };
        debug!(repository, number = version.number, "created repository version");
        Ok(version)
    }

    async fn version_membership(
        &self,
        version: &RepositoryVersion,
    ) -> CoreResult<VersionMembership> {
        let inner = self.inner.lock().unwrap();
        let ids = inner.membership(version)?;
        let mut membership = VersionMembership::new();
        for id in ids {
            if let Some(record) = inner.content.get(id) {
                membership
                    .entry(record.unit.content_type.clone())
                    .or_default()
                    .insert(record.unit.natural_key.clone(), *id);
            }
        }
        Ok(membership)
    }

    async fn add_content(
        &self,
        version: &RepositoryVersion,
        content_type: &str,
        ids: &HashSet<ContentId>,
    ) -> CoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let members = inner.membership_mut(version)?;
        let mut added = 0;
        for id in ids {
            if members.insert(*id) {
                added += 1;
            }
        }
        debug!(content_type, added, "associated content");
        Ok(added)
    }

    async fn remove_content(
        &self,
        version: &RepositoryVersion,
        content_type: &str,
        ids: &HashSet<ContentId>,
    ) -> CoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let members = inner.membership_mut(version)?;
        let mut removed = 0;
        for id in ids {
            if members.remove(id) {
                removed += 1;
            }
        }
        debug!(content_type, removed, "unassociated content");
        Ok(removed)
    }
}
