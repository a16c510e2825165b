//! Content-unit stages: dedup against storage, persist with linkage.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use depot_core::{
    models::{NaturalKey, RemoteArtifact},
    storage::{ContentToSave, LinkToSave, Storage},
};
use depot_events::{EventSinkHandle, SyncEvent};
use tracing::debug;

use crate::{
    api::{ItemReceiver, ItemSender, Stage, DEFAULT_BATCH_SIZE},
    error::Result,
    models::{DeclarativeContent, PipelineItem},
};

/// Attaches existing identities to content units already in storage.
///
/// One OR-query per content type; returned candidates are re-checked for
/// exact natural-key equality because the query may match supersets.
pub struct QueryExistingContents {
    storage: Arc<dyn Storage>,
    events: EventSinkHandle,
}

impl QueryExistingContents {
    pub fn new(storage: Arc<dyn Storage>, events: EventSinkHandle) -> Self {
        Self { storage, events }
    }
}

#[async_trait]
impl Stage for QueryExistingContents {
    fn name(&self) -> &'static str {
        "content_query"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        while let Some(mut batch) = rx.batches(DEFAULT_BATCH_SIZE).await {
            let mut keys_by_type: HashMap<String, Vec<NaturalKey>> = HashMap::new();
            for item in &batch {
                if let PipelineItem::Content(dc) = item {
                    if !dc.is_saved() {
                        keys_by_type
                            .entry(dc.content.content_type.clone())
                            .or_default()
                            .push(dc.content.natural_key.clone());
                    }
                }
            }

            let mut matched: u64 = 0;
            for (content_type, keys) in &keys_by_type {
                let candidates = self.storage.find_content(content_type, keys).await?;
                for item in &mut batch {
                    let PipelineItem::Content(dc) = item else { continue };
                    if dc.is_saved() || &dc.content.content_type != content_type {
                        continue;
                    }
                    let exact = candidates
                        .iter()
                        .find(|c| c.unit.natural_key.matches(&dc.content.natural_key));
                    if let Some(existing) = exact {
                        dc.content_id = Some(existing.id);
                        matched += 1;
                    }
                }
            }
            if !keys_by_type.is_empty() {
                debug!(matched, "content dedup");
                self.events.emit(SyncEvent::ContentDeduped { matched });
            }

            for item in batch {
                tx.send(item).await?;
            }
        }
        Ok(())
    }
}

/// Persists still-unsaved content units together with their linkage.
///
/// Each batch commits atomically: a unit and its ContentArtifact plus
/// RemoteArtifact rows are never visible separately.
pub struct ContentSaver {
    storage: Arc<dyn Storage>,
    events: EventSinkHandle,
}

impl ContentSaver {
    pub fn new(storage: Arc<dyn Storage>, events: EventSinkHandle) -> Self {
        Self { storage, events }
    }
}

#[async_trait]
impl Stage for ContentSaver {
    fn name(&self) -> &'static str {
        "content_saver"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        while let Some(mut batch) = rx.batches(DEFAULT_BATCH_SIZE).await {
            let mut positions = Vec::new();
            let mut rows = Vec::new();
            for (index, item) in batch.iter().enumerate() {
                let PipelineItem::Content(dc) = item else { continue };
                if dc.is_saved() {
                    continue;
                }
                positions.push(index);
                rows.push(ContentToSave {
                    unit: dc.content.clone(),
                    links: links_of(dc),
                });
            }

            if !rows.is_empty() {
                let saved = self.storage.save_content_batch(rows).await?;
                for (index, record) in positions.into_iter().zip(saved.iter()) {
                    if let PipelineItem::Content(dc) = &mut batch[index] {
                        dc.content_id = Some(record.id);
                    }
                }
                self.events.emit(SyncEvent::ContentSaved {
                    count: saved.len() as u64,
                });
            }

            for item in batch {
                tx.send(item).await?;
            }
        }
        Ok(())
    }
}

/// One link per declared artifact, carrying the re-fetch metadata that
/// outlives local eviction of the bytes.
fn links_of(dc: &DeclarativeContent) -> Vec<LinkToSave> {
    dc.artifacts
        .iter()
        .map(|da| {
            LinkToSave {
                artifact_id: da.artifact.id(),
                relative_path: da.relative_path.clone(),
                remote: RemoteArtifact {
                    url: da.url.clone(),
                    remote_name: da.remote.remote().name.clone(),
                    expected_digests: da.artifact.digests().clone(),
                    expected_size: da.artifact.size(),
                },
            }
        })
        .collect()
}
