//! Artifact stages: dedup against storage, download, persist.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use depot_core::{
    digest::shares_digest,
    error::{CoreError, ErrorContext},
    models::{artifact_storage_path, Artifact},
    storage::{NewArtifact, Storage},
};
use depot_events::{EventSinkHandle, SyncEvent};
use futures_util::{
    future::{try_join_all, BoxFuture},
    stream::FuturesUnordered,
    FutureExt, StreamExt,
};
use tracing::debug;

use crate::{
    api::{ItemReceiver, ItemSender, Stage, DEFAULT_BATCH_SIZE},
    error::{Result, StageError},
    models::{DeclarativeContent, PipelineItem},
};

/// Stage-local cap on in-flight downloads, independent of each remote's own
/// connection limit.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 100;

/// Swaps pending artifacts for matching persisted ones.
///
/// One batched query covers every pending artifact's known digests, OR
/// across items. Every item is forwarded whether or not it matched.
pub struct QueryExistingArtifacts {
    storage: Arc<dyn Storage>,
    events: EventSinkHandle,
}

impl QueryExistingArtifacts {
    pub fn new(storage: Arc<dyn Storage>, events: EventSinkHandle) -> Self {
        Self { storage, events }
    }
}

#[async_trait]
impl Stage for QueryExistingArtifacts {
    fn name(&self) -> &'static str {
        "artifact_query"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        while let Some(mut batch) = rx.batches(DEFAULT_BATCH_SIZE).await {
            let mut criteria = Vec::new();
            for item in &batch {
                if let PipelineItem::Content(dc) = item {
                    for da in &dc.artifacts {
                        if da.artifact.is_pending() && !da.artifact.digests().is_empty() {
                            criteria.push(da.artifact.digests().clone());
                        }
                    }
                }
            }

            if !criteria.is_empty() {
                let records = self.storage.find_artifacts(&criteria).await?;
                let mut matched: u64 = 0;
                for item in &mut batch {
                    let PipelineItem::Content(dc) = item else { continue };
                    for da in &mut dc.artifacts {
                        if !da.artifact.is_pending() {
                            continue;
                        }
                        let hit = records
                            .iter()
                            .find(|record| shares_digest(&record.digests, da.artifact.digests()));
                        if let Some(record) = hit {
                            da.artifact = Artifact::Persisted {
                                id: record.id,
                                digests: record.digests.clone(),
                                size: record.size,
                                storage_path: record.storage_path.clone(),
                            };
                            matched += 1;
                        }
                    }
                }
                debug!(candidates = criteria.len(), matched, "artifact dedup");
                self.events.emit(SyncEvent::ArtifactsDeduped { matched });
            }

            for item in batch {
                tx.send(item).await?;
            }
        }
        Ok(())
    }
}

/// Downloads every still-pending artifact.
///
/// Keeps up to `max_concurrent_downloads` content units in flight and
/// forwards each one as soon as its downloads finish, so output order
/// follows completion time, not input order.
pub struct ArtifactDownloader {
    max_concurrent_downloads: usize,
    events: EventSinkHandle,
}

impl ArtifactDownloader {
    pub fn new(events: EventSinkHandle) -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            events,
        }
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }
}

#[async_trait]
impl Stage for ArtifactDownloader {
    fn name(&self) -> &'static str {
        "artifact_downloader"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Result<DeclarativeContent>>> =
            FuturesUnordered::new();
        let completed = Arc::new(AtomicU64::new(0));
        let mut input_open = true;

        while input_open || !in_flight.is_empty() {
            tokio::select! {
                item = rx.recv(), if input_open && in_flight.len() < self.max_concurrent_downloads => {
                    match item {
                        Some(PipelineItem::Content(dc))
                            if dc.artifacts.iter().any(|da| da.artifact.is_pending()) =>
                        {
                            in_flight.push(
                                download_content(dc, self.events.clone(), completed.clone())
                                    .boxed(),
                            );
                        }
                        Some(item) => tx.send(item).await?,
                        None => input_open = false,
                    }
                }
                Some(done) = in_flight.next() => {
                    tx.send(PipelineItem::Content(done?)).await?;
                }
            }
        }
        Ok(())
    }
}

/// Fetches every pending artifact of one content unit concurrently. The
/// first failed download fails the whole unit.
async fn download_content(
    mut dc: DeclarativeContent,
    events: EventSinkHandle,
    completed: Arc<AtomicU64>,
) -> Result<DeclarativeContent> {
    let mut jobs = Vec::new();
    for (index, da) in dc.artifacts.iter().enumerate() {
        if !da.artifact.is_pending() {
            continue;
        }
        let mut downloader = da.remote.build(&da.url, da.validation())?;
        let events = events.clone();
        let completed = completed.clone();
        jobs.push(async move {
            let result = downloader.run().await?;
            let count = completed.fetch_add(1, Ordering::SeqCst) + 1;
            events.emit(SyncEvent::DownloadCompleted {
                url: result.url.clone(),
                completed: count,
            });
            Ok::<_, StageError>((index, result))
        });
    }
    for (index, result) in try_join_all(jobs).await? {
        dc.artifacts[index].artifact = Artifact::Downloaded {
            file: result.path,
            digests: result.digests,
            size: result.size,
        };
    }
    Ok(dc)
}

/// Persists downloaded artifacts.
///
/// Moves each backing file to its content-addressed location, then creates
/// all artifact rows of the batch in one call. Files already moved are not
/// rolled back when a later move in the same batch fails.
pub struct ArtifactSaver {
    storage: Arc<dyn Storage>,
    storage_root: PathBuf,
    events: EventSinkHandle,
}

impl ArtifactSaver {
    pub fn new(
        storage: Arc<dyn Storage>,
        storage_root: impl Into<PathBuf>,
        events: EventSinkHandle,
    ) -> Self {
        Self {
            storage,
            storage_root: storage_root.into(),
            events,
        }
    }
}

#[async_trait]
impl Stage for ArtifactSaver {
    fn name(&self) -> &'static str {
        "artifact_saver"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        while let Some(mut batch) = rx.batches(DEFAULT_BATCH_SIZE).await {
            // (item index, artifact index) of every downloaded artifact,
            // aligned with the rows handed to storage
            let mut positions = Vec::new();
            let mut rows = Vec::new();

            for (item_index, item) in batch.iter().enumerate() {
                let PipelineItem::Content(dc) = item else { continue };
                for (artifact_index, da) in dc.artifacts.iter().enumerate() {
                    if let Artifact::Downloaded { file, digests, size } = &da.artifact {
                        let dest = artifact_storage_path(&self.storage_root, digests)
                            .ok_or(CoreError::MissingDigest)?;
                        place_file(file, &dest).await?;
                        positions.push((item_index, artifact_index));
                        rows.push(NewArtifact {
                            digests: digests.clone(),
                            size: *size,
                            storage_path: dest,
                        });
                    }
                }
            }

            if !rows.is_empty() {
                let records = self.storage.bulk_create_artifacts(rows).await?;
                for ((item_index, artifact_index), record) in
                    positions.into_iter().zip(records.iter())
                {
                    if let PipelineItem::Content(dc) = &mut batch[item_index] {
                        dc.artifacts[artifact_index].artifact = Artifact::Persisted {
                            id: record.id,
                            digests: record.digests.clone(),
                            size: record.size,
                            storage_path: record.storage_path.clone(),
                        };
                    }
                }
                self.events.emit(SyncEvent::ArtifactsSaved {
                    count: records.len() as u64,
                });
            }

            for item in batch {
                tx.send(item).await?;
            }
        }
        Ok(())
    }
}

/// Moves a downloaded temp file to its permanent location. Falls back to
/// copy + remove because the working directory and the storage root may
/// live on different filesystems.
async fn place_file(file: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;
    }
    if tokio::fs::rename(file, dest).await.is_err() {
        tokio::fs::copy(file, dest)
            .await
            .with_context(|| format!("copying artifact into {}", dest.display()))?;
        tokio::fs::remove_file(file)
            .await
            .with_context(|| format!("removing staged file {}", file.display()))?;
    }
    Ok(())
}
