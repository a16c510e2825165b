//! Full sync orchestration: wires the standard stages into one pipeline and
//! advances a repository to a new version.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use depot_core::{models::RepositoryVersion, storage::Storage};
use depot_events::{EventSinkHandle, NullSink, SyncEvent};
use tracing::info;

use crate::{
    api::{create_pipeline, ItemReceiver, ItemSender, Stage, DEFAULT_QUEUE_SIZE},
    artifact::{ArtifactDownloader, ArtifactSaver, QueryExistingArtifacts},
    association::{ContentAssociation, ContentUnassociation},
    content::{ContentSaver, QueryExistingContents},
    error::Result,
};

/// Produces the declared content of one sync run.
///
/// Implementations enumerate remote metadata and send one
/// [`crate::models::DeclarativeContent`] per declared unit. Returning closes
/// the queue behind the producer, which is the pipeline's end-of-input
/// sentinel.
#[async_trait]
pub trait FirstStage: Send {
    async fn run(self: Box<Self>, tx: ItemSender) -> Result<()>;
}

struct FirstStageAdapter {
    inner: Box<dyn FirstStage>,
}

#[async_trait]
impl Stage for FirstStageAdapter {
    fn name(&self) -> &'static str {
        "first_stage"
    }

    async fn run(self: Box<Self>, _rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        self.inner.run(tx).await
    }
}

/// Whether undeclared content survives the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Final membership is the union of old and declared content.
    Additive,
    /// Final membership is exactly the declared content.
    Mirror,
}

/// Builds and runs the standard ingestion pipeline against one repository.
pub struct DeclarativeVersion {
    first_stage: Box<dyn FirstStage>,
    storage: Arc<dyn Storage>,
    storage_root: PathBuf,
    repository: String,
    mode: SyncMode,
    events: EventSinkHandle,
    max_concurrent_downloads: Option<usize>,
    queue_size: usize,
}

impl DeclarativeVersion {
    pub fn new(
        first_stage: Box<dyn FirstStage>,
        storage: Arc<dyn Storage>,
        storage_root: impl Into<PathBuf>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            first_stage,
            storage,
            storage_root: storage_root.into(),
            repository: repository.into(),
            mode: SyncMode::Additive,
            events: Arc::new(NullSink),
            max_concurrent_downloads: None,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_events(mut self, events: EventSinkHandle) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = Some(max);
        self
    }

    /// Inter-stage queue capacity. Values below 1 are clamped to 1.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Creates the next repository version and runs the pipeline to fill it.
    ///
    /// On any stage failure the version is left as the pipeline abandoned
    /// it; batches committed before the failure stay committed.
    pub async fn create(self) -> Result<RepositoryVersion> {
        let version = self.storage.create_version(&self.repository).await?;
        info!(
            repository = %version.repository,
            number = version.number,
            mode = ?self.mode,
            "starting sync"
        );

        let mut downloader = ArtifactDownloader::new(self.events.clone());
        if let Some(max) = self.max_concurrent_downloads {
            downloader = downloader.with_max_concurrent_downloads(max);
        }

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(FirstStageAdapter {
                inner: self.first_stage,
            }),
            Box::new(QueryExistingArtifacts::new(
                self.storage.clone(),
                self.events.clone(),
            )),
            Box::new(downloader),
            Box::new(ArtifactSaver::new(
                self.storage.clone(),
                self.storage_root.clone(),
                self.events.clone(),
            )),
            Box::new(QueryExistingContents::new(
                self.storage.clone(),
                self.events.clone(),
            )),
            Box::new(ContentSaver::new(self.storage.clone(), self.events.clone())),
            Box::new(ContentAssociation::new(
                self.storage.clone(),
                version.clone(),
                self.events.clone(),
            )),
        ];
        if self.mode == SyncMode::Mirror {
            stages.push(Box::new(ContentUnassociation::new(
                self.storage.clone(),
                version.clone(),
                self.events.clone(),
            )));
        }

        create_pipeline(stages, self.queue_size, self.events.clone()).await?;

        self.events.emit(SyncEvent::VersionCompleted {
            repository: version.repository.clone(),
            number: version.number,
        });
        info!(
            repository = %version.repository,
            number = version.number,
            "sync complete"
        );
        Ok(version)
    }
}
