/// All event types emitted by a sync pipeline.
///
/// Counters are running totals within one pipeline run; a stream has no
/// predetermined total, so there is no `total` field anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An item was put on the queue behind `stage`.
    ItemEnqueued { stage: &'static str },
    /// An item was taken off the queue in front of `stage`.
    ItemDequeued { stage: &'static str },
    /// Pending artifacts matched against existing storage.
    ArtifactsDeduped { matched: u64 },
    /// One artifact download finished; `completed` is the running count.
    DownloadCompleted { url: String, completed: u64 },
    /// A batch of downloaded artifacts became durable.
    ArtifactsSaved { count: u64 },
    /// Pending content units matched against existing storage.
    ContentDeduped { matched: u64 },
    /// A batch of content units and their linkage was committed.
    ContentSaved { count: u64 },
    /// Running count of units associated into the new version.
    ContentAssociated { completed: u64 },
    /// Units removed from the new version during a mirror sync.
    ContentUnassociated { count: u64 },
    /// The pipeline finished and the version is complete.
    VersionCompleted { repository: String, number: u64 },
}
