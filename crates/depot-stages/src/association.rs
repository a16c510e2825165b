//! Association stages: reconcile a repository version's membership.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use depot_core::{
    models::{ContentId, RepositoryVersion},
    storage::Storage,
};
use depot_events::{EventSinkHandle, SyncEvent};
use tracing::debug;

use crate::{
    api::{ItemReceiver, ItemSender, Stage},
    error::{Result, StageError},
    models::{PipelineItem, RemovalSet},
};

/// Associates streamed-in units with the version under construction.
///
/// On start, snapshots the version's full membership as the baseline. A unit
/// whose natural key is in the baseline is crossed off and not re-added; any
/// other unit is accumulated and added per type once input exhausts. What
/// remains of the baseline at that point was not declared by this sync and
/// is forwarded as removal sets for the unassociation stage.
///
/// The baseline is owned by this stage's task alone.
pub struct ContentAssociation {
    storage: Arc<dyn Storage>,
    version: RepositoryVersion,
    events: EventSinkHandle,
}

impl ContentAssociation {
    pub fn new(
        storage: Arc<dyn Storage>,
        version: RepositoryVersion,
        events: EventSinkHandle,
    ) -> Self {
        Self {
            storage,
            version,
            events,
        }
    }
}

#[async_trait]
impl Stage for ContentAssociation {
    fn name(&self) -> &'static str {
        "content_association"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        let mut baseline = self.storage.version_membership(&self.version).await?;
        let mut to_add: HashMap<String, HashSet<ContentId>> = HashMap::new();
        let mut completed: u64 = 0;

        while let Some(item) = rx.recv().await {
            let dc = match item {
                PipelineItem::Content(dc) => dc,
                removal => {
                    tx.send(removal).await?;
                    continue;
                }
            };
            let id = dc.content_id.ok_or_else(|| {
                StageError::UnpersistedContent {
                    content_type: dc.content.content_type.clone(),
                }
            })?;

            let known = baseline
                .get_mut(&dc.content.content_type)
                .and_then(|keys| keys.remove(&dc.content.natural_key));
            if known.is_none() {
                to_add
                    .entry(dc.content.content_type.clone())
                    .or_default()
                    .insert(id);
            }
            completed += 1;
            self.events.emit(SyncEvent::ContentAssociated { completed });
        }

        for (content_type, ids) in to_add {
            let added = self
                .storage
                .add_content(&self.version, &content_type, &ids)
                .await?;
            debug!(content_type, added, "associated new content");
        }

        for (content_type, keys) in baseline {
            if keys.is_empty() {
                continue;
            }
            tx.send(PipelineItem::Removal(RemovalSet {
                content_type,
                ids: keys.into_values().collect(),
            }))
            .await?;
        }
        Ok(())
    }
}

/// Drops each received removal set from the version, making the sync a
/// mirror. Leaving this stage out keeps undeclared content, making the sync
/// additive.
pub struct ContentUnassociation {
    storage: Arc<dyn Storage>,
    version: RepositoryVersion,
    events: EventSinkHandle,
}

impl ContentUnassociation {
    pub fn new(
        storage: Arc<dyn Storage>,
        version: RepositoryVersion,
        events: EventSinkHandle,
    ) -> Self {
        Self {
            storage,
            version,
            events,
        }
    }
}

#[async_trait]
impl Stage for ContentUnassociation {
    fn name(&self) -> &'static str {
        "content_unassociation"
    }

    async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
        while let Some(item) = rx.recv().await {
            if let PipelineItem::Removal(set) = &item {
                let count = self
                    .storage
                    .remove_content(&self.version, &set.content_type, &set.ids)
                    .await?;
                self.events.emit(SyncEvent::ContentUnassociated { count });
            }
            tx.send(item).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use depot_core::{
        models::{ContentUnit, NaturalKey},
        storage::{ContentToSave, MemoryStorage},
    };
    use depot_events::{CollectorSink, NullSink};
    use tokio::sync::mpsc;

    use crate::models::DeclarativeContent;

    use super::*;

    async fn run_stage(
        stage: Box<dyn Stage>,
        items: Vec<PipelineItem>,
    ) -> Result<Vec<PipelineItem>> {
        let (in_tx, in_rx) = mpsc::channel(items.len().max(1));
        for item in items {
            in_tx.send(item).await.unwrap();
        }
        drop(in_tx);
        let (out_tx, mut out_rx) = mpsc::channel(64);

        let events: EventSinkHandle = Arc::new(NullSink);
        let rx = ItemReceiver::new(Some(in_rx), "test", events.clone());
        let tx = ItemSender::new(Some(out_tx), "test", events);
        stage.run(rx, tx).await?;

        let mut out = Vec::new();
        while let Ok(item) = out_rx.try_recv() {
            out.push(item);
        }
        Ok(out)
    }

    fn unit(name: &str) -> ContentUnit {
        ContentUnit::new("rpm", NaturalKey::new().with("name", name))
    }

    async fn seed(storage: &MemoryStorage, names: &[&str]) -> Vec<ContentId> {
        let rows = names
            .iter()
            .map(|name| {
                ContentToSave {
                    unit: unit(name),
                    links: vec![],
                }
            })
            .collect();
        storage
            .save_content_batch(rows)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect()
    }

    fn saved(name: &str, id: ContentId) -> PipelineItem {
        let mut dc = DeclarativeContent::new(unit(name), Vec::new());
        dc.content_id = Some(id);
        PipelineItem::Content(dc)
    }

    /// Baseline {a,b,c}, declared {b,c,d}: association keeps b and c, adds
    /// d, and emits {a} as a removal set.
    #[tokio::test]
    async fn test_association_reconciles_against_baseline() {
        let storage = Arc::new(MemoryStorage::new());
        let ids = seed(&storage, &["a", "b", "c", "d"]).await;

        let v1 = storage.create_version("repo").await.unwrap();
        storage
            .add_content(&v1, "rpm", &ids[..3].iter().copied().collect())
            .await
            .unwrap();
        let v2 = storage.create_version("repo").await.unwrap();

        let sink = Arc::new(CollectorSink::default());
        let stage = Box::new(ContentAssociation::new(storage.clone(), v2.clone(), sink.clone()));
        let items = vec![
            saved("b", ids[1]),
            saved("c", ids[2]),
            saved("d", ids[3]),
        ];
        let out = run_stage(stage, items).await.unwrap();

        assert_eq!(out.len(), 1);
        let PipelineItem::Removal(set) = &out[0] else { panic!("expected removal set") };
        assert_eq!(set.content_type, "rpm");
        assert_eq!(set.ids, HashSet::from([ids[0]]));

        // membership is old ∪ new until unassociation runs
        let membership = storage.version_membership(&v2).await.unwrap();
        assert_eq!(membership["rpm"].len(), 4);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, SyncEvent::ContentAssociated { completed: 3 })));
    }

    #[tokio::test]
    async fn test_association_rejects_units_without_identity() {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_version("repo").await.unwrap();
        let version = RepositoryVersion {
            repository: "repo".to_string(),
            number: 1,
        };

        let stage = Box::new(ContentAssociation::new(storage, version, Arc::new(NullSink)));
        let items = vec![PipelineItem::Content(DeclarativeContent::new(
            unit("ghost"),
            Vec::new(),
        ))];
        let err = run_stage(stage, items).await.unwrap_err();
        assert!(matches!(err, StageError::UnpersistedContent { .. }));
    }

    #[tokio::test]
    async fn test_unassociation_removes_and_forwards() {
        let storage = Arc::new(MemoryStorage::new());
        let ids = seed(&storage, &["a"]).await;
        let version = storage.create_version("repo").await.unwrap();
        storage
            .add_content(&version, "rpm", &ids.iter().copied().collect())
            .await
            .unwrap();

        let sink = Arc::new(CollectorSink::default());
        let stage = Box::new(ContentUnassociation::new(
            storage.clone(),
            version.clone(),
            sink.clone(),
        ));
        let items = vec![PipelineItem::Removal(RemovalSet {
            content_type: "rpm".to_string(),
            ids: ids.iter().copied().collect(),
        })];
        let out = run_stage(stage, items).await.unwrap();

        assert_eq!(out.len(), 1);
        let membership = storage.version_membership(&version).await.unwrap();
        assert!(membership.get("rpm").map_or(true, |keys| keys.is_empty()));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, SyncEvent::ContentUnassociated { count: 1 })));
    }
}
