//! Stage trait, bounded pipeline queues and the pipeline runner.
//!
//! Stages communicate only through fixed-capacity channels. Channel closure
//! is the termination sentinel: a stage that returns drops its sender, which
//! the next stage observes as end of input. Exactly one sentinel per queue,
//! with no in-band marker value.

use std::time::Duration;

use async_trait::async_trait;
use depot_events::{EventSinkHandle, SyncEvent};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::debug;

use crate::{
    error::{Result, StageError},
    models::PipelineItem,
};

/// Capacity of each inter-stage queue.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Minimum batch size stages aim for when draining their input.
pub const DEFAULT_BATCH_SIZE: usize = 50;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Sending half of an inter-stage queue.
///
/// The last stage holds a closed sender; its sends succeed and discard.
pub struct ItemSender {
    tx: Option<mpsc::Sender<PipelineItem>>,
    stage: &'static str,
    events: EventSinkHandle,
}

impl ItemSender {
    pub(crate) fn new(
        tx: Option<mpsc::Sender<PipelineItem>>,
        stage: &'static str,
        events: EventSinkHandle,
    ) -> Self {
        Self { tx, stage, events }
    }

    /// Puts one item on the queue, blocking while it is full.
    pub async fn send(&self, item: PipelineItem) -> Result<()> {
        if let Some(tx) = &self.tx {
            tx.send(item).await.map_err(|_| {
                StageError::ChannelClosed {
                    stage: self.stage,
                }
            })?;
            self.events.emit(SyncEvent::ItemEnqueued {
                stage: self.stage,
            });
        }
        Ok(())
    }
}

/// Receiving half of an inter-stage queue.
///
/// The first stage holds a closed receiver; its input is empty from the
/// start.
pub struct ItemReceiver {
    rx: Option<mpsc::Receiver<PipelineItem>>,
    stage: &'static str,
    events: EventSinkHandle,
}

impl ItemReceiver {
    pub(crate) fn new(
        rx: Option<mpsc::Receiver<PipelineItem>>,
        stage: &'static str,
        events: EventSinkHandle,
    ) -> Self {
        Self { rx, stage, events }
    }

    /// Takes the next item, or `None` once the upstream stage has finished.
    pub async fn recv(&mut self) -> Option<PipelineItem> {
        let rx = self.rx.as_mut()?;
        let item = rx.recv().await?;
        self.events.emit(SyncEvent::ItemDequeued {
            stage: self.stage,
        });
        Some(item)
    }

    fn try_next(&mut self) -> Option<PipelineItem> {
        let rx = self.rx.as_mut()?;
        let item = rx.try_recv().ok()?;
        self.events.emit(SyncEvent::ItemDequeued {
            stage: self.stage,
        });
        Some(item)
    }

    /// Collects the next batch: blocks until `minsize` items arrive (or the
    /// stream ends), then greedily drains whatever else is already queued.
    /// `None` once the stream has ended and nothing is left.
    pub async fn batches(&mut self, minsize: usize) -> Option<Vec<PipelineItem>> {
        let mut batch = Vec::new();
        while batch.len() < minsize {
            match self.recv().await {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        while let Some(item) = self.try_next() {
            batch.push(item);
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// One pipeline stage.
///
/// `run` consumes `rx` until it yields `None`, sends results on `tx`, and
/// returns. Dropping `tx` on return is the downstream sentinel.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, rx: ItemReceiver, tx: ItemSender) -> Result<()>;
}

/// Wires `stages` with bounded queues and runs them to completion.
///
/// All stages run concurrently as independent tasks. The first stage gets an
/// empty input; the last stage's output is discarded. On the first stage
/// error every sibling task is aborted, cooperative unwinding gets a bounded
/// grace period, and the original error is returned.
///
/// Queue capacity has a floor of one slot; `maxsize = 0` is treated as 1.
pub async fn create_pipeline(
    stages: Vec<Box<dyn Stage>>,
    maxsize: usize,
    events: EventSinkHandle,
) -> Result<()> {
    let maxsize = maxsize.max(1);
    let count = stages.len();
    let mut set: JoinSet<Result<()>> = JoinSet::new();
    let mut pending_rx: Option<mpsc::Receiver<PipelineItem>> = None;

    for (position, stage) in stages.into_iter().enumerate() {
        let name = stage.name();
        let rx = ItemReceiver::new(pending_rx.take(), name, events.clone());
        let tx = if position + 1 == count {
            ItemSender::new(None, name, events.clone())
        } else {
            let (tx, next_rx) = mpsc::channel(maxsize);
            pending_rx = Some(next_rx);
            ItemSender::new(Some(tx), name, events.clone())
        };
        debug!(stage = name, position, "starting pipeline stage");
        set.spawn(stage.run(rx, tx));
    }

    while let Some(joined) = set.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => continue,
            Err(err) => Err(StageError::TaskFailed(err)),
        };
        if let Err(err) = result {
            set.abort_all();
            let drain = async {
                while set.join_next().await.is_some() {}
            };
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, drain).await;
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    };

    use depot_core::error::CoreError;
    use depot_events::{CollectorSink, NullSink};

    use crate::models::RemovalSet;

    use super::*;

    fn removal(id: u64) -> PipelineItem {
        PipelineItem::Removal(RemovalSet {
            content_type: "rpm".to_string(),
            ids: HashSet::from([id]),
        })
    }

    struct Producer {
        count: u64,
    }

    #[async_trait]
    impl Stage for Producer {
        fn name(&self) -> &'static str {
            "producer"
        }

        async fn run(self: Box<Self>, _rx: ItemReceiver, tx: ItemSender) -> Result<()> {
            for id in 0..self.count {
                tx.send(removal(id)).await?;
            }
            Ok(())
        }
    }

    struct Forwarder {
        seen: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Stage for Forwarder {
        fn name(&self) -> &'static str {
            "forwarder"
        }

        async fn run(self: Box<Self>, mut rx: ItemReceiver, tx: ItemSender) -> Result<()> {
            while let Some(item) = rx.recv().await {
                self.seen.fetch_add(1, Ordering::SeqCst);
                tx.send(item).await?;
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Stage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(self: Box<Self>, mut rx: ItemReceiver, _tx: ItemSender) -> Result<()> {
            let _ = rx.recv().await;
            Err(CoreError::StorageError("boom".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_pipeline_runs_to_completion() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::new(CollectorSink::default());
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Producer { count: 5 }),
            Box::new(Forwarder { seen: seen.clone() }),
            Box::new(Forwarder {
                seen: Arc::new(AtomicU64::new(0)),
            }),
        ];
        create_pipeline(stages, 2, sink.clone()).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 5);
        let enqueued =
            sink.count_where(|e| matches!(e, SyncEvent::ItemEnqueued { stage: "producer" }));
        assert_eq!(enqueued, 5);
    }

    #[tokio::test]
    async fn test_stage_error_aborts_pipeline() {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Producer { count: 1 }),
            Box::new(Failing),
            Box::new(Forwarder {
                seen: Arc::new(AtomicU64::new(0)),
            }),
        ];
        let err = create_pipeline(stages, 2, Arc::new(NullSink))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Core(CoreError::StorageError(_))));
    }

    #[tokio::test]
    async fn test_zero_queue_size_gets_a_one_slot_floor() {
        let seen = Arc::new(AtomicU64::new(0));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Producer { count: 4 }),
            Box::new(Forwarder { seen: seen.clone() }),
        ];
        create_pipeline(stages, 0, Arc::new(NullSink)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_single_stage_pipeline() {
        let sink = Arc::new(CollectorSink::default());
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Producer { count: 3 })];
        // with no queue behind it, the producer's sends discard
        create_pipeline(stages, 2, sink.clone()).await.unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_batches_blocks_for_minsize_then_drains() {
        let (tx, rx) = mpsc::channel(10);
        let mut receiver = ItemReceiver::new(Some(rx), "test", Arc::new(NullSink));
        for id in 0..3 {
            tx.send(removal(id)).await.unwrap();
        }
        drop(tx);

        let batch = receiver.batches(2).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(receiver.batches(2).await.is_none());
    }

    #[tokio::test]
    async fn test_batches_yields_short_batch_at_end_of_stream() {
        let (tx, rx) = mpsc::channel(10);
        let mut receiver = ItemReceiver::new(Some(rx), "test", Arc::new(NullSink));
        tx.send(removal(0)).await.unwrap();
        drop(tx);

        let batch = receiver.batches(50).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_batches_waits_for_late_items() {
        let (tx, rx) = mpsc::channel(10);
        let mut receiver = ItemReceiver::new(Some(rx), "test", Arc::new(NullSink));
        tokio::spawn(async move {
            tx.send(removal(0)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(removal(1)).await.unwrap();
        });

        let batch = receiver.batches(2).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_first_stage_has_empty_input() {
        let mut receiver = ItemReceiver::new(None, "first", Arc::new(NullSink));
        assert!(receiver.recv().await.is_none());
        assert!(receiver.batches(10).await.is_none());
    }
}
