mod event;
mod sink;

use std::sync::Arc;

pub use event::*;
pub use sink::*;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.emit(SyncEvent::ArtifactsSaved {
            count: 3,
        });
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelSink::new();
        sink.emit(SyncEvent::DownloadCompleted {
            url: "https://example.com/a.rpm".to_string(),
            completed: 1,
        });
        sink.emit(SyncEvent::DownloadCompleted {
            url: "https://example.com/b.rpm".to_string(),
            completed: 2,
        });
        sink.emit(SyncEvent::ArtifactsSaved {
            count: 2,
        });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            SyncEvent::DownloadCompleted {
                completed: 2,
                ..
            }
        ));
        assert!(matches!(&events[2], SyncEvent::ArtifactsSaved { count: 2 }));
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(SyncEvent::ContentSaved {
            count: 1,
        });
    }

    #[test]
    fn test_collector_sink() {
        let sink = CollectorSink::default();
        assert!(sink.is_empty());

        sink.emit(SyncEvent::ContentAssociated {
            completed: 1,
        });
        sink.emit(SyncEvent::VersionCompleted {
            repository: "fedora".to_string(),
            number: 2,
        });

        assert_eq!(sink.len(), 2);
        let events = sink.events();
        assert!(matches!(&events[0], SyncEvent::ContentAssociated { completed: 1 }));
        assert!(matches!(
            &events[1],
            SyncEvent::VersionCompleted {
                number: 2,
                ..
            }
        ));
        assert_eq!(
            sink.count_where(|e| matches!(e, SyncEvent::VersionCompleted { .. })),
            1
        );
    }

    #[test]
    fn test_event_sink_handle() {
        let collector = Arc::new(CollectorSink::default());
        let sink: EventSinkHandle = collector.clone();
        sink.emit(SyncEvent::ItemEnqueued {
            stage: "artifact_saver",
        });
        sink.emit(SyncEvent::ItemDequeued {
            stage: "artifact_saver",
        });
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn test_event_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NullSink>();
        assert_send_sync::<ChannelSink>();
        assert_send_sync::<CollectorSink>();
    }
}
