pub mod api;
pub mod artifact;
pub mod association;
pub mod content;
pub mod error;
pub mod models;
pub mod version;

pub use api::{
    create_pipeline, ItemReceiver, ItemSender, Stage, DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_SIZE,
};
pub use error::{Result, StageError};
pub use models::{DeclarativeArtifact, DeclarativeContent, PipelineItem, RemovalSet};
pub use version::{DeclarativeVersion, FirstStage, SyncMode};
