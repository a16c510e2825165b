//! In-flight pipeline representations prior to persistence.

use std::{collections::HashSet, sync::Arc};

use depot_core::models::{Artifact, ContentId, ContentUnit};
use depot_dl::{DownloaderFactory, Validation};

/// Describes how to obtain one artifact of a content unit.
///
/// `artifact` may be in any state. A pending artifact still needs its bytes;
/// the download stage fetches them through `remote` using `url`.
#[derive(Debug, Clone)]
pub struct DeclarativeArtifact {
    pub artifact: Artifact,
    pub url: String,
    pub relative_path: String,
    pub remote: Arc<DownloaderFactory>,
}

impl DeclarativeArtifact {
    pub fn new(
        artifact: Artifact,
        url: impl Into<String>,
        relative_path: impl Into<String>,
        remote: Arc<DownloaderFactory>,
    ) -> Self {
        Self {
            artifact,
            url: url.into(),
            relative_path: relative_path.into(),
            remote,
        }
    }

    /// Expectations a fresh download of this artifact is validated against.
    pub fn validation(&self) -> Validation {
        match &self.artifact {
            Artifact::Pending {
                expected_digests,
                expected_size,
            } => Validation {
                expected_digests: expected_digests.clone(),
                expected_size: *expected_size,
            },
            _ => Validation::default(),
        }
    }
}

/// One content unit plus the artifacts it references. The artifact list may
/// be empty for metadata-only units.
#[derive(Debug, Clone)]
pub struct DeclarativeContent {
    pub content: ContentUnit,
    /// Durable identity, set once the unit is matched or saved.
    pub content_id: Option<ContentId>,
    pub artifacts: Vec<DeclarativeArtifact>,
}

impl DeclarativeContent {
    pub fn new(content: ContentUnit, artifacts: Vec<DeclarativeArtifact>) -> Self {
        Self {
            content,
            content_id: None,
            artifacts,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.content_id.is_some()
    }
}

/// Units of one type to drop from the version under construction.
#[derive(Debug, Clone)]
pub struct RemovalSet {
    pub content_type: String,
    pub ids: HashSet<ContentId>,
}

/// Everything that travels on pipeline queues.
///
/// Stages act on the variants they understand and forward the rest
/// unchanged.
#[derive(Debug, Clone)]
pub enum PipelineItem {
    Content(DeclarativeContent),
    Removal(RemovalSet),
}
