//! Downloader trait and the shared streaming write path.

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use depot_core::digest::{DigestSet, MultiHasher};
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;

use crate::error::{DownloadError, Result};

/// Expectations a download is validated against after the body is complete.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub expected_digests: DigestSet,
    pub expected_size: Option<u64>,
}

/// Outcome of one successful, validated download.
///
/// `path` points at a temporary file; moving it into content-addressed
/// storage is the saver's job, not the downloader's.
#[derive(Debug)]
pub struct DownloadResult {
    pub url: String,
    pub path: PathBuf,
    pub digests: DigestSet,
    pub size: u64,
}

/// Fetches one URL while computing digests and a byte count in-stream.
#[async_trait]
pub trait Downloader: Send {
    fn url(&self) -> &str;

    /// Concurrency limiter shared with every downloader built by the same
    /// factory. `None` means unlimited.
    fn semaphore(&self) -> Option<Arc<Semaphore>> {
        None
    }

    /// The protocol-specific fetch, including any internal retries.
    async fn fetch(&mut self) -> Result<DownloadResult>;

    /// Acquires a slot on the shared limiter, then fetches. The permit is
    /// scoped to this call and released on every exit path.
    async fn run(&mut self) -> Result<DownloadResult> {
        let permit = match self.semaphore() {
            Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|_| {
                DownloadError::Shutdown {
                    url: self.url().to_string(),
                }
            })?),
            None => None,
        };
        let result = self.fetch().await;
        drop(permit);
        result
    }
}

/// Streams chunks into a temp file while hashing every supported algorithm.
///
/// All algorithms are always computed so that whatever subset of digests
/// the caller expected can be validated, and dedup later has the full set.
pub(crate) struct StreamWriter {
    file: NamedTempFile,
    hasher: MultiHasher,
}

impl StreamWriter {
    pub(crate) fn create(work_dir: &Path) -> Result<Self> {
        Ok(Self {
            file: NamedTempFile::new_in(work_dir)?,
            hasher: MultiHasher::all(),
        })
    }

    pub(crate) fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk)?;
        self.hasher.update(chunk);
        Ok(())
    }

    /// Flushes, fsyncs and validates. On success the temp file is kept and
    /// its path returned; on any failure it is deleted with the error.
    pub(crate) fn finalize(mut self, url: &str, validation: &Validation) -> Result<DownloadResult> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;
        let (digests, size) = self.hasher.finish();

        for (algorithm, expected) in &validation.expected_digests {
            if expected.is_empty() {
                continue;
            }
            let actual = &digests[algorithm];
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(DownloadError::DigestMismatch {
                    url: url.to_string(),
                    algorithm: *algorithm,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        if let Some(expected) = validation.expected_size {
            if expected != size {
                return Err(DownloadError::SizeMismatch {
                    url: url.to_string(),
                    expected,
                    actual: size,
                });
            }
        }

        let path = self
            .file
            .into_temp_path()
            .keep()
            .map_err(|err| DownloadError::Io(err.error))?;
        Ok(DownloadResult {
            url: url.to_string(),
            path,
            digests,
            size,
        })
    }
}
