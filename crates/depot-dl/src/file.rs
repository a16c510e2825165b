//! `file://` downloader.
//!
//! Local files go through the same streaming digest and validation path as
//! HTTP downloads, so every artifact entering the pipeline is measured the
//! same way regardless of scheme.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::{io::AsyncReadExt, sync::Semaphore};
use tracing::debug;
use url::Url;

use crate::{
    downloader::{DownloadResult, Downloader, StreamWriter, Validation},
    error::{DownloadError, Result},
};

pub struct FileDownloader {
    url: String,
    path: PathBuf,
    semaphore: Option<Arc<Semaphore>>,
    validation: Validation,
    work_dir: PathBuf,
}

impl FileDownloader {
    pub(crate) fn new(
        url: impl Into<String>,
        semaphore: Option<Arc<Semaphore>>,
        validation: Validation,
        work_dir: PathBuf,
    ) -> Result<Self> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|source| {
            DownloadError::InvalidUrl {
                url: url.clone(),
                source,
            }
        })?;
        let path = parsed.to_file_path().map_err(|_| {
            DownloadError::InvalidFilePath {
                url: url.clone(),
            }
        })?;
        Ok(Self {
            url,
            path,
            semaphore,
            validation,
            work_dir,
        })
    }
}

#[async_trait]
impl Downloader for FileDownloader {
    fn url(&self) -> &str {
        &self.url
    }

    fn semaphore(&self) -> Option<Arc<Semaphore>> {
        self.semaphore.clone()
    }

    async fn fetch(&mut self) -> Result<DownloadResult> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let mut writer = StreamWriter::create(&self.work_dir)?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_chunk(&buf[..n])?;
        }
        let result = writer.finalize(&self.url, &self.validation)?;
        debug!(url = %self.url, size = result.size, "file copy complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use depot_core::digest::{DigestAlgorithm, DigestSet};

    use super::*;

    #[tokio::test]
    async fn test_file_download_round_trip() {
        let src_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("payload.bin");
        std::fs::File::create(&src)
            .unwrap()
            .write_all(b"hello world\n")
            .unwrap();
        let url = Url::from_file_path(&src).unwrap().to_string();

        let mut dl =
            FileDownloader::new(&url, None, Validation::default(), work_dir.path().into()).unwrap();
        let result = dl.run().await.unwrap();

        assert_eq!(result.size, 12);
        assert_eq!(
            result.digests[&DigestAlgorithm::Blake3],
            "dc5a4edb8240b018124052c330270696f96771a63b45250a5c17d3000e823355"
        );
        assert!(result.path.starts_with(work_dir.path()));
    }

    #[tokio::test]
    async fn test_file_download_validates_expectations() {
        let src_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("payload.bin");
        std::fs::File::create(&src)
            .unwrap()
            .write_all(b"abc")
            .unwrap();
        let url = Url::from_file_path(&src).unwrap().to_string();

        let mut expected_digests = DigestSet::new();
        expected_digests.insert(DigestAlgorithm::Sha256, "00".repeat(32));
        let mut dl = FileDownloader::new(
            &url,
            None,
            Validation {
                expected_digests,
                expected_size: None,
            },
            work_dir.path().into(),
        )
        .unwrap();

        let err = dl.run().await.unwrap_err();
        assert!(matches!(err, DownloadError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_source_file_is_fatal_io() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut dl = FileDownloader::new(
            "file:///definitely/not/here",
            None,
            Validation::default(),
            work_dir.path().into(),
        )
        .unwrap();
        let err = dl.run().await.unwrap_err();
        assert!(matches!(err, DownloadError::Io(_)));
    }

    #[test]
    fn test_non_file_path_rejected() {
        let result = FileDownloader::new(
            "file://remote-host/share/x",
            None,
            Validation::default(),
            PathBuf::from("/tmp"),
        );
        assert!(matches!(result, Err(DownloadError::InvalidFilePath { .. })));
    }
}
