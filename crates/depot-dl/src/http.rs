//! HTTP(S) downloader.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    downloader::{DownloadResult, Downloader, StreamWriter, Validation},
    error::{DownloadError, Result},
};

/// Attempts after the first try. Together with it: four tries total.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Downloads one URL over HTTP(S).
///
/// Retries with exponential backoff on 429/502/503/504 only; every retried
/// attempt restarts the body from byte zero. Any other status, and any
/// transport or local I/O error, is fatal immediately.
pub struct HttpDownloader {
    url: String,
    client: Client,
    semaphore: Arc<Semaphore>,
    validation: Validation,
    work_dir: PathBuf,
    auth: Option<(String, Option<String>)>,
    max_retries: u32,
}

impl HttpDownloader {
    pub(crate) fn new(
        client: Client,
        semaphore: Arc<Semaphore>,
        url: impl Into<String>,
        validation: Validation,
        work_dir: PathBuf,
        auth: Option<(String, Option<String>)>,
    ) -> Self {
        Self {
            url: url.into(),
            client,
            semaphore,
            validation,
            work_dir,
            auth,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// One full request/stream/validate cycle.
    async fn attempt(&self) -> Result<DownloadResult> {
        let mut request = self.client.get(&self.url);
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, password.as_deref());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let mut writer = StreamWriter::create(&self.work_dir)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            writer.write_chunk(&chunk?)?;
        }
        writer.finalize(&self.url, &self.validation)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn url(&self) -> &str {
        &self.url
    }

    fn semaphore(&self) -> Option<Arc<Semaphore>> {
        Some(self.semaphore.clone())
    }

    async fn fetch(&mut self) -> Result<DownloadResult> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt().await {
                Ok(result) => {
                    debug!(url = %self.url, size = result.size, "download complete");
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(
                        url = %self.url,
                        %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying download"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
