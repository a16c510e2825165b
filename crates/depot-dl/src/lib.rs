pub mod downloader;
pub mod error;
pub mod factory;
pub mod file;
pub mod http;

pub use downloader::{DownloadResult, Downloader, Validation};
pub use error::{DownloadError, Result};
pub use factory::{DownloaderConstructor, DownloaderFactory};
pub use file::FileDownloader;
pub use http::HttpDownloader;
