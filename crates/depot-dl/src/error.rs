use depot_core::digest::DigestAlgorithm;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DownloadError {
    #[error("Invalid URL: {url}")]
    #[diagnostic(code(depot_dl::invalid_url))]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Not a local file path: {url}")]
    #[diagnostic(code(depot_dl::invalid_file_path))]
    InvalidFilePath { url: String },

    #[error("Unsupported URL scheme '{scheme}': {url}")]
    #[diagnostic(
        code(depot_dl::unsupported_url),
        help("Register a downloader for this scheme on the factory")
    )]
    UnsupportedUrl { scheme: String, url: String },

    #[error("Invalid header '{name}' configured on remote")]
    #[diagnostic(code(depot_dl::invalid_header))]
    InvalidHeader { name: String },

    #[error("Remote '{name}' configures a client certificate without its key, or a key without its certificate")]
    #[diagnostic(
        code(depot_dl::incomplete_identity),
        help("Set both client_cert_pem and client_key_pem, or neither")
    )]
    IncompleteIdentity { name: String },

    #[error(transparent)]
    #[diagnostic(
        code(depot_dl::network),
        help("Check your internet connection or try again later")
    )]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(depot_dl::http_status))]
    HttpStatus { status: u16, url: String },

    #[error("{algorithm} mismatch for {url}: expected {expected}, got {actual}")]
    #[diagnostic(
        code(depot_dl::digest_mismatch),
        help("The upstream file differs from its declared metadata")
    )]
    DigestMismatch {
        url: String,
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {url}: expected {expected} bytes, got {actual}")]
    #[diagnostic(code(depot_dl::size_mismatch))]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    #[diagnostic(code(depot_dl::io))]
    Io(#[from] std::io::Error),

    #[error("Concurrency limiter closed before {url} could start")]
    #[diagnostic(code(depot_dl::shutdown))]
    Shutdown { url: String },
}

impl DownloadError {
    /// Whether the downloader may retry after this error.
    ///
    /// Only throttling and upstream-gateway statuses qualify. Validation
    /// failures, local I/O errors and every other HTTP status are fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => {
                matches!(*status, 429 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for status in [429u16, 502, 503, 504] {
            let err = DownloadError::HttpStatus {
                status,
                url: "https://example.com/x".to_string(),
            };
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
        for status in [400u16, 401, 403, 404, 500] {
            let err = DownloadError::HttpStatus {
                status,
                url: "https://example.com/x".to_string(),
            };
            assert!(!err.is_retryable(), "status {status} must be fatal");
        }
    }

    #[test]
    fn test_validation_errors_are_fatal() {
        let digest = DownloadError::DigestMismatch {
            url: "https://example.com/x".to_string(),
            algorithm: DigestAlgorithm::Sha256,
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(!digest.is_retryable());
        let msg = format!("{}", digest);
        assert!(msg.contains("sha256"));

        let size = DownloadError::SizeMismatch {
            url: "https://example.com/x".to_string(),
            expected: 3,
            actual: 4,
        };
        assert!(!size.is_retryable());
        assert!(format!("{}", size).contains("expected 3 bytes"));
    }

    #[test]
    fn test_unsupported_url_display() {
        let err = DownloadError::UnsupportedUrl {
            scheme: "ftp".to_string(),
            url: "ftp://example.com/x".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ftp"));
    }
}
