//! Error types for depot-core.

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for depot model and storage operations.
#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Error while {action}")]
    #[diagnostic(code(depot::io), help("Check file permissions and disk space"))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown digest algorithm '{0}'")]
    #[diagnostic(
        code(depot::digest_algorithm),
        help("Supported algorithms: blake3, sha256, sha384, sha512")
    )]
    UnknownDigestAlgorithm(String),

    #[error("Artifact carries no digest to address storage by")]
    #[diagnostic(code(depot::no_digest))]
    MissingDigest,

    #[error("Unknown repository '{0}'")]
    #[diagnostic(code(depot::unknown_repository))]
    UnknownRepository(String),

    #[error("Repository '{repository}' has no version {number}")]
    #[diagnostic(code(depot::unknown_version))]
    UnknownVersion { repository: String, number: u64 },

    #[error("Storage operation failed: {0}")]
    #[diagnostic(code(depot::storage))]
    StorageError(String),
}

/// Trait for adding context to IO errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> std::result::Result<T, CoreError>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> std::result::Result<T, CoreError>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            CoreError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
