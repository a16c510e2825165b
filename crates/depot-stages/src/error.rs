use depot_core::error::CoreError;
use depot_dl::DownloadError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum StageError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Download(#[from] DownloadError),

    #[error("Pipeline queue behind stage '{stage}' closed early")]
    #[diagnostic(
        code(depot_stages::channel_closed),
        help("A downstream stage exited before its producers finished")
    )]
    ChannelClosed { stage: &'static str },

    #[error("Pipeline stage task failed")]
    #[diagnostic(code(depot_stages::task_failed))]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error("Content unit of type '{content_type}' reached association without identity")]
    #[diagnostic(code(depot_stages::unpersisted_content))]
    UnpersistedContent { content_type: String },
}

pub type Result<T> = std::result::Result<T, StageError>;
