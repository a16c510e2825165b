use error::CoreError;

pub mod digest;
pub mod error;
pub mod models;
pub mod storage;

pub type CoreResult<T> = std::result::Result<T, CoreError>;
