use thiserror::Error;

use crate::job::JobId;

/// Error returned by handlers. A handler failure is treated as fatal to the
/// pool, so the type is deliberately wide open.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ConveyorError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON encoding error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("Handler error: {0}")]
    Handler(HandlerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConveyorError>;
