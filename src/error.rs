use thiserror::Error;

use crate::csv::DecodeError;
use crate::models::RecordId;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("no application with id {0}")]
    UnknownRecord(RecordId),

    #[error("no record ids left; the collection already holds the largest id")]
    IdsExhausted,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("local storage error: {0}")]
    Local(#[from] rusqlite::Error),

    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored applications are unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("signed in as '{0}' but no remote store is configured")]
    NotConfigured(String),

    #[error("save worker has stopped")]
    WorkerStopped,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user id must not be empty")]
    EmptyUid,

    #[error(transparent)]
    Store(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
