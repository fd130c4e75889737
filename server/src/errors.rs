use thiserror::Error;
use uuid::Uuid;

use crate::service::sync::RoomFailure;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Represents an SQL error.
    #[error("SQLx error")]
    Sqlx { source: sqlx::Error },

    /// A recording name was empty after trimming.
    #[error("Recording name must not be blank")]
    BlankName,

    /// An ID in the request could not be parsed.
    #[error("Invalid ID: {0}")]
    InvalidId(String),

    /// A request body could not be parsed.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A value read from the store was not one this program writes.
    #[error("Invalid visibility in store: {0}")]
    InvalidVisibility(String),

    /// No recording has the given external ID.
    #[error("No recording with record ID {0}")]
    NonExistentRecording(String),

    /// No row has the given internal ID.
    #[error("No recording with ID {0}")]
    NonExistentId(Uuid),

    /// Another recording already uses the external ID.
    #[error("Record ID already exists")]
    RecordIdAlreadyExists,

    /// Another room already uses the meeting ID.
    #[error("Meeting ID already exists")]
    MeetingIdAlreadyExists,

    /// A call to the conferencing server failed.
    #[error("Conferencing server request failed: {source}")]
    Remote { source: RemoteError },

    /// One or more rooms could not be synchronized.
    #[error("Synchronization failed for {} room(s)", .failures.len())]
    PartialSync { failures: Vec<RoomFailure> },

    /// No resync job has the given ID (or it has been forgotten).
    #[error("Unknown resync job {0}")]
    UnknownSyncJob(Uuid),

    /// The resync queue has no room for another job.
    #[error("Resync queue is full")]
    SyncQueueFull,

    /// The resync worker has stopped.
    #[error("Resync queue is closed")]
    SyncQueueClosed,

    /// A spawned task panicked or was cancelled.
    #[error("Task failed")]
    TaskFailed { source: tokio::task::JoinError },
}

impl From<RemoteError> for BackendError {
    fn from(source: RemoteError) -> Self {
        BackendError::Remote { source }
    }
}

/// Enumerates errors returned by the conferencing subsystem.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request could not be sent, timed out, or got a non-success
    /// HTTP status.
    #[error("transport error: {source}")]
    Transport { source: reqwest::Error },

    /// The server answered with a `FAILED` return code.
    #[error("{message_key}: {message}")]
    Failed { message_key: String, message: String },

    /// The response body could not be parsed.
    #[error("malformed response: {source}")]
    Malformed { source: quick_xml::DeError },

    /// The server could not be reached at all.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(source: reqwest::Error) -> Self {
        RemoteError::Transport { source }
    }
}
