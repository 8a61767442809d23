use serde::{Deserialize, Serialize};
use sqlx_sqlite_toolkit::SqliteErrorKind;
use sqlx_sqlite_worker::SerializedError;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by a worker for one call.
///
/// The message is prefixed with the label of the request that failed
/// (`read:getItem`, `write:putItem`, `init`, ...). The same value is handed to
/// the caller and to every matching error subscriber, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct SqlError {
   /// Error code assigned by the worker
   pub name: String,
   pub message: String,
   pub stack: Option<String>,
   pub kind: SqliteErrorKind,
}

impl SqlError {
   /// Rebuild a worker-reported error, prefixing message and stack with `label`.
   pub fn new(label: &str, error: SerializedError, kind: Option<SqliteErrorKind>) -> Self {
      Self {
         name: error.name,
         message: format!("{label}: {}", error.message),
         stack: error.stack.map(|stack| format!("{label}: {stack}")),
         kind: kind.unwrap_or(SqliteErrorKind::Unknown),
      }
   }
}

/// Errors returned by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The worker reported a failure for this call.
   #[error(transparent)]
   Sql(#[from] SqlError),

   /// The call was made before `initialize` completed, after it failed, or
   /// after the coordinator was closed.
   #[error("coordinator is not initialized")]
   Uninitialized,

   /// `initialize` was called more than once.
   #[error("coordinator is already initialized")]
   AlreadyInitialized,

   #[error("write access is already paused")]
   WriteAccessAlreadyPaused,

   #[error("write access is not paused")]
   WriteAccessNotPaused,

   /// The coordinator was built without any worker.
   #[error("worker pool is empty")]
   EmptyPool,

   /// A response arrived for a sequence number with no pending request.
   ///
   /// Once this happens the coordinator refuses every further call.
   #[error("unexpected response for unknown seq {seq}")]
   ProtocolDesync { seq: u32 },

   /// The worker stopped before answering.
   #[error("worker {worker} exited")]
   WorkerExited { worker: usize },

   /// A worker result did not decode into the expected type.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// Worker failures keep the code the worker assigned.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sql(e) => e.name.clone(),
         Error::Uninitialized => "UNINITIALIZED".to_string(),
         Error::AlreadyInitialized => "ALREADY_INITIALIZED".to_string(),
         Error::WriteAccessAlreadyPaused => "WRITE_ACCESS_ALREADY_PAUSED".to_string(),
         Error::WriteAccessNotPaused => "WRITE_ACCESS_NOT_PAUSED".to_string(),
         Error::EmptyPool => "EMPTY_POOL".to_string(),
         Error::ProtocolDesync { .. } => "PROTOCOL_DESYNC".to_string(),
         Error::WorkerExited { .. } => "WORKER_EXITED".to_string(),
         Error::Json(_) => "JSON_ERROR".to_string(),
      }
   }

   /// Classification of a worker-reported failure.
   pub fn kind(&self) -> Option<SqliteErrorKind> {
      match self {
         Error::Sql(e) => Some(e.kind),
         _ => None,
      }
   }

   /// Whether the error means an internal invariant has been broken and the
   /// coordinator should not be trusted with further calls.
   pub fn is_fatal(&self) -> bool {
      matches!(
         self,
         Error::ProtocolDesync { .. }
            | Error::WriteAccessAlreadyPaused
            | Error::WriteAccessNotPaused
      )
   }
}
