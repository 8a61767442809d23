//! Error types for sqlx-sqlite-worker

use sqlx_sqlite_toolkit::{SqliteErrorKind, classify_message, classify_sqlx};
use thiserror::Error;

/// Errors that may occur while a worker handles a request
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when creating or removing database files. Standard library IO
   /// errors are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Error raised while executing a catalog method or migration
   #[error(transparent)]
   Toolkit(#[from] sqlx_sqlite_toolkit::Error),

   /// Error encoding a call result
   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),

   /// `init` was received by a worker that already has an open database
   #[error("Worker is already initialized")]
   AlreadyInitialized,

   /// A call arrived before `init` succeeded
   #[error("Worker is not initialized")]
   NotInitialized,

   /// A write call was routed to a replica
   #[error("Replica worker refused write call '{method}'")]
   ReplicaWrite { method: &'static str },
}

impl Error {
   /// Machine-readable code sent to the coordinator as the error name.
   pub fn error_code(&self) -> String {
      match self {
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Toolkit(e) => e.error_code(),
         Error::Json(_) => "JSON_ERROR".to_string(),
         Error::AlreadyInitialized => "ALREADY_INITIALIZED".to_string(),
         Error::NotInitialized => "NOT_INITIALIZED".to_string(),
         Error::ReplicaWrite { .. } => "REPLICA_WRITE".to_string(),
      }
   }

   /// Classification reported alongside the error.
   pub fn kind(&self) -> SqliteErrorKind {
      match self {
         Error::Sqlx(e) => classify_sqlx(e),
         Error::Toolkit(e) => e.kind(),
         Error::Io(e) if e.kind() == std::io::ErrorKind::ReadOnlyFilesystem => {
            SqliteErrorKind::Readonly
         }
         other => classify_message(&other.to_string()),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
