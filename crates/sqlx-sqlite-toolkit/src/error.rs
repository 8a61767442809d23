use serde::{Deserialize, Serialize};

/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result code for a damaged database image.
const SQLITE_CORRUPT: i64 = 11;

/// SQLite primary result code for a file that is not a database.
const SQLITE_NOTADB: i64 = 26;

/// SQLite primary result code for an attempt to write a readonly database.
const SQLITE_READONLY: i64 = 8;

/// Classification attached to every failed database call.
///
/// Workers tag each failure with one of these kinds so that the coordinator
/// can notify subscribers interested in a specific class of storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqliteErrorKind {
   /// The database file is structurally damaged.
   Corrupted,
   /// The file or filesystem does not accept writes.
   Readonly,
   /// Any other failure, including application-level query errors.
   Unknown,
}

/// Error types for SQLite toolkit operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error while applying schema migrations.
   #[error(transparent)]
   Migrate(#[from] sqlx::migrate::MigrateError),

   /// Error converting a stored or returned value to or from JSON.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// A paging cursor that already reached the end was passed back in.
   #[error("message paging iteration cannot be restarted")]
   PagingFinished,

   /// Paging run id contains characters that are unsafe to interpolate.
   #[error("invalid paging run id '{run_id}': must match [a-zA-Z0-9_]+")]
   InvalidRunId { run_id: String },
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Migrate(_) => "MIGRATION_ERROR".to_string(),
         Error::Json(_) => "JSON_ERROR".to_string(),
         Error::PagingFinished => "PAGING_FINISHED".to_string(),
         Error::InvalidRunId { .. } => "INVALID_RUN_ID".to_string(),
      }
   }

   /// Classify this error for subscriber notification.
   pub fn kind(&self) -> SqliteErrorKind {
      match self {
         Error::Sqlx(e) => classify_sqlx(e),
         Error::Migrate(sqlx::migrate::MigrateError::Execute(e)) => classify_sqlx(e),
         other => classify_message(&other.to_string()),
      }
   }
}

/// Classify an error reported by sqlx.
pub fn classify_sqlx(error: &sqlx::Error) -> SqliteErrorKind {
   match error {
      sqlx::Error::Database(db_err) => {
         // Extended result codes carry the primary code in the low byte.
         let primary = db_err
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .map(|code| code & 0xff);

         match primary {
            Some(SQLITE_CORRUPT) | Some(SQLITE_NOTADB) => SqliteErrorKind::Corrupted,
            Some(SQLITE_READONLY) => SqliteErrorKind::Readonly,
            _ => classify_message(db_err.message()),
         }
      }
      sqlx::Error::Io(e) => classify_io(e),
      other => classify_message(&other.to_string()),
   }
}

fn classify_io(error: &std::io::Error) -> SqliteErrorKind {
   if error.kind() == std::io::ErrorKind::ReadOnlyFilesystem {
      SqliteErrorKind::Readonly
   } else {
      classify_message(&error.to_string())
   }
}

/// Classify an error by its SQLite message text.
///
/// Used when no result code is available, e.g. for errors that were
/// stringified before reaching the classifier.
pub fn classify_message(message: &str) -> SqliteErrorKind {
   let lower = message.to_ascii_lowercase();
   if lower.contains("database disk image is malformed")
      || lower.contains("malformed database schema")
      || lower.contains("file is not a database")
   {
      SqliteErrorKind::Corrupted
   } else if lower.contains("readonly database") || lower.contains("read-only file system") {
      SqliteErrorKind::Readonly
   } else {
      SqliteErrorKind::Unknown
   }
}
