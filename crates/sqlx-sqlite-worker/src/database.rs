//! The single SQLite connection owned by a worker

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use sqlx_sqlite_toolkit::{ReadableMethod, WritableMethod, update_schema};
use tracing::debug;

use crate::{InitOptions, Result};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Suffixes of the side files SQLite keeps next to a WAL-mode database.
const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Open SQLite connection of one worker.
///
/// ## Primary vs. replica
///
/// - **Primary**: creates the file if missing, switches it to WAL mode, runs
///   the schema migrations and is the only connection that executes writes
/// - **Replica**: opens the existing file read-only; relies on the primary
///   having created and migrated it first
///
/// Both run a smoke query against the `messages` table after opening, so a
/// damaged file is reported during `init` rather than on the first call.
#[derive(Debug)]
pub struct WorkerDatabase {
   conn: SqliteConnection,
   path: PathBuf,
   is_primary: bool,
}

impl WorkerDatabase {
   /// Open the database described by `options`.
   pub async fn open(options: &InitOptions, is_primary: bool) -> Result<Self> {
      let path = options.database_path();

      let mut connect_options = SqliteConnectOptions::new()
         .filename(&path)
         .busy_timeout(BUSY_TIMEOUT);

      // `key` is always emitted as the first pragma on connect
      if let Some(key) = &options.key {
         connect_options = connect_options.pragma("key", quote_pragma_value(key));
      }

      connect_options = if is_primary {
         if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
         }

         connect_options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
      } else {
         connect_options.read_only(true)
      };

      let mut conn = connect_options.connect().await?;

      if is_primary {
         update_schema(&mut conn).await?;
      }

      let count: i64 = sqlx::query_scalar("SELECT count(*) FROM messages")
         .fetch_one(&mut conn)
         .await?;
      debug!(path = %path.display(), is_primary, messages = count, "Opened worker database");

      Ok(Self {
         conn,
         path,
         is_primary,
      })
   }

   /// Execute a readable catalog method.
   pub async fn read(&mut self, call: &ReadableMethod) -> Result<serde_json::Value> {
      Ok(call.execute(&mut self.conn).await?)
   }

   /// Execute a writable catalog method.
   pub async fn write(&mut self, call: &WritableMethod) -> Result<serde_json::Value> {
      Ok(call.execute(&mut self.conn).await?)
   }

   /// Close the connection, letting the primary refresh query planner
   /// statistics first.
   pub async fn close(mut self) -> Result<()> {
      if self.is_primary {
         sqlx::query("PRAGMA optimize").execute(&mut self.conn).await?;
      }

      self.conn.close().await?;
      debug!(path = %self.path.display(), "Closed worker database");
      Ok(())
   }
}

/// Delete the database file and its WAL side files.
///
/// Files that do not exist are skipped. Every connection to the database must
/// be closed before calling this.
pub async fn remove_database_files(path: &Path) -> Result<()> {
   remove_if_exists(path.to_path_buf()).await?;

   for suffix in SIDE_FILE_SUFFIXES {
      let mut side_file = path.as_os_str().to_owned();
      side_file.push(suffix);
      remove_if_exists(PathBuf::from(side_file)).await?;
   }

   Ok(())
}

async fn remove_if_exists(path: PathBuf) -> Result<()> {
   match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
   }
}

fn quote_pragma_value(value: &str) -> String {
   format!("'{}'", value.replace('\'', "''"))
}
