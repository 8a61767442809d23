//! Connection-bound message paging.
//!
//! Walks every message in `(received_at, sent_at)` order in chunks, without
//! missing messages that are inserted or edited while the walk is in progress.
//!
//! # How It Works
//!
//! The first [`PageMessages`] call of a run snapshots every message rowid into
//! a temp table `tmp_<runId>_updated_messages` and installs two temp triggers
//! on `messages`: one for inserts and one for body updates. Both triggers put
//! the affected rowid back into the temp table, so a message changed after it
//! was returned is returned again later in the run.
//!
//! Each call pops the next chunk of rowids from the temp table and loads the
//! matching messages. [`FinishPageMessages`] drops the temp table and triggers.
//!
//! Temp tables and temp triggers are private to the connection that created
//! them, and the triggers only see writes made through that same connection.
//! Every call of a run must therefore execute on the connection that also
//! performs all writes.

use serde::{Deserialize, Serialize};
use sqlx::{Connection, Executor, SqliteConnection};
use tracing::{debug, info, warn};

use crate::methods::{MESSAGE_COLUMNS, Message};
use crate::{Error, Result};

/// Number of messages returned per call when the caller does not choose.
pub const DEFAULT_CHUNK_SIZE: u32 = 1000;

/// Position of a paging run, returned by every [`PageMessages`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCursor {
   /// Identifier of the temp table and triggers owned by this run
   pub run_id: String,
   /// Number of messages returned so far
   pub count: u64,
   /// Whether the last call drained the run
   pub done: bool,
}

/// Fetch the next chunk of a paging run, starting a new run when `cursor` is
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMessages {
   pub cursor: Option<MessageCursor>,
   /// Messages per call; defaults to [`DEFAULT_CHUNK_SIZE`]
   pub chunk_size: Option<u32>,
}

impl PageMessages {
   /// Continue the run described by `cursor`.
   pub fn after(cursor: MessageCursor) -> Self {
      Self {
         cursor: Some(cursor),
         chunk_size: None,
      }
   }

   /// Override the chunk size.
   pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
      self.chunk_size = Some(chunk_size);
      self
   }
}

/// Release the temp table and triggers of a paging run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishPageMessages {
   pub cursor: MessageCursor,
}

/// A chunk of messages and the cursor to continue from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
   pub messages: Vec<Message>,
   pub cursor: MessageCursor,
}

/// Validate that a run id is safe for SQL interpolation.
///
/// Run ids become part of temp table and trigger names, and cursors come back
/// from callers, so only `[a-zA-Z0-9_]+` is accepted.
pub(crate) fn validate_run_id(run_id: &str) -> Result<()> {
   if run_id.is_empty() || !run_id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
      return Err(Error::InvalidRunId {
         run_id: run_id.to_string(),
      });
   }

   Ok(())
}

fn temp_table(run_id: &str) -> String {
   format!("tmp_{run_id}_updated_messages")
}

/// Build the statements that start a run: snapshot table, index, and the two
/// triggers that re-queue changed messages.
pub(crate) fn build_start_run_sql(run_id: &str) -> String {
   let table = temp_table(run_id);
   format!(
      "CREATE TEMP TABLE {table}
         (rowid INTEGER PRIMARY KEY, received_at INTEGER, sent_at INTEGER);

      CREATE INDEX {table}_received_at
         ON {table} (received_at ASC, sent_at ASC);

      INSERT INTO {table} (rowid, received_at, sent_at)
         SELECT rowid, received_at, sent_at FROM messages
         ORDER BY received_at ASC, sent_at ASC;

      CREATE TEMP TRIGGER tmp_{run_id}_message_updates
      UPDATE OF body ON messages
      BEGIN
         INSERT OR IGNORE INTO {table} (rowid, received_at, sent_at)
         VALUES (NEW.rowid, NEW.received_at, NEW.sent_at);
      END;

      CREATE TEMP TRIGGER tmp_{run_id}_message_inserts
      AFTER INSERT ON messages
      BEGIN
         INSERT OR IGNORE INTO {table} (rowid, received_at, sent_at)
         VALUES (NEW.rowid, NEW.received_at, NEW.sent_at);
      END;"
   )
}

/// Build the statements that release a run.
pub(crate) fn build_finish_run_sql(run_id: &str) -> String {
   format!(
      "DROP TABLE IF EXISTS {table};
      DROP TRIGGER IF EXISTS tmp_{run_id}_message_updates;
      DROP TRIGGER IF EXISTS tmp_{run_id}_message_inserts;",
      table = temp_table(run_id)
   )
}

fn placeholders(count: usize) -> String {
   vec!["?"; count].join(", ")
}

pub(crate) async fn page_messages(
   conn: &mut SqliteConnection,
   call: &PageMessages,
) -> Result<MessagePage> {
   let chunk_size = call.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1);

   if let Some(cursor) = &call.cursor
      && cursor.done
   {
      return Err(Error::PagingFinished);
   }

   let mut tx = conn.begin().await?;

   let (run_id, count) = match &call.cursor {
      Some(cursor) => {
         validate_run_id(&cursor.run_id)?;
         (cursor.run_id.clone(), cursor.count)
      }
      None => {
         let run_id = uuid::Uuid::new_v4().simple().to_string();
         let total = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM messages")
            .fetch_one(&mut *tx)
            .await?;

         info!(run_id = %run_id, total, "Starting message paging run");
         (&mut *tx)
            .execute(sqlx::raw_sql(&build_start_run_sql(&run_id)))
            .await?;

         (run_id, 0)
      }
   };

   let table = temp_table(&run_id);
   let select_rowids =
      format!("SELECT rowid FROM {table} ORDER BY received_at ASC, sent_at ASC LIMIT $1");
   let rowids = sqlx::query_scalar::<_, i64>(&select_rowids)
      .bind(i64::from(chunk_size))
      .fetch_all(&mut *tx)
      .await?;

   let mut messages = Vec::with_capacity(rowids.len());
   if !rowids.is_empty() {
      let delete = format!(
         "DELETE FROM {table} WHERE rowid IN ({})",
         placeholders(rowids.len())
      );
      let mut q = sqlx::query(&delete);
      for rowid in &rowids {
         q = q.bind(*rowid);
      }
      q.execute(&mut *tx).await?;

      let select = format!(
         "SELECT {MESSAGE_COLUMNS} FROM messages WHERE rowid IN ({})
          ORDER BY received_at ASC, sent_at ASC",
         placeholders(rowids.len())
      );
      let mut q = sqlx::query_as::<_, Message>(&select);
      for rowid in &rowids {
         q = q.bind(*rowid);
      }
      messages = q.fetch_all(&mut *tx).await?;
   }

   tx.commit().await?;

   let done = rowids.len() < chunk_size as usize;
   let count = count + messages.len() as u64;
   debug!(run_id = %run_id, count, done, "Paged messages");

   Ok(MessagePage {
      messages,
      cursor: MessageCursor {
         run_id,
         count,
         done,
      },
   })
}

pub(crate) async fn finish_page_messages(
   conn: &mut SqliteConnection,
   cursor: &MessageCursor,
) -> Result<()> {
   validate_run_id(&cursor.run_id)?;

   if !cursor.done {
      warn!(run_id = %cursor.run_id, "Message paging run finished before reaching the end");
   }

   info!(
      run_id = %cursor.run_id,
      count = cursor.count,
      "Message paging run processed {} messages",
      cursor.count
   );

   (&mut *conn)
      .execute(sqlx::raw_sql(&build_finish_run_sql(&cursor.run_id)))
      .await?;

   Ok(())
}
