//! Messages, the table walked by the paging calls.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::Result;

/// Columns selected for every [`Message`] read.
pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, body, received_at, sent_at";

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
   pub id: String,
   pub conversation_id: String,
   pub body: String,
   pub received_at: i64,
   pub sent_at: i64,
}

/// Read one message by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMessageById {
   pub id: String,
}

/// Count messages, optionally restricted to one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessageCount {
   pub conversation_id: Option<String>,
}

/// Insert a message or update an existing one with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMessage {
   pub message: Message,
}

/// Remove one message; returns the number of rows removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMessage {
   pub id: String,
}

pub(crate) async fn get_message_by_id(
   conn: &mut SqliteConnection,
   call: &GetMessageById,
) -> Result<Option<Message>> {
   let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
   let message = sqlx::query_as::<_, Message>(&query)
      .bind(&call.id)
      .fetch_optional(&mut *conn)
      .await?;

   Ok(message)
}

pub(crate) async fn get_message_count(
   conn: &mut SqliteConnection,
   call: &GetMessageCount,
) -> Result<i64> {
   let count = match &call.conversation_id {
      Some(conversation_id) => {
         sqlx::query_scalar::<_, i64>("SELECT count(*) FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_one(&mut *conn)
            .await?
      }
      None => {
         sqlx::query_scalar::<_, i64>("SELECT count(*) FROM messages")
            .fetch_one(&mut *conn)
            .await?
      }
   };

   Ok(count)
}

pub(crate) async fn save_message(conn: &mut SqliteConnection, call: &SaveMessage) -> Result<()> {
   let message = &call.message;
   sqlx::query(
      "INSERT INTO messages (id, conversation_id, body, received_at, sent_at)
       VALUES ($1, $2, $3, $4, $5)
       ON CONFLICT(id) DO UPDATE SET
          conversation_id = excluded.conversation_id,
          body = excluded.body,
          received_at = excluded.received_at,
          sent_at = excluded.sent_at",
   )
   .bind(&message.id)
   .bind(&message.conversation_id)
   .bind(&message.body)
   .bind(message.received_at)
   .bind(message.sent_at)
   .execute(&mut *conn)
   .await?;

   Ok(())
}

pub(crate) async fn remove_message(
   conn: &mut SqliteConnection,
   call: &RemoveMessage,
) -> Result<u64> {
   let result = sqlx::query("DELETE FROM messages WHERE id = $1")
      .bind(&call.id)
      .execute(&mut *conn)
      .await?;

   Ok(result.rows_affected())
}
