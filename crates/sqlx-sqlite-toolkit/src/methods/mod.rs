//! Readable and writable method catalogs.
//!
//! Every call a worker can execute is a struct carrying its typed arguments.
//! The structs are gathered into two closed enums, [`ReadableMethod`] and
//! [`WritableMethod`], which are what travels inside a request envelope.
//! [`ReadQuery`] and [`WriteQuery`] tie each struct to its enum variant and to
//! the type its result decodes into on the calling side.
//!
//! Results leave the worker as JSON so that the envelope stays serializable
//! regardless of where the worker runs.

mod items;
mod messages;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::SqliteConnection;

use crate::Result;
use crate::pagination::{self, FinishPageMessages, PageMessages};

pub use items::{GetAllItems, GetItem, Item, PutItem, RemoveAllItems, RemoveItem};
pub use messages::{GetMessageById, GetMessageCount, Message, RemoveMessage, SaveMessage};

pub(crate) use messages::MESSAGE_COLUMNS;

/// A call that only reads from the database.
pub trait ReadQuery: Into<ReadableMethod> {
   /// Decoded result of the call.
   type Output: DeserializeOwned;
}

/// A call that modifies the database and must run on the primary connection.
pub trait WriteQuery: Into<WritableMethod> {
   /// Decoded result of the call.
   type Output: DeserializeOwned;
}

/// Catalog of read calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "camelCase")]
pub enum ReadableMethod {
   GetItem(GetItem),
   GetAllItems(GetAllItems),
   GetMessageById(GetMessageById),
   GetMessageCount(GetMessageCount),
   PageMessages(PageMessages),
   FinishPageMessages(FinishPageMessages),
}

impl ReadableMethod {
   /// Catalog name of the call, used for labels and statistics.
   pub fn name(&self) -> &'static str {
      match self {
         ReadableMethod::GetItem(_) => "getItem",
         ReadableMethod::GetAllItems(_) => "getAllItems",
         ReadableMethod::GetMessageById(_) => "getMessageById",
         ReadableMethod::GetMessageCount(_) => "getMessageCount",
         ReadableMethod::PageMessages(_) => "pageMessages",
         ReadableMethod::FinishPageMessages(_) => "finishPageMessages",
      }
   }

   /// Whether the call depends on temporary state that lives inside one
   /// specific connection.
   ///
   /// Paging calls create temp tables and triggers on their first call and
   /// read them back on later calls, so all of them have to run on the
   /// connection that also receives every write.
   pub fn is_paging(&self) -> bool {
      matches!(
         self,
         ReadableMethod::PageMessages(_) | ReadableMethod::FinishPageMessages(_)
      )
   }

   /// Execute the call on `conn` and encode its result as JSON.
   pub async fn execute(&self, conn: &mut SqliteConnection) -> Result<JsonValue> {
      let value = match self {
         ReadableMethod::GetItem(call) => {
            serde_json::to_value(items::get_item(conn, call).await?)?
         }
         ReadableMethod::GetAllItems(_) => {
            serde_json::to_value(items::get_all_items(conn).await?)?
         }
         ReadableMethod::GetMessageById(call) => {
            serde_json::to_value(messages::get_message_by_id(conn, call).await?)?
         }
         ReadableMethod::GetMessageCount(call) => {
            serde_json::to_value(messages::get_message_count(conn, call).await?)?
         }
         ReadableMethod::PageMessages(call) => {
            serde_json::to_value(pagination::page_messages(conn, call).await?)?
         }
         ReadableMethod::FinishPageMessages(call) => {
            pagination::finish_page_messages(conn, &call.cursor).await?;
            JsonValue::Null
         }
      };
      Ok(value)
   }
}

/// Catalog of write calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "camelCase")]
pub enum WritableMethod {
   PutItem(PutItem),
   RemoveItem(RemoveItem),
   RemoveAllItems(RemoveAllItems),
   SaveMessage(SaveMessage),
   RemoveMessage(RemoveMessage),
}

impl WritableMethod {
   /// Catalog name of the call, used for labels and statistics.
   pub fn name(&self) -> &'static str {
      match self {
         WritableMethod::PutItem(_) => "putItem",
         WritableMethod::RemoveItem(_) => "removeItem",
         WritableMethod::RemoveAllItems(_) => "removeAllItems",
         WritableMethod::SaveMessage(_) => "saveMessage",
         WritableMethod::RemoveMessage(_) => "removeMessage",
      }
   }

   /// Execute the call on `conn` and encode its result as JSON.
   pub async fn execute(&self, conn: &mut SqliteConnection) -> Result<JsonValue> {
      let value = match self {
         WritableMethod::PutItem(call) => {
            items::put_item(conn, call).await?;
            JsonValue::Null
         }
         WritableMethod::RemoveItem(call) => {
            serde_json::to_value(items::remove_item(conn, call).await?)?
         }
         WritableMethod::RemoveAllItems(_) => {
            serde_json::to_value(items::remove_all_items(conn).await?)?
         }
         WritableMethod::SaveMessage(call) => {
            messages::save_message(conn, call).await?;
            JsonValue::Null
         }
         WritableMethod::RemoveMessage(call) => {
            serde_json::to_value(messages::remove_message(conn, call).await?)?
         }
      };
      Ok(value)
   }
}

/// Bind a call struct to its catalog variant and result type.
macro_rules! catalog_entry {
   (read $call:ident => $output:ty) => {
      impl From<$call> for ReadableMethod {
         fn from(call: $call) -> Self {
            ReadableMethod::$call(call)
         }
      }

      impl ReadQuery for $call {
         type Output = $output;
      }
   };
   (write $call:ident => $output:ty) => {
      impl From<$call> for WritableMethod {
         fn from(call: $call) -> Self {
            WritableMethod::$call(call)
         }
      }

      impl WriteQuery for $call {
         type Output = $output;
      }
   };
}

catalog_entry!(read GetItem => Option<Item>);
catalog_entry!(read GetAllItems => Vec<Item>);
catalog_entry!(read GetMessageById => Option<Message>);
catalog_entry!(read GetMessageCount => i64);
catalog_entry!(read PageMessages => pagination::MessagePage);
catalog_entry!(read FinishPageMessages => ());

catalog_entry!(write PutItem => ());
catalog_entry!(write RemoveItem => u64);
catalog_entry!(write RemoveAllItems => u64);
catalog_entry!(write SaveMessage => ());
catalog_entry!(write RemoveMessage => u64);
