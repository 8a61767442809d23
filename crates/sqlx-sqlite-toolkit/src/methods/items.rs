//! Key/value items stored as JSON text.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::SqliteConnection;

use crate::Result;

/// A stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
   pub id: String,
   pub value: JsonValue,
}

/// Read one item by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetItem {
   pub id: String,
}

/// Read every item, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllItems {}

/// Insert an item or replace the value of an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutItem {
   pub id: String,
   pub value: JsonValue,
}

/// Remove one item; returns the number of rows removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
   pub id: String,
}

/// Remove every item; returns the number of rows removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAllItems {}

fn decode_item((id, json): (String, String)) -> Result<Item> {
   Ok(Item {
      id,
      value: serde_json::from_str(&json)?,
   })
}

pub(crate) async fn get_item(conn: &mut SqliteConnection, call: &GetItem) -> Result<Option<Item>> {
   let row: Option<(String, String)> = sqlx::query_as("SELECT id, json FROM items WHERE id = $1")
      .bind(&call.id)
      .fetch_optional(&mut *conn)
      .await?;

   row.map(decode_item).transpose()
}

pub(crate) async fn get_all_items(conn: &mut SqliteConnection) -> Result<Vec<Item>> {
   let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, json FROM items ORDER BY id ASC")
      .fetch_all(&mut *conn)
      .await?;

   rows.into_iter().map(decode_item).collect()
}

pub(crate) async fn put_item(conn: &mut SqliteConnection, call: &PutItem) -> Result<()> {
   sqlx::query(
      "INSERT INTO items (id, json) VALUES ($1, $2)
       ON CONFLICT(id) DO UPDATE SET json = excluded.json",
   )
   .bind(&call.id)
   .bind(call.value.to_string())
   .execute(&mut *conn)
   .await?;

   Ok(())
}

pub(crate) async fn remove_item(conn: &mut SqliteConnection, call: &RemoveItem) -> Result<u64> {
   let result = sqlx::query("DELETE FROM items WHERE id = $1")
      .bind(&call.id)
      .execute(&mut *conn)
      .await?;

   Ok(result.rows_affected())
}

pub(crate) async fn remove_all_items(conn: &mut SqliteConnection) -> Result<u64> {
   let result = sqlx::query("DELETE FROM items").execute(&mut *conn).await?;
   Ok(result.rows_affected())
}
