//! # sqlx-sqlite-toolkit
//!
//! The SQLite side of the coordinator: every call a worker can execute, the
//! schema those calls run against, and classification of their failures.
//!
//! ## Core Types
//!
//! - **[`ReadableMethod`]** / **[`WritableMethod`]**: closed catalogs of read and write calls
//! - **[`ReadQuery`]** / **[`WriteQuery`]**: bind each call struct to its typed result
//! - **[`SqliteErrorKind`]**: failure classes reported alongside worker errors
//! - **[`Error`]**: error type for call execution
//!
//! ## Paging
//!
//! [`PageMessages`] and [`FinishPageMessages`] keep temp tables and triggers
//! on the connection that runs them; see [`pagination`] for why those calls
//! must stay on the primary connection.

mod error;
pub mod methods;
pub mod pagination;
pub mod schema;

pub use error::{Error, Result, SqliteErrorKind, classify_message, classify_sqlx};
pub use methods::{
   GetAllItems, GetItem, GetMessageById, GetMessageCount, Item, Message, PutItem, ReadQuery,
   ReadableMethod, RemoveAllItems, RemoveItem, RemoveMessage, SaveMessage, WritableMethod,
   WriteQuery,
};
pub use pagination::{FinishPageMessages, MessageCursor, MessagePage, PageMessages};
pub use schema::update_schema;
