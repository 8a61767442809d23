//! # sqlx-sqlite-worker
//!
//! Single-connection SQLite workers and the message protocol used to drive
//! them.
//!
//! ## Core Types
//!
//! - **[`WorkerRequest`]** / **[`WrappedRequest`]**: Calls sent to a worker, tagged with a
//!   sequence number
//! - **[`WorkerMessage`]**: Log entries and correlated responses sent back by a worker
//! - **[`WorkerHandle`]**: Both ends of a worker's channels plus its exit signal
//! - **[`InitOptions`]**: Where the database lives and how to open it
//! - **[`Error`]**: Error type for failures inside a worker
//!
//! ## Architecture
//!
//! - **One connection per worker**: Each worker owns exactly one `SqliteConnection`
//! - **Primary and replicas**: The primary creates and migrates the database and is the only
//!   worker that accepts write calls; replicas open the same file read-only
//! - **Message passing**: Workers run as tokio tasks and only communicate over unbounded channels

mod config;
mod database;
mod error;
mod protocol;
mod worker;

// Re-export public types
pub use config::InitOptions;
pub use database::{WorkerDatabase, remove_database_files};
pub use error::{Error, Result};
pub use protocol::{
   CallResult, LogLevel, SerializedError, WorkerHandle, WorkerMessage, WorkerRequest,
   WorkerResponse, WrappedRequest,
};
pub use worker::spawn_worker;
