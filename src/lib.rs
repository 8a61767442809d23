//! # sqlx-sqlite-coordinator
//!
//! Coordinates access to one SQLite database from a pool of single-connection
//! workers.
//!
//! ## Core Types
//!
//! - **[`Coordinator`]**: Public facade; typed reads and writes, lifecycle, write pausing,
//!   error subscriptions and query statistics
//! - **[`CoordinatorConfig`]**: Pool size, slow-query threshold and query timing
//! - **[`Error`]** / **[`SqlError`]**: Coordinator errors and worker-reported failures
//!
//! ## Architecture
//!
//! - **Single writer**: Every write and every paging call runs on worker 0, the primary
//! - **Load-balanced reads**: Other reads go to the worker with the fewest calls in flight
//! - **Correlated messages**: Requests carry a sequence number echoed by the worker's response
//! - **Write gate**: Writes can be paused and resumed without touching calls in flight
//! - **Error broadcast**: Failures are classified as corrupted, readonly or unknown and
//!   delivered to subscribers besides the caller

mod config;
mod coordinator;
mod correlator;
mod error;
mod gate;
mod pool;
mod stats;
mod subscribers;

pub use config::{CoordinatorConfig, TIME_QUERIES_ENV, WORKER_COUNT_ENV};
pub use coordinator::{Coordinator, LifecycleState};
pub use error::{Error, Result, SqlError};
pub use stats::{DEFAULT_MAX_QUERIES_TO_LOG, QueryStats, QueryStatsOptions, QueryStatsSummary};

// Types needed to call the coordinator
pub use sqlx_sqlite_toolkit::{ReadQuery, SqliteErrorKind, WriteQuery};
pub use sqlx_sqlite_worker::InitOptions;
