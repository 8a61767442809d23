//! Coordinator configuration

use std::time::Duration;

/// Environment variable overriding [`CoordinatorConfig::worker_count`].
pub const WORKER_COUNT_ENV: &str = "SQL_WORKER_COUNT";

/// Environment variable enabling [`CoordinatorConfig::time_queries`].
pub const TIME_QUERIES_ENV: &str = "TIME_QUERIES";

/// Configuration for a [`Coordinator`](crate::Coordinator)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_coordinator::CoordinatorConfig;
///
/// // Use defaults
/// let config = CoordinatorConfig::default();
///
/// // Override just one field
/// let config = CoordinatorConfig {
///    worker_count: 2,
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
   /// Number of workers, including the primary
   ///
   /// Default: 4
   pub worker_count: usize,

   /// Calls that take longer than this are logged as slow queries, whether
   /// or not query statistics are being tracked
   ///
   /// Default: 40 milliseconds
   pub slow_query_threshold: Duration,

   /// Log the duration of every call
   ///
   /// Default: false
   pub time_queries: bool,
}

impl Default for CoordinatorConfig {
   fn default() -> Self {
      Self {
         worker_count: 4,
         slow_query_threshold: Duration::from_millis(40),
         time_queries: false,
      }
   }
}

impl CoordinatorConfig {
   /// Defaults, overridden by `SQL_WORKER_COUNT` and `TIME_QUERIES`.
   pub fn from_env() -> Self {
      Self::from_lookup(|name| std::env::var(name).ok())
   }

   fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
      let mut config = Self::default();

      if let Some(count) = lookup(WORKER_COUNT_ENV).and_then(|v| v.trim().parse::<usize>().ok())
      {
         config.worker_count = count.max(1);
      }

      if let Some(value) = lookup(TIME_QUERIES_ENV) {
         let value = value.trim();
         config.time_queries =
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false");
      }

      config
   }
}
