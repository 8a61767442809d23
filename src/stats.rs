//! Query statistics and per-call timing logs.
//!
//! Tracking is off by default. While it is on, every completed call adds its
//! duration to the record of its method. Slow-query warnings are emitted
//! regardless of tracking.

use std::fmt;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::CoordinatorConfig;

/// Entries in a summary when [`QueryStatsOptions::max_queries_to_log`] is unset.
pub const DEFAULT_MAX_QUERIES_TO_LOG: usize = 10;

/// Aggregated durations of one method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
   pub count: u64,
   pub cumulative: Duration,
   pub max: Duration,
}

impl QueryStats {
   fn record(&mut self, duration: Duration) {
      self.count += 1;
      self.cumulative += duration;
      self.max = self.max.max(duration);
   }

   pub fn average(&self) -> Duration {
      if self.count == 0 {
         return Duration::ZERO;
      }
      self.cumulative.div_f64(self.count as f64)
   }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStatsOptions {
   /// Default: [`DEFAULT_MAX_QUERIES_TO_LOG`]
   pub max_queries_to_log: Option<usize>,
   /// Name included in the summary, e.g. the operation being measured
   pub epoch_name: Option<String>,
}

/// Statistics of one tracking epoch, sorted by cumulative duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatsSummary {
   pub epoch_name: Option<String>,
   /// Wall-clock length of the epoch
   pub elapsed: Duration,
   /// Cumulative duration of every call in the epoch, not only the listed ones
   pub total: Duration,
   /// At most `max_queries_to_log` entries, slowest first
   pub queries: Vec<(String, QueryStats)>,
}

fn millis(duration: Duration) -> f64 {
   (duration.as_secs_f64() * 100_000.0).round() / 100.0
}

impl fmt::Display for QueryStatsSummary {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "Top {} queries by cumulative duration (ms) over last {}ms",
         self.queries.len(),
         self.elapsed.as_millis()
      )?;
      if let Some(name) = &self.epoch_name {
         write!(f, " during '{name}'")?;
      }
      f.write_str(": ")?;

      for (i, (method, stats)) in self.queries.iter().enumerate() {
         if i > 0 {
            f.write_str(" ||| ")?;
         }
         write!(
            f,
            "{method}: cumulative {} | average: {} | max: {} | count: {}",
            millis(stats.cumulative),
            millis(stats.average()),
            millis(stats.max),
            stats.count
         )?;
      }

      write!(
         f,
         "; Total cumulative duration of all SQL queries during this epoch: {}ms",
         millis(self.total)
      )
   }
}

struct Epoch {
   started_at: Instant,
   /// Insertion order breaks ties between equal cumulative durations
   records: IndexMap<String, QueryStats>,
}

impl Epoch {
   fn new() -> Self {
      Self {
         started_at: Instant::now(),
         records: IndexMap::new(),
      }
   }

   fn summarize(self, options: &QueryStatsOptions) -> QueryStatsSummary {
      let total: Duration = self.records.values().map(|stats| stats.cumulative).sum();
      let mut queries: Vec<_> = self.records.into_iter().collect();
      queries.sort_by(|(_, a), (_, b)| b.cumulative.cmp(&a.cumulative));
      queries.truncate(options.max_queries_to_log.unwrap_or(DEFAULT_MAX_QUERIES_TO_LOG));

      QueryStatsSummary {
         epoch_name: options.epoch_name.clone(),
         elapsed: self.started_at.elapsed(),
         total,
         queries,
      }
   }
}

pub(crate) struct QueryStatsTracker {
   slow_query_threshold: Duration,
   time_queries: bool,
   /// `Some` while tracking is on
   epoch: Mutex<Option<Epoch>>,
}

impl QueryStatsTracker {
   pub fn new(config: &CoordinatorConfig) -> Self {
      Self {
         slow_query_threshold: config.slow_query_threshold,
         time_queries: config.time_queries,
         epoch: Mutex::new(None),
      }
   }

   /// Begin a fresh epoch, logging the running one first if there is one.
   pub fn start(&self) {
      let previous = self.epoch.lock().replace(Epoch::new());
      if let Some(epoch) = previous {
         let summary = epoch.summarize(&QueryStatsOptions::default());
         info!("{summary}");
      }
   }

   /// End tracking and return the summary of the epoch, if one was running.
   pub fn stop(&self, options: &QueryStatsOptions) -> Option<QueryStatsSummary> {
      let epoch = self.epoch.lock().take()?;
      let summary = epoch.summarize(options);
      info!("{summary}");
      Some(summary)
   }

   pub fn record(&self, method: &str, duration: Duration) {
      if let Some(epoch) = self.epoch.lock().as_mut() {
         epoch.records.entry(method.to_string()).or_default().record(duration);
      }

      if self.time_queries {
         info!(method, duration_ms = millis(duration), "Query completed");
      }

      if self.is_slow(duration) {
         warn!(
            method,
            duration_ms = duration.as_millis() as u64,
            "Slow query {method} took {}ms",
            duration.as_millis()
         );
      }
   }

   fn is_slow(&self, duration: Duration) -> bool {
      duration > self.slow_query_threshold
   }

   pub fn snapshot(&self) -> Option<IndexMap<String, QueryStats>> {
      self.epoch.lock().as_ref().map(|epoch| epoch.records.clone())
   }
}
