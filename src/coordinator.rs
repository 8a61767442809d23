//! The coordinator facade.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Closing -> Closed
//!                        |                     ^
//!                        +----> Failed --------+
//! ```
//!
//! Reads and writes issued while `Initializing` wait for the outcome. Any other
//! state than `Ready` rejects them with [`Error::Uninitialized`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx_sqlite_toolkit::{ReadQuery, ReadableMethod, SqliteErrorKind, WritableMethod, WriteQuery};
use sqlx_sqlite_worker::{CallResult, InitOptions, WorkerHandle, WorkerRequest, spawn_worker};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::correlator::{Correlator, run_mailbox};
use crate::gate::WriteGate;
use crate::pool::{PRIMARY, WorkerPool};
use crate::stats::QueryStatsTracker;
use crate::subscribers::Subscribers;
use crate::{
   CoordinatorConfig, Error, QueryStats, QueryStatsOptions, QueryStatsSummary, Result, SqlError,
};

/// Lifecycle state of a [`Coordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
   Uninitialized,
   Initializing,
   Ready,
   /// `initialize` failed; only `close` and `remove_db` are accepted
   Failed,
   Closing,
   Closed,
}

struct Inner {
   pool: WorkerPool,
   correlator: Arc<Correlator>,
   subscribers: Arc<Subscribers>,
   gate: WriteGate,
   stats: QueryStatsTracker,
   state: watch::Sender<LifecycleState>,
}

/// Routes typed database calls to a pool of workers.
///
/// Worker 0 is the primary: it creates and migrates the database, executes
/// every write and every paging call. The other workers serve reads, each to
/// the least loaded worker at dispatch time.
///
/// Cloning is cheap; all clones drive the same workers.
///
/// # Consistency
///
/// A read served by a replica may not yet observe a write the primary has
/// just acknowledged.
///
/// # Example
///
/// ```ignore
/// use sqlx_sqlite_coordinator::{Coordinator, CoordinatorConfig, InitOptions};
/// use sqlx_sqlite_toolkit::{GetItem, PutItem};
///
/// let coordinator = Coordinator::new(CoordinatorConfig::from_env())?;
/// coordinator.initialize(InitOptions::new(config_dir, "1.0.0")).await?;
///
/// coordinator.write(PutItem { id: "1".into(), value: "a".into() }).await?;
/// let item = coordinator.read(GetItem { id: "1".into() }).await?;
///
/// coordinator.close().await?;
/// ```
#[derive(Clone)]
pub struct Coordinator {
   inner: Arc<Inner>,
}

impl Coordinator {
   /// Spawn `config.worker_count` sqlx workers on the current tokio runtime.
   ///
   /// # Panics
   ///
   /// Panics if called outside of a tokio runtime.
   pub fn new(config: CoordinatorConfig) -> Result<Self> {
      let handles = (0..config.worker_count).map(spawn_worker).collect();
      Self::with_workers(config, handles)
   }

   /// Drive already running workers; `handles[0]` becomes the primary.
   ///
   /// `config.worker_count` is ignored in favor of `handles.len()`.
   pub fn with_workers(config: CoordinatorConfig, handles: Vec<WorkerHandle>) -> Result<Self> {
      let (pool, mailboxes) = WorkerPool::new(handles)?;
      let correlator = Arc::new(Correlator::default());
      let subscribers = Arc::new(Subscribers::default());

      // Mailboxes hold no reference to the pool, so dropping every
      // coordinator clone closes the request channels and lets workers exit
      for (worker, messages) in mailboxes.into_iter().enumerate() {
         tokio::spawn(run_mailbox(
            worker,
            messages,
            Arc::clone(&correlator),
            Arc::clone(&subscribers),
         ));
      }

      debug!(workers = pool.len(), "Created worker pool");

      Ok(Self {
         inner: Arc::new(Inner {
            pool,
            correlator,
            subscribers,
            gate: WriteGate::default(),
            stats: QueryStatsTracker::new(&config),
            state: watch::Sender::new(LifecycleState::Uninitialized),
         }),
      })
   }

   /// Open the database on every worker.
   ///
   /// The primary is initialized first, then all replicas concurrently, so the
   /// database file exists and is migrated before any replica opens it.
   pub async fn initialize(&self, options: InitOptions) -> Result<()> {
      if !self.transition(&[LifecycleState::Uninitialized], LifecycleState::Initializing) {
         return Err(Error::AlreadyInitialized);
      }

      let mut guard = InitializingGuard {
         state: &self.inner.state,
         finished: false,
      };

      let result = self.initialize_workers(options).await;
      match &result {
         Ok(()) => {
            info!(workers = self.inner.pool.len(), "Coordinator ready");
            guard.finish(LifecycleState::Ready);
         }
         Err(e) => {
            warn!(error = %e, "Coordinator initialization failed");
            guard.finish(LifecycleState::Failed);
         }
      }

      result
   }

   async fn initialize_workers(&self, options: InitOptions) -> Result<()> {
      self
         .dispatch(
            PRIMARY,
            WorkerRequest::Init {
               options: options.clone(),
               is_primary: true,
            },
         )
         .await?;

      try_join_all(self.inner.pool.replicas().iter().map(|slot| {
         self.dispatch(
            slot.index,
            WorkerRequest::Init {
               options: options.clone(),
               is_primary: false,
            },
         )
      }))
      .await?;

      Ok(())
   }

   /// Execute a read call on the least loaded worker, or on the primary for
   /// paging calls.
   pub async fn read<Q: ReadQuery>(&self, query: Q) -> Result<Q::Output> {
      self.wait_ready().await?;

      let call: ReadableMethod = query.into();
      let method = call.name();
      let load = self.inner.pool.select_for_read(call.is_paging());
      let slot = self.inner.pool.slot(load.index());

      let response = self.inner.correlator.send(slot, WorkerRequest::ReadCall { call }).await;
      drop(load);

      self.finish_call(method, response?)
   }

   /// Execute a write call on the primary once write access is not paused.
   pub async fn write<Q: WriteQuery>(&self, query: Q) -> Result<Q::Output> {
      self.wait_ready().await?;
      let admission = self.inner.gate.admit().await;

      let call: WritableMethod = query.into();
      let method = call.name();
      let load = self.inner.pool.select_for_write();
      let slot = self.inner.pool.slot(load.index());

      // The next held write is released only once this one is on its way
      let pending = self.inner.correlator.enqueue(slot, WorkerRequest::WriteCall { call });
      drop(admission);
      let response = match pending {
         Ok(pending) => pending.wait().await,
         Err(e) => Err(e),
      };
      drop(load);

      self.finish_call(method, response?)
   }

   fn finish_call<T: DeserializeOwned>(&self, method: &str, response: JsonValue) -> Result<T> {
      let CallResult {
         result,
         duration_ms,
      } = serde_json::from_value(response)?;

      // Saturating cast: negative or NaN durations count as zero
      let duration = Duration::from_nanos((duration_ms * 1_000_000.0).round() as u64);
      self.inner.stats.record(method, duration);

      Ok(serde_json::from_value(result)?)
   }

   /// Hold back every write issued from now on until
   /// [`resume_write_access`](Self::resume_write_access).
   ///
   /// Writes already dispatched are not affected.
   pub fn pause_write_access(&self) -> Result<()> {
      self.inner.gate.pause()?;
      info!("Write access paused");
      Ok(())
   }

   /// Release every held write in the order it was issued.
   pub fn resume_write_access(&self) -> Result<()> {
      let queued = self.inner.gate.queued();
      self.inner.gate.resume()?;
      info!(queued, "Write access resumed");
      Ok(())
   }

   pub fn is_write_access_paused(&self) -> bool {
      self.inner.gate.is_paused()
   }

   /// Number of writes held back by a pause.
   pub fn held_writes(&self) -> usize {
      self.inner.gate.queued()
   }

   /// Close every worker's connection and wait for the workers to exit.
   ///
   /// Waits for a pending `initialize` first. Replicas are closed before the
   /// primary.
   pub async fn close(&self) -> Result<()> {
      self.terminate(WorkerRequest::Close).await
   }

   /// Close every worker and delete the database files.
   ///
   /// Also accepted after a failed `initialize`, so a corrupted database can
   /// be discarded.
   pub async fn remove_db(&self) -> Result<()> {
      self.terminate(WorkerRequest::RemoveDb).await
   }

   async fn terminate(&self, request: WorkerRequest) -> Result<()> {
      let previous = self.settled_state().await;
      if !self.transition(
         &[LifecycleState::Ready, LifecycleState::Failed],
         LifecycleState::Closing,
      ) {
         return Err(Error::Uninitialized);
      }

      let replicas = join_all(
         self
            .inner
            .pool
            .replicas()
            .iter()
            .map(|slot| self.dispatch(slot.index, request.clone())),
      )
      .await;
      let primary = self.dispatch(PRIMARY, request).await;

      self.inner.state.send_replace(LifecycleState::Closed);
      self.inner.pool.wait_for_exit().await;

      let result = replicas.into_iter().chain([primary]).find_map(Result::err);
      match result {
         None => {
            info!("Coordinator closed");
            Ok(())
         }
         Some(e) if previous == LifecycleState::Failed => {
            warn!(error = %e, "Terminating workers after failed initialization");
            Ok(())
         }
         Some(e) => Err(e),
      }
   }

   /// Send a lifecycle request to a specific worker, counting it as load.
   async fn dispatch(&self, worker: usize, request: WorkerRequest) -> Result<JsonValue> {
      let _load = self.inner.pool.acquire(worker);
      self.inner.correlator.send(self.inner.pool.slot(worker), request).await
   }

   /// Resolves when `initialize` is not in progress.
   async fn settled_state(&self) -> LifecycleState {
      let mut state = self.inner.state.subscribe();
      match state.wait_for(|state| *state != LifecycleState::Initializing).await {
         Ok(state) => *state,
         // The sender lives in `self`
         Err(_) => LifecycleState::Closed,
      }
   }

   async fn wait_ready(&self) -> Result<()> {
      match self.settled_state().await {
         LifecycleState::Ready => Ok(()),
         _ => Err(Error::Uninitialized),
      }
   }

   /// Atomically move to `to` if the current state is one of `from`.
   fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> bool {
      self.inner.state.send_if_modified(|state| {
         if from.contains(state) {
            *state = to;
            true
         } else {
            false
         }
      })
   }

   /// Resolves with the next error classified as `Corrupted`.
   pub fn when_corrupted(&self) -> oneshot::Receiver<SqlError> {
      self.inner.subscribers.next_error(SqliteErrorKind::Corrupted)
   }

   /// Resolves with the next error classified as `Readonly`.
   pub fn when_readonly(&self) -> oneshot::Receiver<SqlError> {
      self.inner.subscribers.next_error(SqliteErrorKind::Readonly)
   }

   /// Call `callback` for every error classified as `Unknown`, for the
   /// lifetime of the coordinator.
   pub fn on_unknown_sql_error(&self, callback: impl Fn(SqlError) + Send + Sync + 'static) {
      self.inner.subscribers.subscribe(SqliteErrorKind::Unknown, callback);
   }

   /// Start a new statistics epoch, logging the running one if any.
   pub fn start_tracking_query_stats(&self) {
      self.inner.stats.start();
   }

   /// Log and return the statistics gathered since
   /// [`start_tracking_query_stats`](Self::start_tracking_query_stats), then
   /// stop tracking.
   pub fn stop_tracking_query_stats(
      &self,
      options: QueryStatsOptions,
   ) -> Option<QueryStatsSummary> {
      self.inner.stats.stop(&options)
   }

   /// Statistics of the running epoch, by method in first-call order.
   pub fn query_stats(&self) -> Option<IndexMap<String, QueryStats>> {
      self.inner.stats.snapshot()
   }

   pub fn state(&self) -> LifecycleState {
      *self.inner.state.borrow()
   }

   /// In-flight requests per worker, primary first.
   pub fn worker_loads(&self) -> Vec<usize> {
      self.inner.pool.loads()
   }

   /// Requests awaiting a worker response.
   pub fn pending_requests(&self) -> usize {
      self.inner.correlator.pending()
   }

   pub fn worker_count(&self) -> usize {
      self.inner.pool.len()
   }
}

/// Leaves `Initializing` even if the `initialize` future is dropped midway.
struct InitializingGuard<'a> {
   state: &'a watch::Sender<LifecycleState>,
   finished: bool,
}

impl InitializingGuard<'_> {
   fn finish(&mut self, state: LifecycleState) {
      self.state.send_replace(state);
      self.finished = true;
   }
}

impl Drop for InitializingGuard<'_> {
   fn drop(&mut self) {
      if !self.finished {
         self.state.send_replace(LifecycleState::Failed);
      }
   }
}
