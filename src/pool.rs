//! Worker pool and load-based routing.
//!
//! Worker 0 is always the primary. Each slot counts the requests currently
//! in flight on its worker; the count is held by a [`LoadGuard`] for as long
//! as the request is outstanding, so it is released on every exit path.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use sqlx_sqlite_worker::{WorkerHandle, WorkerMessage, WrappedRequest};
use tokio::sync::{mpsc, oneshot};

use crate::{Error, Result};

/// Index of the primary worker.
pub(crate) const PRIMARY: usize = 0;

/// Request side of one worker.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
   pub index: usize,
   pub requests: mpsc::UnboundedSender<WrappedRequest>,
}

/// In-flight request counter of one slot, released on drop.
#[derive(Debug)]
#[must_use = "the slot's load is released as soon as the guard is dropped"]
pub(crate) struct LoadGuard {
   loads: Arc<Mutex<Vec<usize>>>,
   index: usize,
}

impl LoadGuard {
   pub fn index(&self) -> usize {
      self.index
   }
}

impl Drop for LoadGuard {
   fn drop(&mut self) {
      let mut loads = self.loads.lock();
      loads[self.index] = loads[self.index].saturating_sub(1);
   }
}

#[derive(Debug)]
pub(crate) struct WorkerPool {
   slots: Vec<WorkerSlot>,
   loads: Arc<Mutex<Vec<usize>>>,
   exits: Mutex<Vec<oneshot::Receiver<()>>>,
}

impl WorkerPool {
   /// Take ownership of `handles`, returning the pool and each worker's
   /// message receiver for the caller to drain.
   pub fn new(
      handles: Vec<WorkerHandle>,
   ) -> Result<(Self, Vec<mpsc::UnboundedReceiver<WorkerMessage>>)> {
      if handles.is_empty() {
         return Err(Error::EmptyPool);
      }

      let mut slots = Vec::with_capacity(handles.len());
      let mut exits = Vec::with_capacity(handles.len());
      let mut mailboxes = Vec::with_capacity(handles.len());

      for (index, handle) in handles.into_iter().enumerate() {
         slots.push(WorkerSlot {
            index,
            requests: handle.requests,
         });
         exits.push(handle.exited);
         mailboxes.push(handle.messages);
      }

      let pool = Self {
         loads: Arc::new(Mutex::new(vec![0; slots.len()])),
         slots,
         exits: Mutex::new(exits),
      };

      Ok((pool, mailboxes))
   }

   pub fn len(&self) -> usize {
      self.slots.len()
   }

   pub fn slot(&self, index: usize) -> &WorkerSlot {
      &self.slots[index]
   }

   pub fn replicas(&self) -> &[WorkerSlot] {
      &self.slots[PRIMARY + 1..]
   }

   /// Pick the worker for a read call and count the call against it.
   ///
   /// Pinned calls always go to the primary. Otherwise the least loaded
   /// worker wins, the lowest index on ties.
   pub fn select_for_read(&self, pinned: bool) -> LoadGuard {
      let mut loads = self.loads.lock();

      let index = if pinned {
         PRIMARY
      } else {
         let mut best = PRIMARY;
         for (index, load) in loads.iter().enumerate() {
            if *load < loads[best] {
               best = index;
            }
         }
         best
      };

      loads[index] += 1;
      self.guard(index)
   }

   /// Writes never fan out.
   pub fn select_for_write(&self) -> LoadGuard {
      self.acquire(PRIMARY)
   }

   /// Count a request against a specific worker.
   pub fn acquire(&self, index: usize) -> LoadGuard {
      self.loads.lock()[index] += 1;
      self.guard(index)
   }

   fn guard(&self, index: usize) -> LoadGuard {
      LoadGuard {
         loads: Arc::clone(&self.loads),
         index,
      }
   }

   pub fn loads(&self) -> Vec<usize> {
      self.loads.lock().clone()
   }

   /// Wait until every worker has signalled its exit.
   ///
   /// A worker whose exit sender was dropped without firing counts as
   /// exited. Later calls return immediately.
   pub async fn wait_for_exit(&self) {
      let exits = std::mem::take(&mut *self.exits.lock());
      join_all(exits).await;
   }
}
