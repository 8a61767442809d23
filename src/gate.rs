//! Write gate: pausable admission control for write calls.
//!
//! Pausing only stops new writes from being dispatched. A write that passed
//! the gate before the pause runs to completion.
//!
//! Held writes are released one at a time. Each released write holds an
//! [`Admission`] until its request is enqueued, and dropping it releases the
//! next one, so held writes reach the worker in the order they were issued.
//! Writes issued while the queue drains line up behind it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{Error, Result};

#[derive(Debug, Default)]
struct GateState {
   paused: bool,
   /// A released write has not dropped its admission yet
   draining: bool,
   /// Writes waiting for release in arrival order
   queue: VecDeque<oneshot::Sender<()>>,
}

impl GateState {
   /// Release the oldest write still waiting, skipping abandoned ones.
   fn release_next(&mut self) {
      if !self.paused {
         while let Some(waiter) = self.queue.pop_front() {
            if waiter.send(()).is_ok() {
               self.draining = true;
               return;
            }
         }
      }

      self.draining = false;
   }
}

#[derive(Debug, Default)]
pub(crate) struct WriteGate {
   state: Mutex<GateState>,
}

/// Permission to dispatch one write. Drop it once the write is enqueued.
#[must_use = "dropping the admission releases the next held write"]
#[derive(Debug)]
pub(crate) struct Admission<'a> {
   /// Set when this write was held and must release its successor
   gate: Option<&'a WriteGate>,
}

impl Drop for Admission<'_> {
   fn drop(&mut self) {
      if let Some(gate) = self.gate {
         gate.state.lock().release_next();
      }
   }
}

/// A write waiting in the queue. Forwards the release if the write is
/// abandoned right after being released.
struct Waiting<'a> {
   gate: &'a WriteGate,
   released: Option<oneshot::Receiver<()>>,
}

impl Drop for Waiting<'_> {
   fn drop(&mut self) {
      if let Some(mut released) = self.released.take()
         && released.try_recv().is_ok()
      {
         self.gate.state.lock().release_next();
      }
   }
}

impl WriteGate {
   pub fn pause(&self) -> Result<()> {
      let mut state = self.state.lock();
      if state.paused {
         return Err(Error::WriteAccessAlreadyPaused);
      }

      state.paused = true;
      Ok(())
   }

   /// Open the gate and start releasing queued writes, oldest first.
   pub fn resume(&self) -> Result<()> {
      let mut state = self.state.lock();
      if !state.paused {
         return Err(Error::WriteAccessNotPaused);
      }

      state.paused = false;
      if !state.draining {
         state.release_next();
      }

      Ok(())
   }

   /// Wait for this write's turn.
   pub async fn admit(&self) -> Admission<'_> {
      let released = {
         let mut state = self.state.lock();
         if !state.paused && !state.draining && state.queue.is_empty() {
            return Admission { gate: None };
         }

         let (tx, rx) = oneshot::channel();
         state.queue.push_back(tx);
         rx
      };

      let mut waiting = Waiting {
         gate: self,
         released: Some(released),
      };
      if let Some(released) = waiting.released.as_mut() {
         // The gate owns every sender, so this only resolves on release
         let _ = released.await;
      }
      waiting.released = None;

      Admission { gate: Some(self) }
   }

   pub fn is_paused(&self) -> bool {
      self.state.lock().paused
   }

   /// Number of writes waiting for release.
   pub fn queued(&self) -> usize {
      self.state.lock().queue.len()
   }
}
