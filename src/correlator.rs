//! Request correlation.
//!
//! Every request is tagged with a sequence number and parked in the pending
//! table until the worker's response echoing that number arrives. A mailbox
//! task per worker drains its messages and resolves the matching entries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use sqlx_sqlite_worker::{
   LogLevel, WorkerMessage, WorkerRequest, WorkerResponse, WrappedRequest,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::pool::WorkerSlot;
use crate::subscribers::Subscribers;
use crate::{Error, Result, SqlError};

struct PendingEntry {
   /// Prefix for errors reported for this request
   label: String,
   worker: usize,
   reply: oneshot::Sender<Result<JsonValue>>,
}

#[derive(Default)]
struct PendingTable {
   next_seq: u32,
   entries: HashMap<u32, PendingEntry>,
   /// Workers whose message channel has closed
   exited: HashSet<usize>,
   /// Set by the first response with an unknown seq
   desynced: Option<u32>,
}

impl PendingTable {
   /// Next free sequence number, wrapping around `u32::MAX`.
   fn allocate(&mut self) -> u32 {
      loop {
         let seq = self.next_seq;
         self.next_seq = self.next_seq.wrapping_add(1);
         if !self.entries.contains_key(&seq) {
            return seq;
         }
      }
   }
}

/// Response of an enqueued request.
pub(crate) struct PendingResponse {
   worker: usize,
   response: oneshot::Receiver<Result<JsonValue>>,
}

impl PendingResponse {
   pub async fn wait(self) -> Result<JsonValue> {
      self
         .response
         .await
         .unwrap_or(Err(Error::WorkerExited {
            worker: self.worker,
         }))
   }
}

#[derive(Default)]
pub(crate) struct Correlator {
   table: Mutex<PendingTable>,
}

impl Correlator {
   /// Send `request` to the worker in `slot` and wait for its response.
   pub async fn send(&self, slot: &WorkerSlot, request: WorkerRequest) -> Result<JsonValue> {
      self.enqueue(slot, request)?.wait().await
   }

   /// Register `request` and hand it to the worker in `slot` without waiting.
   ///
   /// Requests enqueued one after another reach the worker in that order.
   pub fn enqueue(&self, slot: &WorkerSlot, request: WorkerRequest) -> Result<PendingResponse> {
      let label = request.label();
      let (reply, response) = oneshot::channel();

      {
         let mut table = self.table.lock();
         if let Some(seq) = table.desynced {
            return Err(Error::ProtocolDesync { seq });
         }
         if table.exited.contains(&slot.index) {
            return Err(Error::WorkerExited { worker: slot.index });
         }

         let seq = table.allocate();
         trace!(worker = slot.index, seq, label = %label, "Sending request");

         // Registered and sent under one lock so a fast response always
         // finds its entry
         table.entries.insert(
            seq,
            PendingEntry {
               label,
               worker: slot.index,
               reply,
            },
         );
         if slot.requests.send(WrappedRequest { seq, request }).is_err() {
            table.entries.remove(&seq);
            table.exited.insert(slot.index);
            return Err(Error::WorkerExited { worker: slot.index });
         }
      }

      Ok(PendingResponse {
         worker: slot.index,
         response,
      })
   }

   /// Number of requests awaiting a response.
   pub fn pending(&self) -> usize {
      self.table.lock().entries.len()
   }

   fn resolve(&self, worker: usize, response: WorkerResponse, subscribers: &Subscribers) {
      let entry = self.table.lock().entries.remove(&response.seq);
      let Some(entry) = entry else {
         self.desync(worker, response.seq);
         return;
      };

      let result = match response.error {
         Some(serialized) => {
            let error = SqlError::new(&entry.label, serialized, response.error_kind);
            debug!(worker, seq = response.seq, kind = ?error.kind, "Request failed: {error}");
            subscribers.notify(&error);
            Err(Error::Sql(error))
         }
         None => Ok(response.response),
      };

      // The caller stopped waiting
      let _ = entry.reply.send(result);
   }

   /// A response arrived for a seq with no pending entry; fail everything.
   fn desync(&self, worker: usize, seq: u32) {
      let rejected: Vec<PendingEntry> = {
         let mut table = self.table.lock();
         table.desynced.get_or_insert(seq);
         table.entries.drain().map(|(_, entry)| entry).collect()
      };

      error!(
         worker,
         seq,
         rejected = rejected.len(),
         "Unexpected response for unknown seq {seq}; refusing further requests"
      );

      for entry in rejected {
         let _ = entry.reply.send(Err(Error::ProtocolDesync { seq }));
      }
   }

   /// Reject every request still waiting on `worker` and refuse new ones.
   fn worker_exited(&self, worker: usize) {
      let rejected: Vec<PendingEntry> = {
         let mut table = self.table.lock();
         table.exited.insert(worker);

         let seqs: Vec<u32> = table
            .entries
            .iter()
            .filter(|(_, entry)| entry.worker == worker)
            .map(|(seq, _)| *seq)
            .collect();
         seqs.into_iter().filter_map(|seq| table.entries.remove(&seq)).collect()
      };

      if rejected.is_empty() {
         debug!(worker, "Worker exited");
      } else {
         warn!(worker, pending = rejected.len(), "Worker exited with requests in flight");
      }

      for entry in rejected {
         let _ = entry.reply.send(Err(Error::WorkerExited { worker }));
      }
   }
}

/// Drain one worker's messages until its channel closes.
pub(crate) async fn run_mailbox(
   worker: usize,
   mut messages: mpsc::UnboundedReceiver<WorkerMessage>,
   correlator: Arc<Correlator>,
   subscribers: Arc<Subscribers>,
) {
   while let Some(message) = messages.recv().await {
      match message {
         WorkerMessage::Log { level, message } => log_worker_message(worker, level, &message),
         WorkerMessage::Response(response) => correlator.resolve(worker, response, &subscribers),
      }
   }

   correlator.worker_exited(worker);
}

fn log_worker_message(worker: usize, level: LogLevel, message: &str) {
   match level {
      LogLevel::Fatal => error!(worker, fatal = true, "{message}"),
      LogLevel::Error => error!(worker, "{message}"),
      LogLevel::Warn => warn!(worker, "{message}"),
      LogLevel::Info => info!(worker, "{message}"),
      LogLevel::Debug => debug!(worker, "{message}"),
      LogLevel::Trace => trace!(worker, "{message}"),
   }
}
