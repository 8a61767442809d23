//! Scripted in-process workers speaking the worker protocol.
//!
//! Each fake worker records every request it receives and answers according
//! to a behavior function. Answers can be held back and sent later, sent
//! twice, or never sent because the worker crashed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use sqlx_sqlite_coordinator::{Coordinator, CoordinatorConfig, InitOptions, SqliteErrorKind};
use sqlx_sqlite_toolkit::{ReadableMethod, WritableMethod};
use sqlx_sqlite_worker::{
   CallResult, SerializedError, WorkerHandle, WorkerMessage, WorkerRequest, WorkerResponse,
   WrappedRequest,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// How a fake worker answers a request.
#[derive(Debug, Clone)]
pub enum Reply {
   /// Raw response payload, used for lifecycle requests
   Value(JsonValue),
   /// Successful read or write call
   Call { result: JsonValue, duration_ms: f64 },
   Fail {
      kind: Option<SqliteErrorKind>,
      message: String,
   },
   /// Answer later with [`FakePool::reply`]
   Hold,
}

impl Reply {
   pub fn ok() -> Self {
      Reply::Call {
         result: JsonValue::Null,
         duration_ms: 1.0,
      }
   }

   pub fn fail(kind: SqliteErrorKind, message: &str) -> Self {
      Reply::Fail {
         kind: Some(kind),
         message: message.into(),
      }
   }
}

/// Lifecycle requests succeed, calls return `null`.
pub fn default_reply(_worker: usize, request: &WorkerRequest) -> Reply {
   match request {
      WorkerRequest::ReadCall { .. } | WorkerRequest::WriteCall { .. } => Reply::ok(),
      _ => Reply::Value(JsonValue::Null),
   }
}

#[derive(Debug, Clone)]
pub struct Received {
   pub worker: usize,
   pub seq: u32,
   pub request: WorkerRequest,
}

impl Received {
   pub fn read(&self) -> Option<&ReadableMethod> {
      match &self.request {
         WorkerRequest::ReadCall { call } => Some(call),
         _ => None,
      }
   }

   pub fn write(&self) -> Option<&WritableMethod> {
      match &self.request {
         WorkerRequest::WriteCall { call } => Some(call),
         _ => None,
      }
   }

   pub fn is_init(&self) -> bool {
      matches!(self.request, WorkerRequest::Init { .. })
   }
}

type Senders = Arc<Mutex<Vec<Option<mpsc::UnboundedSender<WorkerMessage>>>>>;

#[derive(Clone)]
pub struct FakePool {
   received: Arc<Mutex<Vec<Received>>>,
   senders: Senders,
}

impl FakePool {
   pub fn spawn(
      size: usize,
      behavior: impl Fn(usize, &WorkerRequest) -> Reply + Send + Sync + 'static,
   ) -> (Self, Vec<WorkerHandle>) {
      let behavior = Arc::new(behavior);
      let pool = FakePool {
         received: Arc::new(Mutex::new(Vec::new())),
         senders: Arc::new(Mutex::new(Vec::new())),
      };

      let mut handles = Vec::new();
      for worker in 0..size {
         let (request_tx, mut requests) = mpsc::unbounded_channel::<WrappedRequest>();
         let (message_tx, messages) = mpsc::unbounded_channel();
         let (exit_tx, exited) = oneshot::channel();
         pool.senders.lock().push(Some(message_tx));

         let fake = pool.clone();
         let behavior = Arc::clone(&behavior);
         tokio::spawn(async move {
            while let Some(WrappedRequest { seq, request }) = requests.recv().await {
               let reply = behavior(worker, &request);
               let terminal = request.is_terminal();
               fake.received.lock().push(Received {
                  worker,
                  seq,
                  request,
               });

               fake.reply(worker, seq, reply);
               if terminal {
                  fake.senders.lock()[worker] = None;
                  break;
               }
            }
            let _ = exit_tx.send(());
         });

         handles.push(WorkerHandle {
            requests: request_tx,
            messages,
            exited,
         });
      }

      (pool, handles)
   }

   /// Every request received so far, in arrival order.
   pub fn received(&self) -> Vec<Received> {
      self.received.lock().clone()
   }

   pub fn received_by(&self, worker: usize) -> Vec<Received> {
      self
         .received()
         .into_iter()
         .filter(|received| received.worker == worker)
         .collect()
   }

   /// Answer request `seq` of `worker`; no-op for [`Reply::Hold`] or a crashed worker.
   pub fn reply(&self, worker: usize, seq: u32, reply: Reply) {
      let response = match reply {
         Reply::Value(value) => WorkerResponse::ok(seq, value),
         Reply::Call {
            result,
            duration_ms,
         } => WorkerResponse::ok(
            seq,
            serde_json::to_value(CallResult {
               result,
               duration_ms,
            })
            .unwrap(),
         ),
         Reply::Fail { kind, message } => WorkerResponse {
            seq,
            error: Some(SerializedError {
               name: "SQLITE_ERROR".into(),
               message,
               stack: Some("at fake worker".into()),
            }),
            error_kind: kind,
            response: JsonValue::Null,
         },
         Reply::Hold => return,
      };

      self.send(worker, WorkerMessage::Response(response));
   }

   /// Push an arbitrary message from `worker`.
   pub fn send(&self, worker: usize, message: WorkerMessage) {
      if let Some(sender) = &self.senders.lock()[worker] {
         let _ = sender.send(message);
      }
   }

   /// Close `worker`'s message channel without answering anything.
   pub fn crash(&self, worker: usize) {
      self.senders.lock()[worker] = None;
   }

   /// Wait until the received requests satisfy `condition`.
   pub async fn wait_until(&self, what: &str, condition: impl Fn(&[Received]) -> bool) {
      let poll = async {
         loop {
            if condition(&self.received()) {
               return;
            }
            tokio::task::yield_now().await;
         }
      };

      if timeout(Duration::from_secs(5), poll).await.is_err() {
         panic!("timed out waiting for {what}; received {:#?}", self.received());
      }
   }
}

/// Let every spawned task run until it blocks.
pub async fn settle() {
   for _ in 0..100 {
      tokio::task::yield_now().await;
   }
}

pub fn init_options() -> InitOptions {
   InitOptions::new("/nonexistent/config", "test")
}

/// A coordinator over `size` fake workers.
pub fn coordinator(
   size: usize,
   behavior: impl Fn(usize, &WorkerRequest) -> Reply + Send + Sync + 'static,
) -> (Coordinator, FakePool) {
   let (pool, handles) = FakePool::spawn(size, behavior);
   let coordinator = Coordinator::with_workers(CoordinatorConfig::default(), handles).unwrap();
   (coordinator, pool)
}

/// A coordinator over `size` fake workers, already initialized.
pub async fn ready(
   size: usize,
   behavior: impl Fn(usize, &WorkerRequest) -> Reply + Send + Sync + 'static,
) -> (Coordinator, FakePool) {
   let (coordinator, pool) = coordinator(size, behavior);
   coordinator.initialize(init_options()).await.unwrap();
   (coordinator, pool)
}
