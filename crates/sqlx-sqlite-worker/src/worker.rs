//! Worker task: receives requests, executes them on its connection and
//! answers each one exactly once.

use std::path::PathBuf;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{
   CallResult, LogLevel, WorkerHandle, WorkerMessage, WorkerRequest, WorkerResponse,
   WrappedRequest,
};
use crate::{Error, InitOptions, Result, WorkerDatabase, remove_database_files};

/// Spawn a worker on the current tokio runtime.
///
/// The worker stays idle until it receives `init`. It exits after answering
/// `close` or `removeDB`, or when every request sender has been dropped.
///
/// # Panics
///
/// Panics if called outside of a tokio runtime.
pub fn spawn_worker(index: usize) -> WorkerHandle {
   let (request_tx, request_rx) = mpsc::unbounded_channel();
   let (message_tx, message_rx) = mpsc::unbounded_channel();
   let (exit_tx, exit_rx) = oneshot::channel();

   tokio::spawn(async move {
      Worker::new(index, message_tx).run(request_rx).await;
      let _ = exit_tx.send(());
   });

   WorkerHandle {
      requests: request_tx,
      messages: message_rx,
      exited: exit_rx,
   }
}

struct Worker {
   index: usize,
   messages: mpsc::UnboundedSender<WorkerMessage>,
   database: Option<WorkerDatabase>,
   is_primary: bool,
   /// Recorded as soon as `init` arrives so `removeDB` works after a failed open
   database_path: Option<PathBuf>,
}

impl Worker {
   fn new(index: usize, messages: mpsc::UnboundedSender<WorkerMessage>) -> Self {
      Self {
         index,
         messages,
         database: None,
         is_primary: false,
         database_path: None,
      }
   }

   async fn run(mut self, mut requests: mpsc::UnboundedReceiver<WrappedRequest>) {
      while let Some(WrappedRequest { seq, request }) = requests.recv().await {
         let terminal = request.is_terminal();
         let label = request.label();

         let response = match self.handle(request).await {
            Ok(value) => WorkerResponse::ok(seq, value),
            Err(e) => {
               self.log(LogLevel::Error, format!("{label} failed: {e}"));
               WorkerResponse::failed(seq, &e)
            }
         };

         // The coordinator is gone; nobody is left to answer
         if self.messages.send(WorkerMessage::Response(response)).is_err() {
            break;
         }

         if terminal {
            break;
         }
      }

      // Connection is closed on every path out of the loop
      if let Some(database) = self.database.take()
         && let Err(e) = database.close().await
      {
         self.log(LogLevel::Warn, format!("close on exit failed: {e}"));
      }
   }

   async fn handle(&mut self, request: WorkerRequest) -> Result<JsonValue> {
      match request {
         WorkerRequest::Init {
            options,
            is_primary,
         } => {
            self.initialize(&options, is_primary).await?;
            Ok(JsonValue::Null)
         }
         WorkerRequest::ReadCall { call } => {
            let database = self.database.as_mut().ok_or(Error::NotInitialized)?;
            let start = Instant::now();
            let result = database.read(&call).await?;
            timed(result, start)
         }
         WorkerRequest::WriteCall { call } => {
            if !self.is_primary {
               return Err(Error::ReplicaWrite {
                  method: call.name(),
               });
            }

            let database = self.database.as_mut().ok_or(Error::NotInitialized)?;
            let start = Instant::now();
            let result = database.write(&call).await?;
            timed(result, start)
         }
         WorkerRequest::Close => {
            if let Some(database) = self.database.take() {
               database.close().await?;
            }
            self.log(LogLevel::Info, "database closed".to_string());
            Ok(JsonValue::Null)
         }
         WorkerRequest::RemoveDb => {
            if let Some(database) = self.database.take() {
               database.close().await?;
            }

            // Replicas are closed before the primary, which removes the files
            if self.is_primary {
               let path = self.database_path.as_ref().ok_or(Error::NotInitialized)?;
               remove_database_files(path).await?;
               self.log(
                  LogLevel::Warn,
                  format!("removed database files at {}", path.display()),
               );
            }
            Ok(JsonValue::Null)
         }
      }
   }

   async fn initialize(&mut self, options: &InitOptions, is_primary: bool) -> Result<()> {
      if self.database.is_some() {
         return Err(Error::AlreadyInitialized);
      }

      self.is_primary = is_primary;
      self.database_path = Some(options.database_path());

      self.database = Some(WorkerDatabase::open(options, is_primary).await?);
      self.log(
         LogLevel::Info,
         format!(
            "initialized {} (app version {})",
            if is_primary { "primary" } else { "replica" },
            options.app_version
         ),
      );

      Ok(())
   }

   fn log(&self, level: LogLevel, message: String) {
      let _ = self.messages.send(WorkerMessage::Log {
         level,
         message: format!("worker {}: {message}", self.index),
      });
   }
}

fn timed(result: JsonValue, start: Instant) -> Result<JsonValue> {
   let payload = CallResult {
      result,
      duration_ms: start.elapsed().as_secs_f64() * 1000.0,
   };
   Ok(serde_json::to_value(payload)?)
}
