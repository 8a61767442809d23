//! Messages exchanged between the coordinator and a worker.
//!
//! Every request travels as a [`WrappedRequest`] carrying a sequence number.
//! A worker answers each request with exactly one [`WorkerMessage::Response`]
//! echoing that number, and may send any number of [`WorkerMessage::Log`]
//! entries in between. All types serialize to the JSON shape used on the
//! wire, so a worker does not have to live in the same process.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx_sqlite_toolkit::{ReadableMethod, SqliteErrorKind, WritableMethod};
use tokio::sync::{mpsc, oneshot};

use crate::{Error, InitOptions};

/// A call sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
   /// Open the database; exactly one worker receives `is_primary = true`
   #[serde(rename_all = "camelCase")]
   Init {
      options: InitOptions,
      is_primary: bool,
   },
   /// Close the connection and exit
   Close,
   /// Close the connection, delete the database files and exit
   #[serde(rename = "removeDB")]
   RemoveDb,
   /// Execute a readable catalog method
   #[serde(rename = "sqlCall:read")]
   ReadCall { call: ReadableMethod },
   /// Execute a writable catalog method
   #[serde(rename = "sqlCall:write")]
   WriteCall { call: WritableMethod },
}

impl WorkerRequest {
   /// Short description used to prefix errors reported for this request.
   pub fn label(&self) -> String {
      match self {
         WorkerRequest::Init { .. } => "init".to_string(),
         WorkerRequest::Close => "close".to_string(),
         WorkerRequest::RemoveDb => "removeDB".to_string(),
         WorkerRequest::ReadCall { call } => format!("read:{}", call.name()),
         WorkerRequest::WriteCall { call } => format!("write:{}", call.name()),
      }
   }

   /// Whether the worker exits after answering this request.
   pub fn is_terminal(&self) -> bool {
      matches!(self, WorkerRequest::Close | WorkerRequest::RemoveDb)
   }
}

/// A request tagged with the sequence number its response will echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedRequest {
   pub seq: u32,
   pub request: WorkerRequest,
}

/// Severity of a worker log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
   Fatal,
   Error,
   Warn,
   Info,
   Debug,
   Trace,
}

/// A failure as it crosses the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
   pub name: String,
   pub message: String,
   pub stack: Option<String>,
}

impl From<&Error> for SerializedError {
   fn from(error: &Error) -> Self {
      Self {
         name: error.error_code(),
         message: error.to_string(),
         stack: Some(format!("{error:?}")),
      }
   }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
   pub seq: u32,
   pub error: Option<SerializedError>,
   pub error_kind: Option<SqliteErrorKind>,
   #[serde(default)]
   pub response: JsonValue,
}

impl WorkerResponse {
   pub fn ok(seq: u32, response: JsonValue) -> Self {
      Self {
         seq,
         error: None,
         error_kind: None,
         response,
      }
   }

   pub fn failed(seq: u32, error: &Error) -> Self {
      Self {
         seq,
         error: Some(SerializedError::from(error)),
         error_kind: Some(error.kind()),
         response: JsonValue::Null,
      }
   }
}

/// Anything a worker sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
   Log { level: LogLevel, message: String },
   Response(WorkerResponse),
}

/// Payload of a successful read or write call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
   pub result: JsonValue,
   /// Time the worker spent executing the call
   pub duration_ms: f64,
}

/// The coordinator's side of one worker.
#[derive(Debug)]
pub struct WorkerHandle {
   /// Requests to the worker
   pub requests: mpsc::UnboundedSender<WrappedRequest>,
   /// Logs and responses from the worker; closes when the worker exits
   pub messages: mpsc::UnboundedReceiver<WorkerMessage>,
   /// Fires once the worker has released its connection
   pub exited: oneshot::Receiver<()>,
}
