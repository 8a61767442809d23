//! Coordinator properties, checked against scripted workers.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Received, Reply, coordinator, default_reply, init_options, ready, settle};
use futures::future::join_all;
use serde_json::{Value as JsonValue, json};
use sqlx_sqlite_coordinator::{
   Coordinator, CoordinatorConfig, Error, LifecycleState, QueryStatsOptions, SqliteErrorKind,
};
use sqlx_sqlite_toolkit::{GetItem, MessageCursor, PageMessages, PutItem, ReadableMethod};
use sqlx_sqlite_worker::{WorkerMessage, WorkerRequest, WorkerResponse};

fn get(id: &str) -> GetItem {
   GetItem { id: id.into() }
}

fn put(id: &str) -> PutItem {
   PutItem {
      id: id.into(),
      value: json!(id),
   }
}

fn is_get(request: &WorkerRequest, id: &str) -> bool {
   matches!(
      request,
      WorkerRequest::ReadCall { call: ReadableMethod::GetItem(call) } if call.id == id
   )
}

fn reads(received: &[Received]) -> usize {
   received.iter().filter(|r| r.read().is_some()).count()
}

fn written_ids(received: &[Received]) -> Vec<String> {
   received
      .iter()
      .filter_map(Received::write)
      .map(|call| match call {
         sqlx_sqlite_toolkit::WritableMethod::PutItem(put) => put.id.clone(),
         other => other.name().to_string(),
      })
      .collect()
}

/// Reads are held, everything else answers immediately.
fn hold_reads(worker: usize, request: &WorkerRequest) -> Reply {
   match request {
      WorkerRequest::ReadCall { .. } => Reply::Hold,
      _ => default_reply(worker, request),
   }
}

// ─── Routing ───

#[tokio::test]
async fn writes_only_reach_the_primary() {
   let (coordinator, pool) = ready(4, default_reply).await;

   let writes = (0..10).map(|n| coordinator.write(put(&n.to_string())));
   for result in join_all(writes).await {
      result.unwrap();
   }

   let received = pool.received();
   let writers: HashSet<_> = received
      .iter()
      .filter(|r| r.write().is_some())
      .map(|r| r.worker)
      .collect();
   assert_eq!(writers, HashSet::from([0]));
   assert_eq!(written_ids(&received).len(), 10);
}

#[tokio::test]
async fn concurrent_reads_spread_across_workers() {
   let (coordinator, pool) = ready(4, hold_reads).await;

   let tasks: Vec<_> = (0..4)
      .map(|n| {
         let coordinator = coordinator.clone();
         tokio::spawn(async move { coordinator.read(get(&n.to_string())).await })
      })
      .collect();

   pool.wait_until("four reads", |received| reads(received) == 4).await;
   assert_eq!(coordinator.worker_loads(), vec![1, 1, 1, 1]);
   assert_eq!(coordinator.pending_requests(), 4);

   let readers: HashSet<_> = pool
      .received()
      .iter()
      .filter(|r| r.read().is_some())
      .map(|r| r.worker)
      .collect();
   assert_eq!(readers, HashSet::from([0, 1, 2, 3]));

   for received in pool.received().iter().filter(|r| r.read().is_some()) {
      pool.reply(received.worker, received.seq, Reply::ok());
   }
   for task in tasks {
      assert_eq!(task.await.unwrap().unwrap(), None);
   }
   assert_eq!(coordinator.worker_loads(), vec![0, 0, 0, 0]);
   assert_eq!(coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn paging_calls_stay_on_the_primary() {
   let (coordinator, pool) = ready(4, hold_reads).await;

   // Occupy workers 0..=2 so worker 3 is the least loaded
   let mut tasks = Vec::new();
   for n in 0..3 {
      let coordinator = coordinator.clone();
      tasks.push(tokio::spawn(async move {
         coordinator.read(get(&n.to_string())).await.map(|_| ())
      }));
   }
   pool.wait_until("three reads", |received| reads(received) == 3).await;

   let cursor = MessageCursor {
      run_id: "abc".into(),
      count: 2,
      done: false,
   };
   for call in [PageMessages::default(), PageMessages::after(cursor)] {
      let coordinator = coordinator.clone();
      tasks.push(tokio::spawn(async move { coordinator.read(call).await.map(|_| ()) }));
   }
   pool.wait_until("paging reads", |received| reads(received) == 5).await;

   let paging_workers: Vec<_> = pool
      .received()
      .iter()
      .filter(|r| r.read().is_some_and(ReadableMethod::is_paging))
      .map(|r| r.worker)
      .collect();
   assert_eq!(paging_workers, vec![0, 0]);
   assert_eq!(coordinator.worker_loads(), vec![3, 1, 1, 0]);

   for task in &tasks {
      task.abort();
   }
}

// ─── Write gate ───

#[tokio::test]
async fn paused_writes_wait_and_keep_issue_order() {
   let (coordinator, pool) = ready(4, default_reply).await;

   coordinator.pause_write_access().unwrap();
   assert!(coordinator.is_write_access_paused());

   let mut tasks = Vec::new();
   for id in ["a", "b", "c"] {
      let coordinator = coordinator.clone();
      tasks.push(tokio::spawn(async move { coordinator.write(put(id)).await }));
      settle().await;
   }

   assert!(written_ids(&pool.received()).is_empty());
   assert!(tasks.iter().all(|task| !task.is_finished()));

   coordinator.resume_write_access().unwrap();
   for task in tasks {
      task.await.unwrap().unwrap();
   }

   assert_eq!(written_ids(&pool.received_by(0)), vec!["a", "b", "c"]);
   assert!(!coordinator.is_write_access_paused());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn held_writes_reach_the_primary_in_issue_order_across_threads() {
   let (coordinator, pool) = ready(1, default_reply).await;
   let ids: Vec<String> = (0..32).map(|n| n.to_string()).collect();

   coordinator.pause_write_access().unwrap();
   let mut tasks = Vec::new();
   for (n, id) in ids.iter().enumerate() {
      let writer = coordinator.clone();
      let id = id.clone();
      tasks.push(tokio::spawn(async move { writer.write(put(&id)).await }));

      while coordinator.held_writes() <= n {
         tokio::time::sleep(Duration::from_millis(1)).await;
      }
   }

   coordinator.resume_write_access().unwrap();
   for task in tasks {
      tokio::time::timeout(Duration::from_secs(5), task)
         .await
         .unwrap()
         .unwrap()
         .unwrap();
   }

   assert_eq!(written_ids(&pool.received_by(0)), ids);
   assert_eq!(coordinator.held_writes(), 0);
}

#[tokio::test]
async fn write_dispatched_before_pause_completes() {
   let (coordinator, pool) = ready(2, |worker, request| match request {
      WorkerRequest::WriteCall { .. } => Reply::Hold,
      _ => default_reply(worker, request),
   })
   .await;

   let in_flight = tokio::spawn({
      let coordinator = coordinator.clone();
      async move { coordinator.write(put("early")).await }
   });
   pool.wait_until("early write", |received| written_ids(received).len() == 1).await;

   coordinator.pause_write_access().unwrap();
   let seq = pool.received().last().unwrap().seq;
   pool.reply(0, seq, Reply::ok());

   tokio::time::timeout(Duration::from_secs(5), in_flight)
      .await
      .unwrap()
      .unwrap()
      .unwrap();
   assert!(coordinator.is_write_access_paused());
}

#[tokio::test]
async fn reads_ignore_the_gate() {
   let (coordinator, _pool) = ready(2, default_reply).await;

   coordinator.pause_write_access().unwrap();
   assert_eq!(coordinator.read(get("1")).await.unwrap(), None);
}

#[tokio::test]
async fn gate_misuse_is_fatal() {
   let (coordinator, _pool) = ready(1, default_reply).await;

   let err = coordinator.resume_write_access().unwrap_err();
   assert!(matches!(err, Error::WriteAccessNotPaused));
   assert!(err.is_fatal());

   coordinator.pause_write_access().unwrap();
   let err = coordinator.pause_write_access().unwrap_err();
   assert!(matches!(err, Error::WriteAccessAlreadyPaused));
   assert!(err.is_fatal());
}

// ─── Correlation ───

#[tokio::test]
async fn duplicate_response_desyncs_the_coordinator() {
   let (coordinator, pool) = ready(2, |worker, request| {
      if is_get(request, "1") {
         Reply::Call {
            result: json!({ "id": "1", "value": "first" }),
            duration_ms: 1.0,
         }
      } else {
         default_reply(worker, request)
      }
   })
   .await;

   let item = coordinator.read(get("1")).await.unwrap().unwrap();
   assert_eq!(item.value, json!("first"));

   let answered = pool.received().into_iter().find(|r| r.read().is_some()).unwrap();
   pool.send(
      answered.worker,
      WorkerMessage::Response(WorkerResponse::ok(answered.seq, JsonValue::Null)),
   );
   settle().await;

   let err = coordinator.read(get("1")).await.unwrap_err();
   assert!(matches!(err, Error::ProtocolDesync { seq } if seq == answered.seq));
   assert!(err.is_fatal());

   let err = coordinator.write(put("1")).await.unwrap_err();
   assert!(matches!(err, Error::ProtocolDesync { .. }));
}

#[tokio::test]
async fn crashed_worker_rejects_in_flight_calls() {
   let (coordinator, pool) = ready(2, hold_reads).await;

   let in_flight = tokio::spawn({
      let coordinator = coordinator.clone();
      async move { coordinator.read(get("1")).await }
   });
   pool.wait_until("read", |received| reads(received) == 1).await;
   assert_eq!(coordinator.worker_loads(), vec![1, 0]);

   pool.crash(0);

   let err = in_flight.await.unwrap().unwrap_err();
   assert!(matches!(err, Error::WorkerExited { worker: 0 }));
   assert_eq!(coordinator.worker_loads(), vec![0, 0]);
   assert_eq!(coordinator.pending_requests(), 0);

   let err = coordinator.write(put("1")).await.unwrap_err();
   assert!(matches!(err, Error::WorkerExited { worker: 0 }));
}

#[tokio::test]
async fn worker_logs_are_not_responses() {
   let (coordinator, pool) = ready(1, default_reply).await;

   pool.send(
      0,
      WorkerMessage::Log {
         level: sqlx_sqlite_worker::LogLevel::Fatal,
         message: "disk full".into(),
      },
   );
   settle().await;

   assert_eq!(coordinator.read(get("1")).await.unwrap(), None);
}

// ─── Errors ───

#[tokio::test]
async fn errors_reach_caller_and_subscribers() {
   let (coordinator, _pool) = ready(2, |worker, request| {
      if is_get(request, "corrupt") {
         Reply::fail(SqliteErrorKind::Corrupted, "database disk image is malformed")
      } else if is_get(request, "unknown") {
         Reply::Fail {
            kind: None,
            message: "no such table: items".into(),
         }
      } else {
         default_reply(worker, request)
      }
   })
   .await;

   let first = coordinator.when_corrupted();
   let second = coordinator.when_corrupted();
   let mut readonly = coordinator.when_readonly();

   let unknown = Arc::new(AtomicUsize::new(0));
   coordinator.on_unknown_sql_error({
      let unknown = Arc::clone(&unknown);
      move |error| {
         assert_eq!(error.message, "read:getItem: no such table: items");
         unknown.fetch_add(1, Ordering::SeqCst);
      }
   });

   let err = coordinator.read(get("corrupt")).await.unwrap_err();
   assert_eq!(err.kind(), Some(SqliteErrorKind::Corrupted));
   assert_eq!(err.to_string(), "read:getItem: database disk image is malformed");
   assert_eq!(err.error_code(), "SQLITE_ERROR");

   let Error::Sql(sql) = &err else {
      panic!("expected a worker error, got {err:?}");
   };
   assert_eq!(sql.stack.as_deref(), Some("read:getItem: at fake worker"));

   assert_eq!(first.await.unwrap(), *sql);
   assert_eq!(second.await.unwrap(), *sql);
   assert!(readonly.try_recv().is_err());

   // One-shot subscriptions are gone; a new one sees the next event only
   let third = coordinator.when_corrupted();
   coordinator.read(get("corrupt")).await.unwrap_err();
   assert_eq!(third.await.unwrap().kind, SqliteErrorKind::Corrupted);

   for _ in 0..2 {
      let err = coordinator.read(get("unknown")).await.unwrap_err();
      assert_eq!(err.kind(), Some(SqliteErrorKind::Unknown));
   }
   assert_eq!(unknown.load(Ordering::SeqCst), 2);
}

// ─── Query statistics ───

#[tokio::test]
async fn stats_accumulate_and_reset() {
   let (coordinator, _pool) = ready(2, |worker, request| match request {
      WorkerRequest::ReadCall {
         call: ReadableMethod::GetItem(call),
      } => Reply::Call {
         result: JsonValue::Null,
         duration_ms: call.id.parse().unwrap(),
      },
      _ => default_reply(worker, request),
   })
   .await;

   // Not tracked before start
   coordinator.read(get("100")).await.unwrap();
   assert!(coordinator.query_stats().is_none());

   coordinator.start_tracking_query_stats();
   for ms in ["10", "30", "20"] {
      coordinator.read(get(ms)).await.unwrap();
   }
   coordinator.write(put("x")).await.unwrap();

   let stats = coordinator.query_stats().unwrap();
   assert_eq!(stats.keys().collect::<Vec<_>>(), vec!["getItem", "putItem"]);

   let summary = coordinator
      .stop_tracking_query_stats(QueryStatsOptions {
         max_queries_to_log: Some(1),
         epoch_name: Some("test".into()),
      })
      .unwrap();
   assert_eq!(summary.queries.len(), 1);

   let (name, get_item) = &summary.queries[0];
   assert_eq!(name, "getItem");
   assert_eq!(get_item.count, 3);
   assert_eq!(get_item.cumulative, Duration::from_millis(60));
   assert_eq!(get_item.max, Duration::from_millis(30));
   assert_eq!(summary.total, Duration::from_millis(61));

   assert!(coordinator.query_stats().is_none());
   assert!(
      coordinator
         .stop_tracking_query_stats(QueryStatsOptions::default())
         .is_none()
   );

   coordinator.start_tracking_query_stats();
   assert!(coordinator.query_stats().unwrap().is_empty());
}

// ─── Lifecycle ───

#[tokio::test]
async fn primary_initializes_before_replicas() {
   let (coordinator, pool) = coordinator(4, |worker, request| match request {
      WorkerRequest::Init { .. } if worker == 0 => Reply::Hold,
      _ => default_reply(worker, request),
   });

   let init = tokio::spawn({
      let coordinator = coordinator.clone();
      async move { coordinator.initialize(init_options()).await }
   });
   pool.wait_until("primary init", |received| received.len() == 1).await;
   settle().await;

   assert_eq!(coordinator.state(), LifecycleState::Initializing);
   let received = pool.received();
   assert_eq!(received.len(), 1);
   assert!(matches!(
      received[0].request,
      WorkerRequest::Init {
         is_primary: true,
         ..
      }
   ));
   assert_eq!(received[0].worker, 0);

   // Calls issued during init wait for it
   let early_read = tokio::spawn({
      let coordinator = coordinator.clone();
      async move { coordinator.read(get("1")).await }
   });
   settle().await;
   assert!(!early_read.is_finished());

   pool.reply(0, received[0].seq, Reply::Value(JsonValue::Null));
   init.await.unwrap().unwrap();
   assert_eq!(coordinator.state(), LifecycleState::Ready);

   let replicas: Vec<_> = pool
      .received()
      .into_iter()
      .filter(|r| r.is_init() && r.worker != 0)
      .map(|r| r.request)
      .collect();
   assert_eq!(replicas.len(), 3);
   assert!(
      replicas
         .iter()
         .all(|request| matches!(request, WorkerRequest::Init { is_primary: false, .. }))
   );

   assert_eq!(early_read.await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn calls_before_initialize_fail() {
   let (coordinator, pool) = coordinator(2, default_reply);

   assert!(matches!(coordinator.read(get("1")).await, Err(Error::Uninitialized)));
   assert!(matches!(coordinator.write(put("1")).await, Err(Error::Uninitialized)));
   assert!(matches!(coordinator.close().await, Err(Error::Uninitialized)));
   assert!(matches!(coordinator.remove_db().await, Err(Error::Uninitialized)));
   assert!(pool.received().is_empty());
   assert_eq!(coordinator.state(), LifecycleState::Uninitialized);
}

#[tokio::test]
async fn initialize_twice_fails_without_side_effects() {
   let (coordinator, pool) = ready(4, default_reply).await;

   let err = coordinator.initialize(init_options()).await.unwrap_err();
   assert!(matches!(err, Error::AlreadyInitialized));
   assert_eq!(pool.received().iter().filter(|r| r.is_init()).count(), 4);
   assert_eq!(coordinator.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn close_terminates_replicas_before_primary() {
   let (coordinator, pool) = ready(4, default_reply).await;

   coordinator.close().await.unwrap();
   assert_eq!(coordinator.state(), LifecycleState::Closed);

   let closes: Vec<_> = pool
      .received()
      .into_iter()
      .filter(|r| matches!(r.request, WorkerRequest::Close))
      .map(|r| r.worker)
      .collect();
   assert_eq!(closes.len(), 4);
   assert_eq!(closes.last(), Some(&0));

   assert!(matches!(coordinator.read(get("1")).await, Err(Error::Uninitialized)));
   assert!(matches!(coordinator.close().await, Err(Error::Uninitialized)));
   assert!(matches!(
      coordinator.initialize(init_options()).await,
      Err(Error::AlreadyInitialized)
   ));
}

#[tokio::test]
async fn failed_initialize_allows_remove_db() {
   let (coordinator, pool) = coordinator(3, |worker, request| match request {
      WorkerRequest::Init { .. } if worker == 0 => {
         Reply::fail(SqliteErrorKind::Corrupted, "file is not a database")
      }
      _ => default_reply(worker, request),
   });
   let corrupted = coordinator.when_corrupted();

   let err = coordinator.initialize(init_options()).await.unwrap_err();
   assert_eq!(err.kind(), Some(SqliteErrorKind::Corrupted));
   assert_eq!(err.to_string(), "init: file is not a database");
   assert_eq!(corrupted.await.unwrap().kind, SqliteErrorKind::Corrupted);

   assert_eq!(coordinator.state(), LifecycleState::Failed);
   assert_eq!(pool.received().len(), 1, "replicas must not be initialized");

   assert!(matches!(coordinator.read(get("1")).await, Err(Error::Uninitialized)));
   assert!(matches!(
      coordinator.initialize(init_options()).await,
      Err(Error::AlreadyInitialized)
   ));

   coordinator.remove_db().await.unwrap();
   assert_eq!(coordinator.state(), LifecycleState::Closed);

   let removed: Vec<_> = pool
      .received()
      .into_iter()
      .filter(|r| matches!(r.request, WorkerRequest::RemoveDb))
      .map(|r| r.worker)
      .collect();
   assert_eq!(removed.len(), 3);
   assert_eq!(removed.last(), Some(&0));
}

#[tokio::test]
async fn close_after_failed_initialize_succeeds() {
   let (coordinator, _pool) = coordinator(2, |worker, request| match request {
      WorkerRequest::Init { .. } => Reply::fail(SqliteErrorKind::Readonly, "readonly database"),
      WorkerRequest::Close => Reply::fail(SqliteErrorKind::Unknown, "not open"),
      _ => default_reply(worker, request),
   });

   coordinator.initialize(init_options()).await.unwrap_err();
   coordinator.close().await.unwrap();
   assert_eq!(coordinator.state(), LifecycleState::Closed);
}

#[test]
fn empty_pool_is_rejected() {
   let result = Coordinator::with_workers(CoordinatorConfig::default(), Vec::new());
   assert!(matches!(result, Err(Error::EmptyPool)));
}
