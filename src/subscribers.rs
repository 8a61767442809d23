//! Error subscriber registry.
//!
//! Every failed call is broadcast to the registrations matching its
//! [`SqliteErrorKind`]. Callbacks run outside the registry lock, so a
//! callback may register new subscriptions; those only see later errors.

use std::sync::Arc;

use parking_lot::Mutex;
use sqlx_sqlite_toolkit::SqliteErrorKind;
use tokio::sync::oneshot;

use crate::SqlError;

type OnceCallback = Box<dyn FnOnce(SqlError) + Send>;
type PersistentCallback = Arc<dyn Fn(SqlError) + Send + Sync>;

enum Callback {
   /// Removed after its first invocation
   Once(OnceCallback),
   Persistent(PersistentCallback),
}

struct Registration {
   kind: SqliteErrorKind,
   callback: Callback,
}

#[derive(Default)]
pub(crate) struct Subscribers {
   registrations: Mutex<Vec<Registration>>,
}

impl Subscribers {
   pub fn subscribe_once(
      &self,
      kind: SqliteErrorKind,
      callback: impl FnOnce(SqlError) + Send + 'static,
   ) {
      self.registrations.lock().push(Registration {
         kind,
         callback: Callback::Once(Box::new(callback)),
      });
   }

   pub fn subscribe(
      &self,
      kind: SqliteErrorKind,
      callback: impl Fn(SqlError) + Send + Sync + 'static,
   ) {
      self.registrations.lock().push(Registration {
         kind,
         callback: Callback::Persistent(Arc::new(callback)),
      });
   }

   /// One-shot subscription delivered through a channel.
   pub fn next_error(&self, kind: SqliteErrorKind) -> oneshot::Receiver<SqlError> {
      let (tx, rx) = oneshot::channel();
      self.subscribe_once(kind, move |error| {
         let _ = tx.send(error);
      });
      rx
   }

   /// Invoke every registration matching `error.kind`.
   pub fn notify(&self, error: &SqlError) {
      let matched: Vec<OnceCallback> = {
         let mut registrations = self.registrations.lock();
         let mut matched = Vec::new();
         let mut kept = Vec::with_capacity(registrations.len());

         for registration in registrations.drain(..) {
            if registration.kind != error.kind {
               kept.push(registration);
               continue;
            }

            match registration.callback {
               Callback::Once(callback) => matched.push(callback),
               Callback::Persistent(callback) => {
                  let invoke = Arc::clone(&callback);
                  matched.push(Box::new(move |error| invoke(error)));
                  kept.push(Registration {
                     kind: registration.kind,
                     callback: Callback::Persistent(callback),
                  });
               }
            }
         }

         *registrations = kept;
         matched
      };

      for callback in matched {
         callback(error.clone());
      }
   }

   #[cfg(test)]
   fn len(&self) -> usize {
      self.registrations.lock().len()
   }
}
