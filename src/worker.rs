//! Inbound rpc workers.
//!
//! Applications register one worker per action name; inbound calls are
//! dispatched to them with the caller's identity, the call arguments, and
//! a [`Responder`] for the reply. A second registration under the same
//! name is rejected, never silently overwritten.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::client::Options;
use crate::conn::Command;
use crate::error::{HeraldError, Result};
use crate::protocol::{Identity, Route};

/// Boxed future returned by a worker invocation.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased worker function.
pub(crate) type WorkerFn = Arc<dyn Fn(Identity, Value, Responder) -> BoxFuture<()> + Send + Sync>;

/// Box a user worker closure into the table's erased shape.
pub(crate) fn wrap_worker<F, Fut>(worker: F) -> WorkerFn
where
    F: Fn(Identity, Value, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |caller, args, responder| Box::pin(worker(caller, args, responder)))
}

/// Mapping from action name to worker, one worker per name.
#[derive(Default)]
pub(crate) struct RpcWorkerTable {
    workers: HashMap<String, WorkerFn>,
}

impl RpcWorkerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Fails without replacing when the name is taken.
    pub(crate) fn insert(&mut self, action: &str, worker: WorkerFn) -> Result<()> {
        if self.workers.contains_key(action) {
            return Err(HeraldError::DuplicateAction(action.to_string()));
        }
        self.workers.insert(action.to_string(), worker);
        Ok(())
    }

    /// Remove a worker, reporting whether one was registered.
    pub(crate) fn remove(&mut self, action: &str) -> bool {
        self.workers.remove(action).is_some()
    }

    pub(crate) fn get(&self, action: &str) -> Option<WorkerFn> {
        self.workers.get(action).cloned()
    }
}

/// One-shot reply handle passed to a worker.
///
/// Every method consumes the responder, so a worker can answer each call
/// at most once; the response frame carries the caller's `actionId` and is
/// routed back to the caller's uid.
pub struct Responder {
    cmd_tx: mpsc::Sender<Command>,
    caller_uid: String,
    action_id: u64,
}

/// Options the original applies to responder frames.
fn response_options() -> Options {
    Options {
        retry: Some(0),
        timeout: Some(std::time::Duration::from_secs(10)),
        ack: false,
    }
}

impl Responder {
    pub(crate) fn new(cmd_tx: mpsc::Sender<Command>, caller_uid: String, action_id: u64) -> Self {
        Self {
            cmd_tx,
            caller_uid,
            action_id,
        }
    }

    /// Answer the call successfully.
    pub async fn ok(self, result: Value) {
        self.send(None, Some(result)).await;
    }

    /// Answer the call with an error message.
    pub async fn err(self, error: impl Into<String>) {
        self.send(Some(Value::String(error.into())), None).await;
    }

    /// Answer with an explicit `{error, result}` pair.
    pub async fn send(self, error: Option<Value>, result: Option<Value>) {
        let command = Command::Write {
            route: Route::RpcResult {
                rpc_result_for: self.caller_uid,
                action_id: self.action_id,
            },
            body: json!({ "error": error, "result": result }),
            opts: response_options(),
            done: None,
        };
        if self.cmd_tx.send(command).await.is_err() {
            tracing::warn!(action_id = self.action_id, "client gone, rpc response dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut table = RpcWorkerTable::new();
        let first = wrap_worker(|_, _, _| async {});
        let second = wrap_worker(|_, _, _| async {});

        assert!(table.insert("sum", first.clone()).is_ok());
        let err = table.insert("sum", second).unwrap_err();
        assert!(matches!(err, HeraldError::DuplicateAction(name) if name == "sum"));

        // The original worker is still the registered one.
        assert!(Arc::ptr_eq(&table.get("sum").unwrap(), &first));
    }

    #[test]
    fn test_remove_reports_presence() {
        let mut table = RpcWorkerTable::new();
        table
            .insert("sum", wrap_worker(|_, _, _| async {}))
            .unwrap();

        assert!(table.remove("sum"));
        assert!(!table.remove("sum"));
        assert!(table.get("sum").is_none());
    }

    #[tokio::test]
    async fn test_responder_builds_result_route() {
        let (tx, mut rx) = mpsc::channel(1);
        let responder = Responder::new(tx, "caller_3".into(), 42);

        responder.ok(json!({"sum": 5})).await;

        match rx.recv().await.unwrap() {
            Command::Write {
                route, body, done, ..
            } => {
                assert_eq!(
                    route,
                    Route::RpcResult {
                        rpc_result_for: "caller_3".into(),
                        action_id: 42,
                    }
                );
                assert_eq!(body, json!({"error": null, "result": {"sum": 5}}));
                assert!(done.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_responder_error_payload() {
        let (tx, mut rx) = mpsc::channel(1);
        let responder = Responder::new(tx, "caller_3".into(), 42);

        responder.err("ACTION_NOT_FOUND").await;

        match rx.recv().await.unwrap() {
            Command::Write { body, .. } => {
                assert_eq!(body, json!({"error": "ACTION_NOT_FOUND", "result": null}));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
