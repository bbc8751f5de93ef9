pub mod backend;
pub mod types;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use backend::{Backend, Callback, Responder};
use types::{Action, ConnectionId, RequestId, WorkerMessage};

// ---------------------------------------------------------------------------
// Commands sent from callers → dispatcher task
// ---------------------------------------------------------------------------

enum WorkerCmd {
    Post {
        id: RequestId,
        action: Action,
        callback: Callback,
    },
}

// ---------------------------------------------------------------------------
// Worker: Clone + Send + Sync dispatcher handle for one backend connection
// ---------------------------------------------------------------------------

/// Dispatcher for one backend connection.
///
/// `post_action` never blocks and never invokes the callback itself; every callback runs on
/// the dispatcher task. One action may be in flight at a time. Posting while another action
/// is running is a caller error: the new callback gets a terminal `Error { Busy }` and the
/// running action is left alone. Nothing is queued on the caller's behalf.
#[derive(Clone)]
pub struct Worker {
    tx: mpsc::UnboundedSender<WorkerCmd>,
    conn: ConnectionId,
    busy: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    runtime: tokio::runtime::Handle,
}

impl Worker {
    /// Spawn the dispatcher task for `backend` on the current tokio runtime.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<B: Backend>(backend: B) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        let busy = Arc::new(AtomicBool::new(false));
        let runtime = tokio::runtime::Handle::current();

        runtime.spawn(Self::run_loop(Box::new(backend), rx, busy.clone(), conn));
        log::debug!("Worker {} started", conn);

        Worker {
            tx,
            conn,
            busy,
            next_id: Arc::new(AtomicU64::new(1)),
            runtime,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn
    }

    /// True while an action is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Submit `action` and register `callback` for every message it produces.
    pub fn post_action<F>(&self, action: Action, callback: F) -> RequestId
    where
        F: FnMut(WorkerMessage) + Send + 'static,
    {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut callback: Callback = Box::new(callback);

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!(
                "Worker {} {}: {} posted while busy; rejected",
                self.conn,
                id,
                action.name()
            );
            self.runtime.spawn(async move {
                callback(WorkerMessage::Error { cause: Error::Busy });
            });
            return id;
        }

        log::debug!("Worker {} {}: post {}", self.conn, id, action.name());
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(WorkerCmd::Post {
            id,
            action,
            callback,
        }) {
            self.busy.store(false, Ordering::Release);
            let WorkerCmd::Post { mut callback, .. } = cmd;
            log::error!("Worker {} {}: dispatcher gone", self.conn, id);
            self.runtime.spawn(async move {
                callback(WorkerMessage::Error {
                    cause: Error::Disconnected,
                });
            });
        }
        id
    }

    /// Channel form of `post_action`: every message, terminal last, arrives on the receiver.
    pub fn request(&self, action: Action) -> mpsc::UnboundedReceiver<WorkerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.post_action(action, move |msg| {
            let _ = tx.send(msg);
        });
        rx
    }

    /// Run `action` to completion and collect its intermediate messages.
    ///
    /// `Error` and `Unsupported` terminals become `Err`.
    pub async fn perform(&self, action: Action) -> Result<Vec<WorkerMessage>> {
        let mut rx = self.request(action);
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMessage::Done => return Ok(out),
                WorkerMessage::Unsupported => return Err(Error::Unsupported),
                WorkerMessage::Error { cause } => return Err(cause),
                other => out.push(other),
            }
        }
        Err(Error::Disconnected)
    }

    // -- dispatcher task -----------------------------------------------------

    async fn run_loop(
        mut backend: Box<dyn Backend>,
        mut rx: mpsc::UnboundedReceiver<WorkerCmd>,
        busy: Arc<AtomicBool>,
        conn: ConnectionId,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WorkerCmd::Post {
                    id,
                    action,
                    callback,
                } => {
                    let name = action.name();
                    let mut out = Responder::new(id, callback);
                    let result = AssertUnwindSafe(backend.handle(action, &mut out))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            log::error!("Worker {} {}: backend panicked in {}", conn, id, name);
                            Err(Error::Backend(format!("backend panicked during {name}")))
                        });

                    let terminal = WorkerMessage::terminal(result);
                    log::debug!(
                        "Worker {} {}: {} finished with {} after {} messages",
                        conn,
                        id,
                        name,
                        terminal.name(),
                        out.sent()
                    );
                    // Released before the terminal callback so it may post the next action.
                    busy.store(false, Ordering::Release);
                    out.finish(terminal);
                }
            }
        }
        log::debug!("Worker {} exiting", conn);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::{oneshot, Notify};

    use super::*;
    use crate::core::models::{Directory, Uid};

    /// Answers `ListDirectories` with a fixed listing, fails fetches, rejects the rest.
    struct ScriptedBackend {
        dirs: Vec<&'static str>,
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn handle(&mut self, action: Action, out: &mut Responder) -> Result<()> {
            match action {
                Action::ListDirectories => {
                    for name in &self.dirs {
                        out.emit(WorkerMessage::Directory {
                            info: Directory {
                                name: name.to_string(),
                                attributes: vec![],
                            },
                        });
                    }
                    Ok(())
                }
                Action::FetchFullMessages { .. } => {
                    out.emit(WorkerMessage::FullMessage {
                        uid: Uid(1),
                        content: b"x".to_vec(),
                    });
                    // Backends do not get to terminate the stream themselves.
                    out.emit(WorkerMessage::Done);
                    Err(Error::Backend("connection reset".into()))
                }
                _ => Err(Error::Unsupported),
            }
        }
    }

    /// Blocks every action until released.
    struct GatedBackend {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Backend for GatedBackend {
        async fn handle(&mut self, _action: Action, _out: &mut Responder) -> Result<()> {
            self.gate.notified().await;
            Ok(())
        }
    }

    fn names(msgs: &[WorkerMessage]) -> Vec<&'static str> {
        msgs.iter().map(|m| m.name()).collect()
    }

    fn recorder() -> (Arc<Mutex<Vec<WorkerMessage>>>, impl FnMut(WorkerMessage) + Send) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |msg| sink.lock().unwrap().push(msg))
    }

    #[tokio::test]
    async fn streams_intermediate_messages_then_done() {
        let worker = Worker::spawn(ScriptedBackend {
            dirs: vec!["INBOX", "Drafts", "Sent"],
        });
        let msgs = worker.perform(Action::ListDirectories).await.unwrap();
        let dirs: Vec<_> = msgs
            .iter()
            .map(|m| match m {
                WorkerMessage::Directory { info } => info.name.clone(),
                other => panic!("unexpected {}", other.name()),
            })
            .collect();
        assert_eq!(dirs, vec!["INBOX", "Drafts", "Sent"]);
        assert!(!worker.is_busy());
    }

    #[tokio::test]
    async fn exactly_one_terminal_even_if_backend_emits_one() {
        let worker = Worker::spawn(ScriptedBackend { dirs: vec![] });
        let mut rx = worker.request(Action::FetchFullMessages { uids: vec![Uid(1)] });
        let mut seen = Vec::new();
        while let Some(msg) = rx.recv().await {
            seen.push(msg);
        }
        assert_eq!(names(&seen), vec!["FullMessage", "Error"]);
    }

    #[tokio::test]
    async fn unimplemented_action_is_unsupported() {
        let worker = Worker::spawn(ScriptedBackend { dirs: vec![] });
        let err = worker
            .perform(Action::DeleteMessages { uids: vec![Uid(3)] })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported));
    }

    #[tokio::test]
    async fn callback_never_runs_inside_post_action() {
        let worker = Worker::spawn(ScriptedBackend { dirs: vec!["INBOX"] });
        let (log, callback) = recorder();
        worker.post_action(Action::ListDirectories, callback);
        // Current-thread runtime: the dispatcher has not had a chance to run yet.
        assert!(log.lock().unwrap().is_empty());

        while log.lock().unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(names(&log.lock().unwrap()), vec!["Directory", "Done"]);
    }

    #[tokio::test]
    async fn post_while_busy_is_rejected_without_disturbing_in_flight_action() {
        let gate = Arc::new(Notify::new());
        let worker = Worker::spawn(GatedBackend { gate: gate.clone() });

        let mut first = worker.request(Action::ListDirectories);
        assert!(worker.is_busy());
        let mut second = worker.request(Action::FetchDirectoryContents);

        match second.recv().await {
            Some(WorkerMessage::Error { cause: Error::Busy }) => {}
            other => panic!("expected Busy, got {:?}", other.map(|m| m.name())),
        }
        assert!(second.recv().await.is_none());

        gate.notify_one();
        assert!(matches!(first.recv().await, Some(WorkerMessage::Done)));
        assert!(first.recv().await.is_none());
        assert!(!worker.is_busy());
    }

    #[tokio::test]
    async fn terminal_callback_may_post_the_next_action() {
        let worker = Worker::spawn(ScriptedBackend { dirs: vec!["INBOX"] });
        let (tx, rx) = oneshot::channel();
        let next = worker.clone();
        let mut tx = Some(tx);
        worker.post_action(Action::ListDirectories, move |msg| {
            if msg.is_terminal() {
                let mut inner = next.request(Action::ListDirectories);
                let tx = tx.take();
                tokio::spawn(async move {
                    let mut last = None;
                    while let Some(m) = inner.recv().await {
                        last = Some(m.name());
                    }
                    if let Some(tx) = tx {
                        let _ = tx.send(last);
                    }
                });
            }
        });
        assert_eq!(rx.await.unwrap(), Some("Done"));
    }

    #[tokio::test]
    async fn request_ids_increase_per_connection() {
        let worker = Worker::spawn(ScriptedBackend { dirs: vec![] });
        let a = worker.post_action(Action::ListDirectories, |_| {});
        while worker.is_busy() {
            tokio::task::yield_now().await;
        }
        let b = worker.post_action(Action::ListDirectories, |_| {});
        assert!(b > a);
    }
}
