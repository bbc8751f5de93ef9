use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexSet;
use tokio::sync::oneshot;

use crate::core::models::Uid;
use crate::worker::types::{Action, WorkerMessage};
use crate::worker::Worker;

/// Append-only destination for exported messages. One call writes one whole record.
pub trait ExportSink: Send + 'static {
    fn write_message(&mut self, uid: Uid, raw: &[u8]) -> io::Result<()>;
}

/// Writes messages in mbox format.
///
/// Each record is a `From nevermail <date>` line, the message with line endings normalised to
/// LF and body lines starting with `From ` escaped as `>From `, then a blank line.
pub struct MboxSink<W> {
    out: W,
}

impl<W: Write> MboxSink<W> {
    pub fn new(out: W) -> Self {
        MboxSink { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> ExportSink for MboxSink<W> {
    fn write_message(&mut self, _uid: Uid, raw: &[u8]) -> io::Result<()> {
        let mut record = Vec::with_capacity(raw.len() + 64);
        writeln!(
            record,
            "From nevermail {}",
            Utc::now().format("%a %b %e %H:%M:%S %Y")
        )?;
        let body = raw.strip_suffix(b"\n").unwrap_or(raw);
        for line in body.split(|b| *b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.starts_with(b"From ") {
                record.push(b'>');
            }
            record.extend_from_slice(line);
            record.push(b'\n');
        }
        record.push(b'\n');
        self.out.write_all(&record)?;
        self.out.flush()
    }
}

/// Linear backoff between fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fetches reissued after an error before giving up.
    pub max_retries: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 10,
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): `(retry - 1) * step`.
    ///
    /// The first retry goes out at once, one step earlier than a plain `retry * step`
    /// schedule; with the defaults the last of the ten retries waits 18s.
    pub fn delay(&self, retry: u32) -> Duration {
        self.step * retry.saturating_sub(1)
    }
}

/// Result of one export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Requested messages that are now in the sink, including ones written by earlier runs.
    pub exported: usize,
    pub requested: usize,
    pub retries: u32,
    pub aborted: bool,
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.aborted {
            write!(
                f,
                "Export stopped after {} retries: exported {} of {} messages.",
                self.retries, self.exported, self.requested
            )
        } else {
            write!(f, "Exported {} of {} messages.", self.exported, self.requested)
        }
    }
}

struct Shared<S> {
    sink: S,
    /// Every uid ever written to the sink.
    written: HashSet<Uid>,
    /// Uids of the current run not yet received.
    pending: IndexSet<Uid>,
}

/// Drains a set of uids into a sink through repeated `FetchFullMessages` actions.
///
/// A uid leaves the working set in the same critical section that writes it, so the sink sees
/// each uid at most once, across retries and across runs.
pub struct Exporter<S> {
    worker: Worker,
    shared: Arc<Mutex<Shared<S>>>,
    policy: RetryPolicy,
}

impl<S: ExportSink> Exporter<S> {
    pub fn new(worker: Worker, sink: S) -> Self {
        Exporter {
            worker,
            shared: Arc::new(Mutex::new(Shared {
                sink,
                written: HashSet::new(),
                pending: IndexSet::new(),
            })),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Shared<S>> {
        lock_shared(&self.shared)
    }

    /// Number of distinct uids written so far.
    pub fn written(&self) -> usize {
        self.lock().written.len()
    }

    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock().sink)
    }

    /// Export `uids`, skipping any already written by this exporter.
    ///
    /// Stops when the backend answers `Done`, even if some uids never arrived, or when the
    /// retry budget is spent.
    pub async fn export(&self, uids: &[Uid]) -> ExportReport {
        let requested: IndexSet<Uid> = uids.iter().copied().collect();
        {
            let mut sh = self.lock();
            let pending = requested
                .iter()
                .copied()
                .filter(|u| !sh.written.contains(u))
                .collect();
            sh.pending = pending;
        }

        let mut retries = 0;
        let mut aborted = false;
        loop {
            let remaining: Vec<Uid> = self.lock().pending.iter().copied().collect();
            if remaining.is_empty() {
                break;
            }
            log::debug!("Fetching {} messages for export", remaining.len());

            match self.fetch(remaining).await {
                Some(WorkerMessage::Done) => break,
                Some(WorkerMessage::Error { cause }) => {
                    if retries >= self.policy.max_retries {
                        log::error!("Export giving up after {} retries: {}", retries, cause);
                        aborted = true;
                        break;
                    }
                    retries += 1;
                    let delay = self.policy.delay(retries);
                    log::warn!(
                        "Export fetch failed ({}); retry {} in {:?}",
                        cause,
                        retries,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Some(WorkerMessage::Unsupported) => {
                    log::error!("Export: fetching messages is unsupported for this backend");
                    aborted = true;
                    break;
                }
                _ => {
                    log::error!("Export: worker went away");
                    aborted = true;
                    break;
                }
            }
        }

        let mut sh = self.lock();
        sh.pending.clear();
        let exported = requested.iter().filter(|u| sh.written.contains(u)).count();
        let report = ExportReport {
            exported,
            requested: requested.len(),
            retries,
            aborted,
        };
        log::info!("{}", report);
        report
    }

    /// Post one fetch and wait for its terminal message.
    async fn fetch(&self, uids: Vec<Uid>) -> Option<WorkerMessage> {
        let shared = self.shared.clone();
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        self.worker
            .post_action(Action::FetchFullMessages { uids }, move |msg| match msg {
                WorkerMessage::FullMessage { uid, content } => {
                    let mut sh = lock_shared(&shared);
                    if !sh.pending.shift_remove(&uid) {
                        log::debug!("Export: ignoring uid {} (not pending)", uid);
                        return;
                    }
                    match sh.sink.write_message(uid, &content) {
                        Ok(()) => {
                            sh.written.insert(uid);
                        }
                        Err(e) => log::warn!("Export: writing uid {} failed: {}", uid, e),
                    }
                }
                msg if msg.is_terminal() => {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(msg);
                    }
                }
                _ => {}
            });
        rx.await.ok()
    }

    pub fn into_sink(self) -> Option<S> {
        Arc::try_unwrap(self.shared)
            .ok()
            .map(|m| m.into_inner().unwrap_or_else(|p| p.into_inner()).sink)
    }
}

fn lock_shared<S>(shared: &Mutex<Shared<S>>) -> MutexGuard<'_, Shared<S>> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
