use async_trait::async_trait;

use crate::error::Result;
use crate::worker::types::{Action, RequestId, WorkerMessage};

/// Callback registered for one posted action.
pub type Callback = Box<dyn FnMut(WorkerMessage) + Send + 'static>;

/// A mail backend (IMAP, maildir, notmuch, mbox, ...) driven by the dispatcher.
///
/// `handle` streams intermediate messages through `out` and returns how the action ended:
/// `Ok(())` becomes `Done`, `Err(Error::Unsupported)` becomes `Unsupported`, anything else
/// becomes `Error`. Actions a backend does not implement must return `Error::Unsupported`.
#[async_trait]
pub trait Backend: Send + 'static {
    async fn handle(&mut self, action: Action, out: &mut Responder) -> Result<()>;
}

/// Streams a backend's intermediate messages to the callback of the action in flight.
pub struct Responder {
    id: RequestId,
    callback: Callback,
    sent: usize,
}

impl Responder {
    pub(crate) fn new(id: RequestId, callback: Callback) -> Self {
        Responder {
            id,
            callback,
            sent: 0,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Number of intermediate messages delivered so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Deliver an intermediate message. Terminal variants are owned by the dispatcher and
    /// are dropped here.
    pub fn emit(&mut self, msg: WorkerMessage) {
        if msg.is_terminal() {
            log::warn!(
                "Request {}: backend emitted terminal {}; ignored",
                self.id,
                msg.name()
            );
            return;
        }
        self.sent += 1;
        (self.callback)(msg);
    }

    /// Deliver the terminal message and release the callback.
    pub(crate) fn finish(mut self, msg: WorkerMessage) {
        (self.callback)(msg);
    }
}
