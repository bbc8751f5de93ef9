pub mod dirs;
pub mod messages;

pub use dirs::{DirStore, DirectoryList};
pub use messages::{DeleteOutcome, MessageStore};

use crate::error::{Error, Result};
use crate::worker::types::WorkerMessage;

/// Outcome of a terminal message. Intermediate messages map to `Ok`.
fn terminal_result(msg: WorkerMessage) -> Result<()> {
    match msg {
        WorkerMessage::Error { cause } => Err(cause),
        WorkerMessage::Unsupported => Err(Error::Unsupported),
        _ => Ok(()),
    }
}
