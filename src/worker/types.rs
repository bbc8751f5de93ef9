use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::models::{DirInfo, Directory, Flag, MessageInfo, Uid};
use crate::error::Error;
use crate::search::criteria::SearchCriteria;

/// Identifies one dispatcher connection to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one posted action within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request sent to a backend. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    ListDirectories,
    OpenDirectory { name: String },
    FetchDirectoryContents,
    FetchHeaders { uids: Vec<Uid> },
    FetchFullMessages { uids: Vec<Uid> },
    FetchMessageFlags { uids: Vec<Uid> },
    DeleteMessages { uids: Vec<Uid> },
    FlagMessages { uids: Vec<Uid>, flag: Flag, enable: bool },
    SearchDirectory { criteria: SearchCriteria },
}

impl Action {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::ListDirectories => "ListDirectories",
            Action::OpenDirectory { .. } => "OpenDirectory",
            Action::FetchDirectoryContents => "FetchDirectoryContents",
            Action::FetchHeaders { .. } => "FetchHeaders",
            Action::FetchFullMessages { .. } => "FetchFullMessages",
            Action::FetchMessageFlags { .. } => "FetchMessageFlags",
            Action::DeleteMessages { .. } => "DeleteMessages",
            Action::FlagMessages { .. } => "FlagMessages",
            Action::SearchDirectory { .. } => "SearchDirectory",
        }
    }
}

/// A response streamed back for an action.
///
/// Every action yields zero or more intermediate messages and then exactly one terminal
/// message: `Done`, `Error` or `Unsupported`.
#[derive(Debug)]
pub enum WorkerMessage {
    Directory { info: Directory },
    DirectoryInfo { info: DirInfo },
    DirectoryContents { uids: Vec<Uid> },
    MessageInfo { info: MessageInfo },
    FullMessage { uid: Uid, content: Vec<u8> },
    MessagesDeleted { uids: Vec<Uid> },
    SearchResults { uids: Vec<Uid> },
    Done,
    Error { cause: Error },
    Unsupported,
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerMessage::Done | WorkerMessage::Error { .. } | WorkerMessage::Unsupported
        )
    }

    /// Terminal message for the result of a backend call.
    pub fn terminal(result: Result<(), Error>) -> WorkerMessage {
        match result {
            Ok(()) => WorkerMessage::Done,
            Err(Error::Unsupported) => WorkerMessage::Unsupported,
            Err(cause) => WorkerMessage::Error { cause },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerMessage::Directory { .. } => "Directory",
            WorkerMessage::DirectoryInfo { .. } => "DirectoryInfo",
            WorkerMessage::DirectoryContents { .. } => "DirectoryContents",
            WorkerMessage::MessageInfo { .. } => "MessageInfo",
            WorkerMessage::FullMessage { .. } => "FullMessage",
            WorkerMessage::MessagesDeleted { .. } => "MessagesDeleted",
            WorkerMessage::SearchResults { .. } => "SearchResults",
            WorkerMessage::Done => "Done",
            WorkerMessage::Error { .. } => "Error",
            WorkerMessage::Unsupported => "Unsupported",
        }
    }
}
