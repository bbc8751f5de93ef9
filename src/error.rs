use crate::core::models::Uid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    /// The backend does not implement the requested action.
    #[error("unsupported for this backend")]
    Unsupported,

    /// An action was posted while another one was still in flight on the same connection.
    #[error("worker busy: an action is already in flight")]
    Busy,

    #[error("worker disconnected")]
    Disconnected,

    #[error("unknown message uid {0}")]
    UnknownUid(Uid),

    #[error("no directory selected")]
    NoDirectorySelected,

    #[error("unknown directory: {0}")]
    UnknownDirectory(String),

    #[error("invalid search: {0}")]
    InvalidSearch(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<mailparse::MailParseError> for Error {
    fn from(e: mailparse::MailParseError) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
