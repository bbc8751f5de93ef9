use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a message, unique within one mailbox.
///
/// Stable until the message is expunged. Some backends renumber on reconnect; callers learn
/// about that through a fresh `DirectoryContents` listing, never by assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Uid {
    fn from(v: u32) -> Self {
        Uid(v)
    }
}

/// System flags a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Seen,
    Recent,
    Answered,
    Flagged,
    Deleted,
    Draft,
}

impl Flag {
    /// Parse a user-facing flag name (`seen`, `answered`, ...), case-insensitively.
    pub fn from_name(name: &str) -> Option<Flag> {
        match name.to_ascii_lowercase().as_str() {
            "seen" | "read" => Some(Flag::Seen),
            "recent" => Some(Flag::Recent),
            "answered" | "replied" => Some(Flag::Answered),
            "flagged" => Some(Flag::Flagged),
            "deleted" => Some(Flag::Deleted),
            "draft" => Some(Flag::Draft),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Flag::Seen => "seen",
            Flag::Recent => "recent",
            Flag::Answered => "answered",
            Flag::Flagged => "flagged",
            Flag::Deleted => "deleted",
            Flag::Draft => "draft",
        };
        f.write_str(s)
    }
}

/// Unordered set of flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags(HashSet<Flag>);

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    pub fn insert(&mut self, flag: Flag) {
        self.0.insert(flag);
    }

    pub fn remove(&mut self, flag: Flag) {
        self.0.remove(&flag);
    }

    /// Copy with `flag` set or cleared.
    pub fn with(&self, flag: Flag, enable: bool) -> Flags {
        let mut out = self.clone();
        if enable {
            out.insert(flag);
        } else {
            out.remove(flag);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Flags(iter.into_iter().collect())
    }
}

/// Envelope fields decoded from the message header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub message_id: String,
    pub date: Option<DateTime<Utc>>,
}

/// MIME structure of a message. Multipart nodes carry their children in `parts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyStructure {
    pub mime_type: String,
    pub mime_subtype: String,
    pub parts: Vec<BodyStructure>,
}

impl BodyStructure {
    pub fn is_multipart(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("multipart")
    }
}

impl Default for BodyStructure {
    fn default() -> Self {
        BodyStructure {
            mime_type: "text".into(),
            mime_subtype: "plain".into(),
            parts: Vec::new(),
        }
    }
}

/// Snapshot of one message as known at fetch time.
///
/// Owned by the message store behind an `Arc`; a re-fetch replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub uid: Uid,
    pub flags: Flags,
    pub envelope: Envelope,
    /// Raw RFC 822 header fields in message order.
    pub headers: Vec<(String, String)>,
    pub body_structure: BodyStructure,
    pub size: usize,
}

impl MessageInfo {
    /// First value of header `name`, compared case-insensitively. Empty when absent.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Copy with `flag` set or cleared.
    pub fn with_flag(&self, flag: Flag, enable: bool) -> MessageInfo {
        MessageInfo {
            flags: self.flags.with(flag, enable),
            ..self.clone()
        }
    }
}

/// A mailbox as reported by `ListDirectories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub name: String,
    pub attributes: Vec<String>,
}

/// Per-directory counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    pub name: String,
    pub exists: usize,
    pub recent: usize,
    pub unseen: usize,
    /// False when the backend cannot count and the client must derive Recent/Unseen itself.
    pub accurate_counts: bool,
}
