use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::UiConfig;
use crate::core::mime;
use crate::core::models::{DirInfo, Directory, Flag, Flags, MessageInfo, Uid};
use crate::error::{Error, Result};
use crate::search::{self, MessageSource};
use crate::worker::backend::{Backend, Responder};
use crate::worker::types::{Action, WorkerMessage};

struct StoredMessage {
    flags: Flags,
    raw: Arc<[u8]>,
}

/// One mailbox held in memory. Shared between the backend and the search pool.
#[derive(Default)]
pub struct Folder {
    messages: RwLock<IndexMap<Uid, StoredMessage>>,
}

impl Folder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uid: Uid, flags: Flags, raw: impl Into<Arc<[u8]>>) {
        self.write().insert(
            uid,
            StoredMessage {
                flags,
                raw: raw.into(),
            },
        );
    }

    /// Uids in ascending order.
    pub fn uids(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.read().keys().copied().collect();
        uids.sort();
        uids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.read().contains_key(&uid)
    }

    /// Remove `uid`, returning whether it was present.
    pub fn remove(&self, uid: Uid) -> bool {
        self.write().shift_remove(&uid).is_some()
    }

    pub fn set_flag(&self, uid: Uid, flag: Flag, enable: bool) -> Result<()> {
        let mut messages = self.write();
        let msg = messages.get_mut(&uid).ok_or(Error::UnknownUid(uid))?;
        msg.flags = msg.flags.with(flag, enable);
        Ok(())
    }

    pub fn dir_info(&self, name: &str) -> DirInfo {
        let messages = self.read();
        DirInfo {
            name: name.to_string(),
            exists: messages.len(),
            recent: messages.values().filter(|m| m.flags.has(Flag::Recent)).count(),
            unseen: messages.values().filter(|m| !m.flags.has(Flag::Seen)).count(),
            accurate_counts: true,
        }
    }

    fn stored(&self, uid: Uid) -> Result<(Flags, Arc<[u8]>)> {
        self.read()
            .get(&uid)
            .map(|m| (m.flags.clone(), m.raw.clone()))
            .ok_or(Error::UnknownUid(uid))
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<Uid, StoredMessage>> {
        self.messages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<Uid, StoredMessage>> {
        self.messages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageSource for Folder {
    fn flags(&self, uid: Uid) -> Result<Flags> {
        Ok(self.stored(uid)?.0)
    }

    fn message_info(&self, uid: Uid) -> Result<MessageInfo> {
        let (flags, raw) = self.stored(uid)?;
        mime::parse_message_info(uid, flags, &raw)
    }

    fn body_part(&self, uid: Uid, path: &[usize]) -> Result<String> {
        mime::body_part(&self.stored(uid)?.1, path)
    }

    fn raw(&self, uid: Uid) -> Result<Vec<u8>> {
        Ok(self.stored(uid)?.1.to_vec())
    }
}

/// In-process backend over named folders of raw RFC 5322 messages.
///
/// Implements every action and reports exact directory counts.
pub struct MemoryBackend {
    folders: IndexMap<String, Arc<Folder>>,
    selected: Option<(String, Arc<Folder>)>,
    next_uid: u32,
    can_delete: bool,
    pool_width: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            folders: IndexMap::new(),
            selected: None,
            next_uid: 1,
            can_delete: true,
            pool_width: search::default_pool_width(),
        }
    }

    /// A backend whose searches run on the pool width `ui` asks for.
    pub fn configured(ui: &UiConfig) -> Self {
        Self::new().with_pool_width(ui.pool_width())
    }

    /// A backend that answers `DeleteMessages` with `Unsupported`.
    pub fn without_delete(mut self) -> Self {
        self.can_delete = false;
        self
    }

    pub fn with_pool_width(mut self, width: usize) -> Self {
        self.pool_width = width.max(1);
        self
    }

    pub fn with_folder(mut self, name: &str) -> Self {
        self.folder_or_insert(name);
        self
    }

    /// Store `raw` in `folder` (created when missing) under a fresh uid.
    pub fn add_message(&mut self, folder: &str, flags: &[Flag], raw: &[u8]) -> Uid {
        let uid = Uid(self.next_uid);
        self.next_uid += 1;
        self.folder_or_insert(folder)
            .insert(uid, flags.iter().copied().collect(), raw);
        uid
    }

    /// Shared handle to a folder; stays valid after the backend moves into a worker.
    pub fn folder(&self, name: &str) -> Option<Arc<Folder>> {
        self.folders.get(name).cloned()
    }

    fn folder_or_insert(&mut self, name: &str) -> Arc<Folder> {
        self.folders
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Folder::new()))
            .clone()
    }

    fn selected(&self) -> Result<&(String, Arc<Folder>)> {
        self.selected.as_ref().ok_or(Error::NoDirectorySelected)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn handle(&mut self, action: Action, out: &mut Responder) -> Result<()> {
        match action {
            Action::ListDirectories => {
                for name in self.folders.keys() {
                    out.emit(WorkerMessage::Directory {
                        info: Directory {
                            name: name.clone(),
                            attributes: vec![],
                        },
                    });
                }
                Ok(())
            }
            Action::OpenDirectory { name } => {
                let folder = self
                    .folders
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownDirectory(name.clone()))?;
                out.emit(WorkerMessage::DirectoryInfo {
                    info: folder.dir_info(&name),
                });
                self.selected = Some((name, folder));
                Ok(())
            }
            Action::FetchDirectoryContents => {
                let (_, folder) = self.selected()?;
                out.emit(WorkerMessage::DirectoryContents {
                    uids: folder.uids(),
                });
                Ok(())
            }
            Action::FetchHeaders { uids } | Action::FetchMessageFlags { uids } => {
                let (_, folder) = self.selected()?;
                for uid in uids {
                    match folder.message_info(uid) {
                        Ok(info) => out.emit(WorkerMessage::MessageInfo { info }),
                        Err(e) => log::warn!("Skipping headers of uid {}: {}", uid, e),
                    }
                }
                Ok(())
            }
            Action::FetchFullMessages { uids } => {
                let (_, folder) = self.selected()?;
                for uid in uids {
                    let content = folder.raw(uid)?;
                    out.emit(WorkerMessage::FullMessage { uid, content });
                }
                Ok(())
            }
            Action::DeleteMessages { uids } => {
                if !self.can_delete {
                    return Err(Error::Unsupported);
                }
                let (_, folder) = self.selected()?;
                let (deleted, missing): (Vec<Uid>, Vec<Uid>) =
                    uids.into_iter().partition(|uid| folder.remove(*uid));
                if !deleted.is_empty() {
                    out.emit(WorkerMessage::MessagesDeleted { uids: deleted });
                }
                match missing.first() {
                    Some(uid) => Err(Error::UnknownUid(*uid)),
                    None => Ok(()),
                }
            }
            Action::FlagMessages { uids, flag, enable } => {
                let (_, folder) = self.selected()?;
                for uid in uids {
                    folder.set_flag(uid, flag, enable)?;
                    out.emit(WorkerMessage::MessageInfo {
                        info: folder.message_info(uid)?,
                    });
                }
                Ok(())
            }
            Action::SearchDirectory { criteria } => {
                let (_, folder) = self.selected()?;
                let folder = folder.clone();
                let uids = folder.uids();
                let mut found = search::search(folder, &uids, &criteria, self.pool_width).await;
                found.sort();
                out.emit(WorkerMessage::SearchResults { uids: found });
                Ok(())
            }
        }
    }
}
