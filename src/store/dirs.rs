use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use regex::Regex;

use super::terminal_result;
use crate::config::{AccountConfig, UiConfig, UiConfigResolver};
use crate::core::models::Directory;
use crate::error::Result;
use crate::store::messages::MessageStore;
use crate::worker::types::{Action, WorkerMessage};
use crate::worker::Worker;

/// The directory listing of one account and the message store bound to each opened directory.
#[derive(Default)]
pub struct DirStore {
    dirs: IndexMap<String, Directory>,
    stores: HashMap<String, MessageStore>,
}

impl DirStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listing. Bound message stores are kept.
    pub fn update(&mut self, dirs: Vec<Directory>) {
        self.dirs = dirs.into_iter().map(|d| (d.name.clone(), d)).collect();
    }

    pub fn list(&self) -> Vec<String> {
        self.dirs.keys().cloned().collect()
    }

    pub fn directory(&self, name: &str) -> Option<&Directory> {
        self.dirs.get(name)
    }

    pub fn set_msg_store(&mut self, name: &str, store: MessageStore) {
        self.stores.insert(name.to_string(), store);
    }

    pub fn msg_store(&self, name: &str) -> Option<MessageStore> {
        self.stores.get(name).cloned()
    }
}

/// True when `name` matches any pattern: an exact name or `~REGEX`.
/// An invalid regex matches nothing.
pub fn folder_matches(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match p.strip_prefix('~') {
        Some(re) => match Regex::new(re) {
            Ok(re) => re.is_match(name),
            Err(e) => {
                log::warn!("Ignoring folder pattern {:?}: {}", p, e);
                false
            }
        },
        None => p == name,
    })
}

/// Apply the account's inclusion/exclusion filters and sort order to `all`.
/// `selected` stays visible whatever the filters say.
fn visible_dirs(all: &[String], account: &AccountConfig, selected: Option<&str>) -> Vec<String> {
    let mut dirs: Vec<String> = all
        .iter()
        .filter(|name| {
            if selected == Some(name.as_str()) {
                return true;
            }
            let included = account.folders.is_empty() || folder_matches(name, &account.folders);
            included && !folder_matches(name, &account.folders_exclude)
        })
        .cloned()
        .collect();

    if account.enable_folders_sort {
        let rank = |name: &String| {
            account
                .folders_sort
                .iter()
                .position(|s| s == name)
                .unwrap_or(usize::MAX)
        };
        dirs.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
    }
    dirs
}

#[derive(Default)]
struct ListState {
    store: DirStore,
    visible: Vec<String>,
    selected: Option<String>,
    selecting: Option<String>,
    /// Bumped on every `select`; a pending selection only proceeds if it is still current.
    generation: u64,
    /// An `OpenDirectory` is in flight.
    opening: bool,
    /// Selection whose delay passed while another open was in flight.
    queued: Option<(String, u64)>,
}

/// Directory list of one account with debounced selection.
#[derive(Clone)]
pub struct DirectoryList {
    state: Arc<Mutex<ListState>>,
    worker: Worker,
    account: Arc<AccountConfig>,
    ui: Arc<UiConfigResolver>,
    /// Account-level settings, resolved once.
    account_ui: Arc<UiConfig>,
    runtime: tokio::runtime::Handle,
}

impl DirectoryList {
    /// Must be called inside a tokio runtime.
    pub fn new(worker: Worker, account: AccountConfig, ui: UiConfigResolver) -> Self {
        let account_ui = ui.for_account(&account.name);
        DirectoryList {
            state: Arc::new(Mutex::new(ListState::default())),
            worker,
            account: Arc::new(account),
            ui: Arc::new(ui),
            account_ui: Arc::new(account_ui),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Visible directories after filtering and sorting.
    pub fn list(&self) -> Vec<String> {
        self.lock().visible.clone()
    }

    /// Text to show instead of an empty list.
    pub fn placeholder(&self) -> Option<&str> {
        if self.lock().visible.is_empty() {
            Some(&self.account_ui.empty_dirlist)
        } else {
            None
        }
    }

    pub fn selected(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    /// Directory whose selection is waiting on the debounce or the backend.
    pub fn selecting(&self) -> Option<String> {
        self.lock().selecting.clone()
    }

    pub fn msg_store(&self, name: &str) -> Option<MessageStore> {
        self.lock().store.msg_store(name)
    }

    pub fn set_msg_store(&self, name: &str, store: MessageStore) {
        self.lock().store.set_msg_store(name, store);
    }

    pub fn selected_msg_store(&self) -> Option<MessageStore> {
        let st = self.lock();
        st.selected.as_deref().and_then(|name| st.store.msg_store(name))
    }

    /// Fetch the directory listing. `done` receives the visible list.
    pub fn update_list<F>(&self, done: F)
    where
        F: FnOnce(Result<Vec<String>>) + Send + 'static,
    {
        let list = self.clone();
        let mut dirs = Vec::new();
        let mut done = Some(done);
        self.worker
            .post_action(Action::ListDirectories, move |msg| match msg {
                WorkerMessage::Directory { info } => dirs.push(info),
                msg if msg.is_terminal() => {
                    let result = terminal_result(msg).map(|()| {
                        let mut st = list.lock();
                        st.store.update(std::mem::take(&mut dirs));
                        st.visible =
                            visible_dirs(&st.store.list(), &list.account, st.selected.as_deref());
                        log::debug!(
                            "{}: {} directories, {} visible",
                            list.account.name,
                            st.store.list().len(),
                            st.visible.len()
                        );
                        st.visible.clone()
                    });
                    if let Err(e) = &result {
                        log::error!("{}: listing directories failed: {}", list.account.name, e);
                    }
                    if let Some(cb) = done.take() {
                        cb(result);
                    }
                }
                _ => {}
            });
    }

    /// Ask for `name` to become the open directory.
    ///
    /// `OpenDirectory` is posted once the folder's configured delay passes without another
    /// `select`; earlier pending selections are dropped. If an open is still in flight the
    /// newest selection is posted when it finishes, and the older open no longer changes
    /// `selected`.
    pub fn select(&self, name: &str) {
        let generation = {
            let mut st = self.lock();
            st.generation += 1;
            st.selecting = Some(name.to_string());
            st.generation
        };
        let list = self.clone();
        let name = name.to_string();
        let delay = self.ui.for_folder(&name).dirlist_delay;
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut st = list.lock();
                if st.generation != generation {
                    log::debug!("Selection of {} superseded", name);
                    return;
                }
                if st.opening {
                    log::debug!("Selection of {} waits for the open in flight", name);
                    st.queued = Some((name, generation));
                    return;
                }
                st.opening = true;
            }
            list.open(name, generation);
        });
    }

    fn open(&self, name: String, generation: u64) {
        let store = self.msg_store(&name).unwrap_or_else(|| {
            MessageStore::new(self.worker.clone(), &name, &self.ui.for_folder(&name))
        });
        let list = self.clone();
        let action = Action::OpenDirectory { name: name.clone() };
        self.worker.post_action(action, move |msg| {
            if !msg.is_terminal() {
                store.update(&msg);
                return;
            }
            let next = {
                let mut st = list.lock();
                st.opening = false;
                let current = st.generation == generation;
                match terminal_result(msg) {
                    Ok(()) => {
                        log::debug!("Opened {}", name);
                        st.store.set_msg_store(&name, store.clone());
                        if current {
                            st.selected = Some(name.clone());
                            st.selecting = None;
                            if !st.visible.contains(&name) {
                                st.visible.push(name.clone());
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Failed to open {}: {}", name, e);
                        if current {
                            st.selected = None;
                            st.selecting = None;
                        }
                    }
                }
                let generation = st.generation;
                let next = st.queued.take().filter(|(_, g)| *g == generation);
                st.opening = next.is_some();
                next
            };
            if let Some((name, generation)) = next {
                list.open(name, generation);
            }
        });
    }

    pub fn next_dir(&self) -> Option<String> {
        self.step_dir(1)
    }

    pub fn prev_dir(&self) -> Option<String> {
        self.step_dir(-1)
    }

    /// Select the visible directory `delta` places from the current one, wrapping around.
    fn step_dir(&self, delta: isize) -> Option<String> {
        let target = {
            let st = self.lock();
            if st.visible.is_empty() {
                return None;
            }
            let current = st.selecting.as_ref().or(st.selected.as_ref());
            let len = st.visible.len() as isize;
            let idx = match current.and_then(|c| st.visible.iter().position(|d| d == c)) {
                Some(i) => (i as isize + delta).rem_euclid(len),
                None => 0,
            };
            st.visible[idx as usize].clone()
        };
        self.select(&target);
        Some(target)
    }

    /// "recent/unseen/exists", "unseen/exists" or "exists", whichever is the first with a
    /// non-zero leading counter. Empty for unknown or empty directories.
    pub fn rue_string(&self, name: &str) -> String {
        let Some(store) = self.msg_store(name) else {
            return String::new();
        };
        let di = store.dir_info();
        if di.recent > 0 {
            format!("{}/{}/{}", di.recent, di.unseen, di.exists)
        } else if di.unseen > 0 {
            format!("{}/{}", di.unseen, di.exists)
        } else if di.exists > 0 {
            format!("{}", di.exists)
        } else {
            String::new()
        }
    }
}
