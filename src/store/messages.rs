use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::{IndexMap, IndexSet};

use super::terminal_result;
use crate::config::UiConfig;
use crate::core::models::{DirInfo, Flag, MessageInfo, Uid};
use crate::error::{Error, Result};
use crate::search::criteria::SearchCriteria;
use crate::worker::types::{Action, WorkerMessage};
use crate::worker::Worker;

/// How a `MessageStore::delete` ended.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted(Vec<Uid>),
    Failed(Error),
    Unsupported,
}

impl DeleteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted(_))
    }
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteOutcome::Deleted(_) => write!(f, "Messages deleted."),
            DeleteOutcome::Failed(e) => write!(f, "Delete failed: {e}"),
            DeleteOutcome::Unsupported => write!(f, "Delete is unsupported for this backend"),
        }
    }
}

#[derive(Default)]
struct State {
    /// Known uids in backend order. `None` until headers are fetched.
    messages: IndexMap<Uid, Option<Arc<MessageInfo>>>,
    /// Marked for deletion, waiting on the backend. Hidden from the visible ordering.
    deleted: IndexSet<Uid>,
    filter: Option<HashSet<Uid>>,
    results: Vec<Uid>,
    selected: Option<Uid>,
    dir_info: DirInfo,
}

impl State {
    fn is_visible(&self, uid: Uid) -> bool {
        self.messages.contains_key(&uid)
            && !self.deleted.contains(&uid)
            && self.filter.as_ref().map_or(true, |f| f.contains(&uid))
    }

    fn visible(&self) -> Vec<Uid> {
        self.messages
            .keys()
            .copied()
            .filter(|uid| self.is_visible(*uid))
            .collect()
    }

    /// Re-resolve a selection that is no longer visible, using `order` (the visible ordering
    /// before the change): next visible uid forward, then backward, else nothing.
    fn reresolve(&mut self, order: &[Uid]) {
        let Some(sel) = self.selected else { return };
        if self.is_visible(sel) {
            return;
        }
        self.selected = order.iter().position(|u| *u == sel).and_then(|i| {
            order[i + 1..]
                .iter()
                .chain(order[..i].iter().rev())
                .copied()
                .find(|u| self.is_visible(*u))
        });
    }

    fn evict(&mut self, uids: &[Uid]) {
        let order = self.visible();
        for uid in uids {
            self.messages.shift_remove(uid);
            self.deleted.shift_remove(uid);
            if let Some(filter) = self.filter.as_mut() {
                filter.remove(uid);
            }
        }
        self.results.retain(|u| !uids.contains(u));
        self.reresolve(&order);
    }
}

/// Client-side cache of one mailbox.
///
/// Mutated only through backend responses (`update`) or the operations below, which post an
/// action and fold its response back in. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MessageStore {
    state: Arc<Mutex<State>>,
    worker: Worker,
    name: Arc<str>,
    empty_message: Arc<str>,
}

impl MessageStore {
    pub fn new(worker: Worker, name: &str, ui: &UiConfig) -> Self {
        MessageStore {
            state: Arc::new(Mutex::new(State::default())),
            worker,
            name: name.into(),
            empty_message: ui.empty_message.as_str().into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- contents --

    /// Replace the known uid set with exactly `uids`, keeping cached infos of survivors.
    pub fn apply_listing(&self, uids: &[Uid]) {
        let mut st = self.lock();
        let order = st.visible();
        let mut next = IndexMap::with_capacity(uids.len());
        for uid in uids {
            if next.contains_key(uid) {
                continue;
            }
            let info = st.messages.swap_remove(uid).flatten();
            next.insert(*uid, info);
        }
        let evicted = st.messages.len();
        st.messages = next;

        let State {
            messages,
            deleted,
            filter,
            results,
            ..
        } = &mut *st;
        deleted.retain(|u| messages.contains_key(u));
        if let Some(filter) = filter.as_mut() {
            filter.retain(|u| messages.contains_key(u));
        }
        results.retain(|u| messages.contains_key(u));
        st.reresolve(&order);
        log::debug!(
            "{}: listing of {} messages, {} evicted",
            self.name,
            uids.len(),
            evicted
        );
    }

    /// Record `info`, replacing any earlier snapshot. New uids are appended.
    pub fn insert(&self, info: MessageInfo) {
        let uid = info.uid;
        self.lock().messages.insert(uid, Some(Arc::new(info)));
    }

    /// Fold one backend message into the store. Terminal and unrelated variants are ignored.
    pub fn update(&self, msg: &WorkerMessage) {
        match msg {
            WorkerMessage::DirectoryInfo { info } => self.lock().dir_info = info.clone(),
            WorkerMessage::DirectoryContents { uids } => self.apply_listing(uids),
            WorkerMessage::MessageInfo { info } => self.insert(info.clone()),
            WorkerMessage::MessagesDeleted { uids } => self.lock().evict(uids),
            _ => {}
        }
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.lock().messages.keys().copied().collect()
    }

    /// Uids currently shown: filtered, minus pending deletions.
    pub fn visible(&self) -> Vec<Uid> {
        self.lock().visible()
    }

    pub fn get(&self, uid: Uid) -> Option<Arc<MessageInfo>> {
        self.lock().messages.get(&uid).cloned().flatten()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.lock().messages.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    /// Text to show instead of an empty message list.
    pub fn placeholder(&self) -> Option<&str> {
        if self.lock().visible().is_empty() {
            Some(&self.empty_message)
        } else {
            None
        }
    }

    pub fn pending_deletions(&self) -> Vec<Uid> {
        self.lock().deleted.iter().copied().collect()
    }

    /// Counters for this directory, derived from cached infos when the backend cannot count.
    pub fn dir_info(&self) -> DirInfo {
        let st = self.lock();
        let mut info = st.dir_info.clone();
        if info.name.is_empty() {
            info.name = self.name.to_string();
        }
        if !info.accurate_counts {
            let infos = st.messages.values().flatten();
            info.exists = st.messages.len();
            info.recent = infos.clone().filter(|i| i.flags.has(Flag::Recent)).count();
            info.unseen = infos.filter(|i| !i.flags.has(Flag::Seen)).count();
        }
        info
    }

    // -- selection --

    pub fn selected(&self) -> Option<Uid> {
        self.lock().selected
    }

    pub fn selected_info(&self) -> Option<Arc<MessageInfo>> {
        let uid = self.selected()?;
        self.get(uid)
    }

    /// Select `uid` if it is visible.
    pub fn select(&self, uid: Uid) -> bool {
        let mut st = self.lock();
        if st.is_visible(uid) {
            st.selected = Some(uid);
            true
        } else {
            false
        }
    }

    pub fn next(&self) -> Option<Uid> {
        self.step(true)
    }

    pub fn prev(&self) -> Option<Uid> {
        self.step(false)
    }

    fn step(&self, forward: bool) -> Option<Uid> {
        let mut st = self.lock();
        let order = st.visible();
        let pos = st.selected.and_then(|s| order.iter().position(|u| *u == s));
        let target = match (pos, forward) {
            (None, true) => order.first(),
            (None, false) => order.last(),
            (Some(i), true) => order.get(i + 1).or(order.get(i)),
            (Some(i), false) => order.get(i.saturating_sub(1)),
        };
        st.selected = target.copied();
        st.selected
    }

    // -- search and filter --

    /// Post a search of this directory. `callback` receives the matching uids.
    pub fn search<F>(&self, criteria: SearchCriteria, callback: F)
    where
        F: FnOnce(Result<Vec<Uid>>) + Send + 'static,
    {
        let mut found = Vec::new();
        let mut callback = Some(callback);
        self.worker
            .post_action(Action::SearchDirectory { criteria }, move |msg| match msg {
                WorkerMessage::SearchResults { uids } => found.extend(uids),
                msg if msg.is_terminal() => {
                    if let Some(cb) = callback.take() {
                        cb(terminal_result(msg).map(|()| std::mem::take(&mut found)));
                    }
                }
                _ => {}
            });
    }

    /// Highlight `uids` as results without narrowing what is shown.
    pub fn apply_search(&self, uids: &[Uid]) {
        let mut st = self.lock();
        let wanted: HashSet<Uid> = uids.iter().copied().collect();
        st.results = st
            .messages
            .keys()
            .copied()
            .filter(|u| wanted.contains(u))
            .collect();
    }

    /// Show only `uids`. The underlying uid set is untouched.
    pub fn apply_filter(&self, uids: &[Uid]) {
        let mut st = self.lock();
        let filter: HashSet<Uid> = uids
            .iter()
            .copied()
            .filter(|u| st.messages.contains_key(u))
            .collect();
        st.filter = Some(filter);
        if st.selected.is_some_and(|s| !st.is_visible(s)) {
            st.selected = st.visible().first().copied();
        }
    }

    pub fn clear_filter(&self) {
        self.lock().filter = None;
    }

    pub fn is_filtered(&self) -> bool {
        self.lock().filter.is_some()
    }

    pub fn results(&self) -> Vec<Uid> {
        self.lock().results.clone()
    }

    /// Select the next visible search result after the selection, wrapping around.
    pub fn next_result(&self) -> Option<Uid> {
        self.step_result(true)
    }

    pub fn prev_result(&self) -> Option<Uid> {
        self.step_result(false)
    }

    fn step_result(&self, forward: bool) -> Option<Uid> {
        let mut st = self.lock();
        let order = st.visible();
        let hits: Vec<usize> = order
            .iter()
            .enumerate()
            .filter(|(_, u)| st.results.contains(u))
            .map(|(i, _)| i)
            .collect();
        if hits.is_empty() {
            return None;
        }
        let pos = st.selected.and_then(|s| order.iter().position(|u| *u == s));
        let idx = match (pos, forward) {
            (Some(p), true) => hits.iter().copied().find(|i| *i > p).unwrap_or(hits[0]),
            (Some(p), false) => hits
                .iter()
                .rev()
                .copied()
                .find(|i| *i < p)
                .unwrap_or(hits[hits.len() - 1]),
            (None, true) => hits[0],
            (None, false) => hits[hits.len() - 1],
        };
        st.selected = Some(order[idx]);
        st.selected
    }

    // -- backend operations --

    /// Mark `uids` deleted and ask the backend to delete them.
    ///
    /// The selection moves off the marked messages at once. `Done` removes them for good;
    /// `Error` or `Unsupported` unmarks them and restores the previous selection.
    /// When none of `uids` is known and unmarked nothing is posted and `on_done` gets an
    /// empty `Deleted` right away.
    pub fn delete<F>(&self, uids: &[Uid], on_done: F)
    where
        F: FnOnce(DeleteOutcome) + Send + 'static,
    {
        let (marked, previous) = {
            let mut st = self.lock();
            let previous = st.selected;
            let order = st.visible();
            let marked: Vec<Uid> = uids
                .iter()
                .copied()
                .filter(|u| st.messages.contains_key(u) && !st.deleted.contains(u))
                .collect();
            st.deleted.extend(marked.iter().copied());
            st.reresolve(&order);
            (marked, previous)
        };
        if marked.is_empty() {
            log::debug!("{}: nothing to delete", self.name);
            on_done(DeleteOutcome::Deleted(marked));
            return;
        }

        let store = self.clone();
        let mut on_done = Some(on_done);
        let action = Action::DeleteMessages {
            uids: marked.clone(),
        };
        self.worker.post_action(action, move |msg| {
            let outcome = match msg {
                WorkerMessage::Done => {
                    store.lock().evict(&marked);
                    DeleteOutcome::Deleted(marked.clone())
                }
                WorkerMessage::Error { cause } => {
                    store.rollback_delete(&marked, previous);
                    DeleteOutcome::Failed(cause)
                }
                WorkerMessage::Unsupported => {
                    store.rollback_delete(&marked, previous);
                    DeleteOutcome::Unsupported
                }
                other => {
                    store.update(&other);
                    return;
                }
            };
            log::info!("{}: {}", store.name, outcome);
            if let Some(cb) = on_done.take() {
                cb(outcome);
            }
        });
    }

    fn rollback_delete(&self, marked: &[Uid], previous: Option<Uid>) {
        let mut st = self.lock();
        st.deleted.retain(|u| !marked.contains(u));
        st.selected = previous.filter(|u| st.messages.contains_key(u));
    }

    /// Set or clear `flag` on `uids`. Cached infos are replaced once the backend confirms.
    pub fn flag<F>(&self, uids: &[Uid], flag: Flag, enable: bool, done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let store = self.clone();
        let targets = uids.to_vec();
        let action = Action::FlagMessages {
            uids: uids.to_vec(),
            flag,
            enable,
        };
        self.post_routed(action, move |result| {
            if result.is_ok() {
                let mut st = store.lock();
                for uid in &targets {
                    if let Some(slot) = st.messages.get_mut(uid) {
                        if let Some(info) = slot.as_ref() {
                            *slot = Some(Arc::new(info.with_flag(flag, enable)));
                        }
                    }
                }
            }
            done(result);
        });
    }

    /// Fetch the uid listing of this directory.
    pub fn fetch_contents<F>(&self, done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.post_routed(Action::FetchDirectoryContents, done);
    }

    pub fn fetch_headers<F>(&self, uids: &[Uid], done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.post_routed(
            Action::FetchHeaders {
                uids: uids.to_vec(),
            },
            done,
        );
    }

    /// Post `action`, fold every intermediate message into the store, then call `done`.
    fn post_routed<F>(&self, action: Action, done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let store = self.clone();
        let mut done = Some(done);
        self.worker.post_action(action, move |msg| {
            if !msg.is_terminal() {
                store.update(&msg);
                return;
            }
            let result = terminal_result(msg);
            if let Err(e) = &result {
                log::warn!("{}: {}", store.name, e);
            }
            if let Some(cb) = done.take() {
                cb(result);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::core::models::{BodyStructure, Envelope, Flags};
    use crate::worker::backend::{Backend, Responder};

    /// Rejects deletes with a backend error; everything else is unsupported.
    struct ReadOnlyBackend;

    #[async_trait]
    impl Backend for ReadOnlyBackend {
        async fn handle(&mut self, action: Action, _out: &mut Responder) -> Result<()> {
            match action {
                Action::DeleteMessages { .. } => Err(Error::Backend("mailbox is read-only".into())),
                _ => Err(Error::Unsupported),
            }
        }
    }

    fn info(uid: u32, flags: &[Flag]) -> MessageInfo {
        MessageInfo {
            uid: Uid(uid),
            flags: flags.iter().copied().collect(),
            envelope: Envelope::default(),
            headers: vec![],
            body_structure: BodyStructure::default(),
            size: 0,
        }
    }

    fn uids(v: &[u32]) -> Vec<Uid> {
        v.iter().copied().map(Uid).collect()
    }

    fn store_with(worker: Worker, listing: &[u32]) -> MessageStore {
        let store = MessageStore::new(worker, "INBOX", &UiConfig::default());
        store.apply_listing(&uids(listing));
        store
    }

    fn raw(subject: &str) -> Vec<u8> {
        format!("Subject: {subject}\r\n\r\nbody\r\n").into_bytes()
    }

    /// A worker over an opened INBOX holding uids 1..=n.
    async fn memory_worker(n: u32, backend: MemoryBackend) -> Worker {
        let mut backend = backend;
        for i in 1..=n {
            backend.add_message("INBOX", &[], &raw(&format!("message {i}")));
        }
        let worker = Worker::spawn(backend);
        worker
            .perform(Action::OpenDirectory {
                name: "INBOX".into(),
            })
            .await
            .unwrap();
        worker
    }

    async fn delete(store: &MessageStore, targets: &[u32]) -> DeleteOutcome {
        let (tx, rx) = oneshot::channel();
        store.delete(&uids(targets), move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap()
    }

    // -- listing --

    #[tokio::test]
    async fn listing_replaces_uid_set_exactly() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3, 4]);
        for i in 1..=4 {
            store.insert(info(i, &[]));
        }
        store.apply_listing(&uids(&[5, 2, 3]));

        assert_eq!(store.uids(), uids(&[5, 2, 3]));
        assert!(store.get(Uid(1)).is_none());
        assert!(store.get(Uid(4)).is_none());
        assert!(store.get(Uid(2)).is_some());
        assert!(store.get(Uid(5)).is_none());
        assert!(store.contains(Uid(5)));
    }

    #[tokio::test]
    async fn insert_appends_new_and_keeps_position_of_known() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[3, 1]);
        store.insert(info(7, &[]));
        store.insert(info(3, &[Flag::Seen]));
        assert_eq!(store.uids(), uids(&[3, 1, 7]));
        assert!(store.get(Uid(3)).unwrap().flags.has(Flag::Seen));
    }

    #[tokio::test]
    async fn eviction_moves_selection_forward_then_backward() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3]);
        assert!(store.select(Uid(2)));
        store.apply_listing(&uids(&[1, 3]));
        assert_eq!(store.selected(), Some(Uid(3)));
        store.apply_listing(&uids(&[1]));
        assert_eq!(store.selected(), Some(Uid(1)));
        store.apply_listing(&[]);
        assert_eq!(store.selected(), None);
    }

    #[tokio::test]
    async fn update_folds_backend_messages() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[]);
        store.update(&WorkerMessage::DirectoryContents { uids: uids(&[4, 5]) });
        store.update(&WorkerMessage::MessageInfo { info: info(5, &[]) });
        store.update(&WorkerMessage::MessagesDeleted { uids: uids(&[4]) });
        store.update(&WorkerMessage::Done);
        assert_eq!(store.uids(), uids(&[5]));
        assert!(store.get(Uid(5)).is_some());
    }

    // -- delete --

    #[tokio::test]
    async fn delete_done_removes_for_good() {
        let worker = memory_worker(3, MemoryBackend::new()).await;
        let store = store_with(worker, &[1, 2, 3]);
        store.select(Uid(2));

        let (tx, rx) = oneshot::channel();
        store.delete(&uids(&[2]), move |o| {
            let _ = tx.send(o);
        });
        // Marked and moved off before the backend answers.
        assert_eq!(store.pending_deletions(), uids(&[2]));
        assert_eq!(store.selected(), Some(Uid(3)));
        assert_eq!(store.visible(), uids(&[1, 3]));

        let outcome = rx.await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.to_string(), "Messages deleted.");
        assert_eq!(store.uids(), uids(&[1, 3]));
        assert!(store.pending_deletions().is_empty());
        assert_eq!(store.selected(), Some(Uid(3)));
    }

    #[tokio::test]
    async fn delete_error_is_a_true_rollback() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3]);
        store.select(Uid(3));
        let before = store.uids();

        let outcome = delete(&store, &[2, 3]).await;
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.to_string(),
            "Delete failed: backend error: mailbox is read-only"
        );
        assert_eq!(store.uids(), before);
        assert_eq!(store.visible(), before);
        assert_eq!(store.selected(), Some(Uid(3)));
        assert!(store.pending_deletions().is_empty());
    }

    #[tokio::test]
    async fn delete_unsupported_rolls_back() {
        let worker = memory_worker(2, MemoryBackend::new().without_delete()).await;
        let store = store_with(worker, &[1, 2]);
        store.select(Uid(1));
        let outcome = delete(&store, &[1]).await;
        assert!(matches!(outcome, DeleteOutcome::Unsupported));
        assert_eq!(outcome.to_string(), "Delete is unsupported for this backend");
        assert_eq!(store.uids(), uids(&[1, 2]));
        assert_eq!(store.selected(), Some(Uid(1)));
    }

    #[tokio::test]
    async fn delete_last_selects_previous() {
        let worker = memory_worker(3, MemoryBackend::new()).await;
        let store = store_with(worker, &[1, 2, 3]);
        store.select(Uid(3));
        assert!(delete(&store, &[3]).await.is_success());
        assert_eq!(store.selected(), Some(Uid(2)));
    }

    #[tokio::test]
    async fn delete_only_clears_selection_when_nothing_is_left() {
        let worker = memory_worker(2, MemoryBackend::new()).await;
        let store = store_with(worker, &[1, 2]);
        store.select(Uid(1));
        assert!(delete(&store, &[1]).await.is_success());
        assert_eq!(store.selected(), Some(Uid(2)));
        assert!(delete(&store, &[2]).await.is_success());
        assert_eq!(store.selected(), None);
        assert_eq!(store.placeholder(), Some("(no messages)"));
    }

    #[tokio::test]
    async fn delete_of_unknown_uids_posts_nothing() {
        // The read-only backend would fail any delete that reached it.
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2]);
        store.select(Uid(1));
        let outcome = delete(&store, &[7, 9]).await;
        assert!(matches!(&outcome, DeleteOutcome::Deleted(u) if u.is_empty()));
        assert_eq!(store.uids(), uids(&[1, 2]));
        assert_eq!(store.selected(), Some(Uid(1)));
        assert!(store.pending_deletions().is_empty());
        assert_eq!(store.placeholder(), None);
    }

    // -- navigation, search, filter --

    #[tokio::test]
    async fn next_and_prev_stop_at_the_ends() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3]);
        assert_eq!(store.next(), Some(Uid(1)));
        assert_eq!(store.next(), Some(Uid(2)));
        assert_eq!(store.next(), Some(Uid(3)));
        assert_eq!(store.next(), Some(Uid(3)));
        assert_eq!(store.prev(), Some(Uid(2)));
        assert_eq!(store.prev(), Some(Uid(1)));
        assert_eq!(store.prev(), Some(Uid(1)));
    }

    #[tokio::test]
    async fn filter_narrows_view_not_truth() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3, 4]);
        store.select(Uid(2));
        store.apply_filter(&uids(&[3, 1, 9]));
        store.apply_filter(&uids(&[3, 1, 9]));
        assert_eq!(store.visible(), uids(&[1, 3]));
        assert_eq!(store.uids(), uids(&[1, 2, 3, 4]));
        assert_eq!(store.selected(), Some(Uid(1)));
        assert!(!store.select(Uid(4)));

        store.clear_filter();
        assert!(!store.is_filtered());
        assert_eq!(store.visible(), uids(&[1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn search_results_cycle_in_visible_order() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3, 4, 5]);
        store.apply_search(&uids(&[4, 2]));
        store.apply_search(&uids(&[4, 2]));
        assert_eq!(store.results(), uids(&[2, 4]));
        assert_eq!(store.visible().len(), 5);

        assert_eq!(store.next_result(), Some(Uid(2)));
        assert_eq!(store.next_result(), Some(Uid(4)));
        assert_eq!(store.next_result(), Some(Uid(2)));
        assert_eq!(store.prev_result(), Some(Uid(4)));
        store.select(Uid(3));
        assert_eq!(store.prev_result(), Some(Uid(2)));
    }

    #[tokio::test]
    async fn search_goes_through_the_backend() {
        let mut backend = MemoryBackend::new().with_pool_width(2);
        backend.add_message("INBOX", &[], &raw("lunch"));
        backend.add_message("INBOX", &[Flag::Seen], &raw("invoice"));
        backend.add_message("INBOX", &[], &raw("Lunch again"));
        let worker = Worker::spawn(backend);
        worker
            .perform(Action::OpenDirectory {
                name: "INBOX".into(),
            })
            .await
            .unwrap();
        let store = store_with(worker, &[1, 2, 3]);

        let (tx, rx) = oneshot::channel();
        store.search(SearchCriteria::new().header("Subject", "lunch"), move |r| {
            let _ = tx.send(r);
        });
        let mut found = rx.await.unwrap().unwrap();
        found.sort();
        assert_eq!(found, uids(&[1, 3]));
    }

    // -- counts and flags --

    #[tokio::test]
    async fn dir_info_derived_when_backend_cannot_count() {
        let store = store_with(Worker::spawn(ReadOnlyBackend), &[1, 2, 3]);
        store.insert(info(1, &[Flag::Seen]));
        store.insert(info(2, &[Flag::Recent]));
        let di = store.dir_info();
        assert_eq!(di.name, "INBOX");
        assert_eq!((di.exists, di.recent, di.unseen), (3, 1, 1));

        store.update(&WorkerMessage::DirectoryInfo {
            info: DirInfo {
                name: "INBOX".into(),
                exists: 40,
                recent: 0,
                unseen: 7,
                accurate_counts: true,
            },
        });
        assert_eq!(store.dir_info().exists, 40);
    }

    #[tokio::test]
    async fn flag_replaces_snapshot_instead_of_mutating() {
        let worker = memory_worker(2, MemoryBackend::new()).await;
        let store = store_with(worker, &[1, 2]);
        let (tx, rx) = oneshot::channel();
        store.fetch_headers(&uids(&[1, 2]), move |r| {
            let _ = tx.send(r);
        });
        rx.await.unwrap().unwrap();
        let before = store.get(Uid(1)).unwrap();
        assert_eq!(before.flags, Flags::new());

        let (tx, rx) = oneshot::channel();
        store.flag(&uids(&[1]), Flag::Flagged, true, move |r| {
            let _ = tx.send(r);
        });
        rx.await.unwrap().unwrap();
        assert!(store.get(Uid(1)).unwrap().flags.has(Flag::Flagged));
        assert!(!before.flags.has(Flag::Flagged));
    }

    #[tokio::test]
    async fn fetch_contents_applies_listing() {
        let worker = memory_worker(3, MemoryBackend::new()).await;
        let store = MessageStore::new(worker, "INBOX", &UiConfig::default());
        let (tx, rx) = oneshot::channel();
        store.fetch_contents(move |r| {
            let _ = tx.send(r);
        });
        rx.await.unwrap().unwrap();
        assert_eq!(store.uids(), uids(&[1, 2, 3]));
    }
}
