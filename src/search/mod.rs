pub mod criteria;

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::core::mime::find_first_non_multipart;
use crate::core::models::{Flags, MessageInfo, Uid};
use crate::error::{Error, Result};
use criteria::{contains_smart_case, RequiredParts, SearchCriteria};

/// Read-only, blocking access to the messages of one directory.
///
/// Implementations are called concurrently from the search pool.
pub trait MessageSource: Send + Sync + 'static {
    fn flags(&self, uid: Uid) -> Result<Flags>;
    fn message_info(&self, uid: Uid) -> Result<MessageInfo>;
    /// Decoded text of the body part at `path` (1-based indices, empty for a single part).
    fn body_part(&self, uid: Uid, path: &[usize]) -> Result<String>;
    fn raw(&self, uid: Uid) -> Result<Vec<u8>>;
}

/// Twice the number of available processing units.
pub fn default_pool_width() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Evaluate `criteria` against every uid, at most `width` candidates at a time.
///
/// A candidate whose parts cannot be loaded is logged and left out; it never aborts the
/// search. The result has set semantics: its order is unspecified.
pub async fn search<S>(
    source: Arc<S>,
    uids: &[Uid],
    criteria: &SearchCriteria,
    width: usize,
) -> Vec<Uid>
where
    S: MessageSource + ?Sized,
{
    let parts = criteria.required_parts();
    log::debug!(
        "Searching {} messages, required parts {:05b}, pool width {}",
        uids.len(),
        parts.bits(),
        width
    );

    let criteria = Arc::new(criteria.clone());
    let permits = Arc::new(Semaphore::new(width.max(1)));
    let matched = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::with_capacity(uids.len());

    for &uid in uids {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let source = source.clone();
        let criteria = criteria.clone();
        let matched = matched.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            match search_key(&*source, uid, &criteria, parts) {
                Ok(true) => matched
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(uid),
                Ok(false) => {}
                Err(e) => log::error!("Failed to search uid {}: {}", uid, e),
            }
        }));
    }

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            log::error!("Search task died: {}", e);
        }
    }

    let mut guard = matched
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::take(&mut *guard)
}

/// The parts of one message loaded for evaluation.
#[derive(Default)]
struct Loaded {
    flags: Flags,
    info: Option<MessageInfo>,
    body: String,
    all: String,
}

/// Load what `parts` asks for, then evaluate.
fn search_key<S>(
    source: &S,
    uid: Uid,
    criteria: &SearchCriteria,
    parts: RequiredParts,
) -> Result<bool>
where
    S: MessageSource + ?Sized,
{
    let mut loaded = Loaded::default();

    if parts.contains(RequiredParts::FLAGS) {
        loaded.flags = source.flags(uid)?;
    }
    if parts.intersects(RequiredParts::HEADER | RequiredParts::DATE | RequiredParts::BODY) {
        loaded.info = Some(source.message_info(uid)?);
    }
    if parts.contains(RequiredParts::BODY) {
        let path = loaded
            .info
            .as_ref()
            .and_then(|info| find_first_non_multipart(&info.body_structure))
            .ok_or_else(|| Error::Parse(format!("uid {} has no leaf body part", uid)))?;
        loaded.body = source.body_part(uid, &path)?;
    }
    if parts.contains(RequiredParts::WHOLE_MESSAGE) {
        loaded.all = String::from_utf8_lossy(&source.raw(uid)?).into_owned();
    }

    Ok(matches(uid, criteria, parts, &loaded))
}

/// Short-circuiting conjunction of every constraint.
fn matches(uid: Uid, criteria: &SearchCriteria, parts: RequiredParts, loaded: &Loaded) -> bool {
    if let Some(info) = &loaded.info {
        for (name, terms) in &criteria.headers {
            let value = info.header(name);
            if !terms.iter().all(|t| contains_smart_case(value, t)) {
                return false;
            }
        }
    }
    if !criteria.body.iter().all(|t| contains_smart_case(&loaded.body, t)) {
        return false;
    }
    if !criteria.text.iter().all(|t| contains_smart_case(&loaded.all, t)) {
        return false;
    }
    if !criteria.with_flags.iter().all(|f| loaded.flags.has(*f)) {
        return false;
    }
    if criteria.without_flags.iter().any(|f| loaded.flags.has(*f)) {
        return false;
    }
    if parts.contains(RequiredParts::DATE) {
        match loaded.info.as_ref().and_then(|i| i.envelope.date) {
            None => log::error!("Failed to get date for uid {}; date ignored", uid),
            Some(date) => {
                if criteria.start_date.is_some_and(|start| date < start) {
                    return false;
                }
                if criteria.end_date.is_some_and(|end| date >= end) {
                    return false;
                }
            }
        }
    }
    true
}
