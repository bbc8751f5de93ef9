use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};

/// Resolved UI settings used by the stores.
#[derive(Debug, Clone, PartialEq)]
pub struct UiConfig {
    /// Debounce before a directory selection is sent to the backend.
    pub dirlist_delay: Duration,
    pub empty_dirlist: String,
    pub empty_message: String,
    /// Search pool width; `None` means twice the CPU count.
    pub search_pool_width: Option<usize>,
}

impl Default for UiConfig {
    fn default() -> Self {
        UiConfig {
            dirlist_delay: Duration::from_millis(200),
            empty_dirlist: "(no folders)".into(),
            empty_message: "(no messages)".into(),
            search_pool_width: None,
        }
    }
}

impl UiConfig {
    pub fn pool_width(&self) -> usize {
        self.search_pool_width
            .unwrap_or_else(crate::search::default_pool_width)
    }

    /// Copy with every value present in `o` taking precedence.
    pub fn merged(&self, o: &UiOverrides) -> UiConfig {
        UiConfig {
            dirlist_delay: o
                .dirlist_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(self.dirlist_delay),
            empty_dirlist: o
                .empty_dirlist
                .clone()
                .unwrap_or_else(|| self.empty_dirlist.clone()),
            empty_message: o
                .empty_message
                .clone()
                .unwrap_or_else(|| self.empty_message.clone()),
            search_pool_width: o.search_pool_width.or(self.search_pool_width),
        }
    }

    /// Apply `NEVERMAIL_*` overrides read through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = var("NEVERMAIL_DIRLIST_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.dirlist_delay = Duration::from_millis(ms);
        }
        if let Some(width) = var("NEVERMAIL_SEARCH_POOL_WIDTH")
            .and_then(|v| v.parse().ok())
            .filter(|w: &usize| *w > 0)
        {
            self.search_pool_width = Some(width);
        }
    }
}

/// Partial UI settings as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiOverrides {
    pub dirlist_delay_ms: Option<u64>,
    pub empty_dirlist: Option<String>,
    pub empty_message: Option<String>,
    pub search_pool_width: Option<usize>,
}

/// Per-account folder listing preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub name: String,
    /// Folders to show. Exact names or `~REGEX`. Empty shows everything.
    pub folders: Vec<String>,
    /// Folders to hide, same syntax.
    pub folders_exclude: Vec<String>,
    /// Folders listed first, in this order.
    pub folders_sort: Vec<String>,
    pub enable_folders_sort: bool,
}

/// On-disk representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub accounts: Vec<AccountConfig>,
    pub ui: UiOverrides,
    /// Keyed by `account=NAME`, `folder~REGEX`, `subject~REGEX`, ...
    pub contextual_ui: BTreeMap<String, UiOverrides>,
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nevermail")
        .join("config.json")
}

impl FileConfig {
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        let cfg: FileConfig = serde_json::from_str(&data)?;
        Ok(Some(cfg))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    pub ui: UiConfig,
    pub contextual_ui: BTreeMap<String, UiOverrides>,
}

impl Config {
    /// Resolution order: env vars → config file → defaults.
    pub fn resolve() -> Result<Self> {
        let file = match FileConfig::load() {
            Ok(Some(fc)) => {
                log::info!("Config loaded from file");
                fc
            }
            Ok(None) => {
                log::info!("No config file found, using defaults");
                FileConfig::default()
            }
            Err(e) => {
                log::warn!("Config file error: {}", e);
                return Err(e);
            }
        };
        Ok(Self::from_file_config(&file, |k| std::env::var(k).ok()))
    }

    pub fn from_file_config(fc: &FileConfig, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut ui = UiConfig::default().merged(&fc.ui);
        ui.apply_env(var);
        Config {
            accounts: fc.accounts.clone(),
            ui,
            contextual_ui: fc.contextual_ui.clone(),
        }
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Contextual resolver over this config's UI settings.
    pub fn ui_resolver(&self) -> Result<UiConfigResolver> {
        let rules = self
            .contextual_ui
            .iter()
            .map(|(key, o)| ContextRule::parse(key, o.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(UiConfigResolver::new(self.ui.clone(), rules))
    }
}

// ---------------------------------------------------------------------------
// Contextual UI resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Account,
    Folder,
    Subject,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

/// One `[ui:<kind><op><value>]` style override.
#[derive(Debug, Clone)]
pub struct ContextRule {
    kind: ContextKind,
    matcher: Matcher,
    overrides: UiOverrides,
}

impl ContextRule {
    /// Parse a section key such as `account=work` or `folder~^Archive/`.
    pub fn parse(key: &str, overrides: UiOverrides) -> Result<Self> {
        let split = key
            .find(['=', '~'])
            .ok_or_else(|| Error::Config(format!("invalid context key {key:?}")))?;
        let (kind, rest) = key.split_at(split);
        let kind = match kind.trim() {
            "account" => ContextKind::Account,
            "folder" => ContextKind::Folder,
            "subject" => ContextKind::Subject,
            other => return Err(Error::Config(format!("unknown context type {other:?}"))),
        };
        let value = &rest[1..];
        let matcher = if rest.starts_with('~') {
            Matcher::Pattern(Regex::new(value)?)
        } else {
            Matcher::Exact(value.to_string())
        };
        Ok(ContextRule {
            kind,
            matcher,
            overrides,
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    fn matches(&self, value: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(s) => s == value,
            Matcher::Pattern(re) => re.is_match(value),
        }
    }
}

/// Resolves the UI config for an account, folder or subject.
///
/// The first rule of the requested kind that matches wins. Account and folder results are
/// cached by context; subject results never are, so the cache stays bounded by the number
/// of accounts and folders.
pub struct UiConfigResolver {
    base: UiConfig,
    rules: Vec<ContextRule>,
    cache: Mutex<HashMap<(ContextKind, String), UiConfig>>,
}

impl UiConfigResolver {
    pub fn new(base: UiConfig, rules: Vec<ContextRule>) -> Self {
        UiConfigResolver {
            base,
            rules,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &UiConfig {
        &self.base
    }

    pub fn for_account(&self, name: &str) -> UiConfig {
        self.cached(ContextKind::Account, name)
    }

    pub fn for_folder(&self, name: &str) -> UiConfig {
        self.cached(ContextKind::Folder, name)
    }

    pub fn for_subject(&self, subject: &str) -> UiConfig {
        self.lookup(ContextKind::Subject, subject)
    }

    /// Drop every cached resolution. Call after the rules' source changed.
    pub fn invalidate(&self) {
        self.lock_cache().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn cached(&self, kind: ContextKind, value: &str) -> UiConfig {
        if !self.rules.iter().any(|r| r.kind == kind) {
            return self.base.clone();
        }
        let key = (kind, value.to_string());
        if let Some(hit) = self.lock_cache().get(&key) {
            return hit.clone();
        }
        let resolved = self.lookup(kind, value);
        self.lock_cache().insert(key, resolved.clone());
        resolved
    }

    fn lookup(&self, kind: ContextKind, value: &str) -> UiConfig {
        match self
            .rules
            .iter()
            .find(|r| r.kind == kind && r.matches(value))
        {
            Some(rule) => self.base.merged(&rule.overrides),
            None => self.base.clone(),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<(ContextKind, String), UiConfig>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
