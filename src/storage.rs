//! Durable storage for the single progress record.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::curriculum::Curriculum;
use crate::progress::PlayerProgress;

/// Storage key of the progress record.
pub const PROGRESS_KEY: &str = "codeConquestPlayerProgress";

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("I/O error on {path}: {source}")]
  Io { path: String, source: std::io::Error },
  #[error("stored progress is not valid JSON: {0}")]
  Corrupt(#[from] serde_json::Error),
}

pub trait ProgressStore: Send + Sync {
  /// `Ok(None)` when nothing has been stored yet.
  fn load(&self) -> Result<Option<PlayerProgress>, StorageError>;
  fn save(&self, progress: &PlayerProgress) -> Result<(), StorageError>;
}

/// Read stored progress, or start fresh when absent or unreadable.
#[instrument(level = "info", target = "storage", skip_all)]
pub fn load_or_default(store: &dyn ProgressStore, curriculum: &Curriculum) -> PlayerProgress {
  match store.load() {
    Ok(Some(p)) => {
      info!(target: "storage", completed = p.completed_concepts.len(), xp = p.current_xp, "restored progress");
      p
    }
    Ok(None) => {
      info!(target: "storage", "no stored progress; starting fresh");
      PlayerProgress::default_for(curriculum)
    }
    Err(e) => {
      error!(target: "storage", error = %e, "failed to load progress; starting fresh");
      PlayerProgress::default_for(curriculum)
    }
  }
}

/// One JSON document at `<dir>/<key>.json`, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
    Self { path: dir.as_ref().join(format!("{key}.json")) }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_err(&self, source: std::io::Error) -> StorageError {
    StorageError::Io { path: self.path.display().to_string(), source }
  }
}

impl ProgressStore for JsonFileStore {
  fn load(&self) -> Result<Option<PlayerProgress>, StorageError> {
    let text = match std::fs::read_to_string(&self.path) {
      Ok(t) => t,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(self.io_err(e)),
    };
    if text.trim().is_empty() {
      return Ok(None);
    }
    Ok(Some(serde_json::from_str(&text)?))
  }

  fn save(&self, progress: &PlayerProgress) -> Result<(), StorageError> {
    let text = serde_json::to_string(progress)?;
    if let Some(dir) = self.path.parent() {
      std::fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
    }
    let tmp = self.path.with_extension("json.tmp");
    std::fs::write(&tmp, &text).map_err(|e| self.io_err(e))?;
    std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
    debug!(target: "storage", path = %self.path.display(), bytes = text.len(), "progress saved");
    Ok(())
  }
}

/// Keeps the serialized record in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
  raw: Mutex<Option<String>>,
}

impl MemoryStore {
  #[cfg(test)]
  pub fn with_raw(text: impl Into<String>) -> Self {
    Self { raw: Mutex::new(Some(text.into())) }
  }

  pub fn raw(&self) -> Option<String> {
    self.raw.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

impl ProgressStore for MemoryStore {
  fn load(&self) -> Result<Option<PlayerProgress>, StorageError> {
    match self.raw() {
      Some(text) => Ok(Some(serde_json::from_str(&text)?)),
      None => Ok(None),
    }
  }

  fn save(&self, progress: &PlayerProgress) -> Result<(), StorageError> {
    let text = serde_json::to_string(progress)?;
    *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(text);
    Ok(())
  }
}

/// Log-and-drop write used after every progress change.
pub fn persist(store: &dyn ProgressStore, progress: &PlayerProgress) {
  if let Err(e) = store.save(progress) {
    warn!(target: "storage", error = %e, "failed to save progress");
  }
}

/// The one owner of the durable record, shared by every session. Each change
/// is a read-modify-write against the latest stored snapshot under one lock.
pub struct ProgressLedger {
  store: Arc<dyn ProgressStore>,
  lock: Mutex<()>,
}

impl ProgressLedger {
  pub fn new(store: Arc<dyn ProgressStore>) -> Self {
    Self { store, lock: Mutex::new(()) }
  }

  /// Latest stored progress, or defaults.
  pub fn current(&self, curriculum: &Curriculum) -> PlayerProgress {
    load_or_default(self.store.as_ref(), curriculum)
  }

  /// Latest stored progress merged with a session's own snapshot.
  pub fn refreshed(&self, local: &PlayerProgress) -> PlayerProgress {
    match self.store.load() {
      Ok(Some(mut stored)) => {
        stored.absorb(local);
        stored
      }
      Ok(None) => local.clone(),
      Err(e) => {
        warn!(target: "storage", error = %e, "failed to refresh progress; keeping session copy");
        local.clone()
      }
    }
  }

  /// Apply `change` to the latest snapshot (merged with `local` when given)
  /// and store the result if it differs from what was stored.
  #[instrument(level = "debug", target = "storage", skip_all)]
  pub fn update<T>(
    &self,
    curriculum: &Curriculum,
    local: Option<&PlayerProgress>,
    change: impl FnOnce(&PlayerProgress) -> (PlayerProgress, T),
  ) -> (PlayerProgress, T) {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let stored = match self.store.load() {
      Ok(stored) => stored,
      Err(e) => {
        error!(target: "storage", error = %e, "failed to load progress before update");
        None
      }
    };
    let base = match (&stored, local) {
      (Some(s), Some(l)) => {
        let mut merged = s.clone();
        merged.absorb(l);
        merged
      }
      (Some(s), None) => s.clone(),
      (None, Some(l)) => l.clone(),
      (None, None) => PlayerProgress::default_for(curriculum),
    };
    let (next, out) = change(&base);
    if stored.as_ref() != Some(&next) {
      persist(self.store.as_ref(), &next);
    }
    (next, out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::curriculum::fixtures;
  use crate::domain::CriteriaResult;
  use pretty_assertions::assert_eq;

  #[test]
  fn file_store_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("nested"), PROGRESS_KEY);
    assert!(store.load().unwrap().is_none());

    let c = fixtures::small();
    let p = PlayerProgress::default_for(&c);
    store.save(&p).unwrap();
    assert!(store.path().ends_with("codeConquestPlayerProgress.json"));
    assert_eq!(store.load().unwrap(), Some(p));
    assert!(!store.path().with_extension("json.tmp").exists());
  }

  #[test]
  fn corrupt_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path(), PROGRESS_KEY);
    std::fs::write(store.path(), "{not json").unwrap();
    assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));

    let c = fixtures::small();
    assert_eq!(load_or_default(&store, &c), PlayerProgress::default_for(&c));
  }

  #[test]
  fn stored_progress_wins_over_defaults() {
    let c = fixtures::small();
    let store = MemoryStore::with_raw(r#"{"completedConcepts":["a"],"currentXp":10}"#);
    let p = load_or_default(&store, &c);
    assert!(p.is_completed("a"));
    assert_eq!(p.current_xp, 10);
    assert!(p.unlocked_main_topics.is_empty());
  }

  #[test]
  fn ledger_merges_a_stale_session_into_the_stored_record() {
    let c = fixtures::small();
    let store = Arc::new(MemoryStore::default());
    let ledger = ProgressLedger::new(store.clone());
    let (fresh, _) = PlayerProgress::default_for(&c).initial_focus(&c);

    let (ahead, _) = ledger.update(&c, Some(&fresh), |p| (p.complete(&c, "a", &CriteriaResult::pass("ok"), "x").unwrap().0, ()));
    let (ahead, _) = ledger.update(&c, Some(&ahead), |p| (p.complete(&c, "b", &CriteriaResult::pass("ok"), "y").unwrap().0, ()));
    assert!(ahead.unlocked_sub_topics.contains("s2"));

    // A session still holding the fresh snapshot completes `a` again.
    let (merged, _) = ledger.update(&c, Some(&fresh), |p| (p.complete(&c, "a", &CriteriaResult::pass("ok"), "z").unwrap().0, ()));
    assert!(merged.is_completed("b"));
    assert!(merged.unlocked_sub_topics.contains("s2"));
    assert_eq!(merged.current_xp, ahead.current_xp);
    assert_eq!(store.load().unwrap(), Some(merged.clone()));
    assert_eq!(ledger.refreshed(&fresh), merged);
  }

  #[test]
  fn unchanged_update_does_not_write() {
    let c = fixtures::small();
    let store = Arc::new(MemoryStore::with_raw(r#"{"currentXp":5}"#));
    let ledger = ProgressLedger::new(store.clone());
    let (p, _) = ledger.update(&c, None, |p| (p.clone(), ()));
    assert_eq!(p.current_xp, 5);
    assert_eq!(store.raw().as_deref(), Some(r#"{"currentXp":5}"#));

    let empty = Arc::new(MemoryStore::default());
    let (p, _) = ProgressLedger::new(empty.clone()).update(&c, None, |p| (p.clone(), ()));
    assert_eq!(p, PlayerProgress::default_for(&c));
    assert!(empty.raw().is_some());
  }

  #[test]
  fn memory_store_keeps_camel_case_json() {
    let store = MemoryStore::default();
    assert!(store.load().unwrap().is_none());
    persist(&store, &PlayerProgress { current_xp: 7, ..Default::default() });
    assert!(store.raw().unwrap().contains("\"currentXp\":7"));
  }
}
