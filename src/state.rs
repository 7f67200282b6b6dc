//! Shared application state: the curriculum, progress store, oracle and
//! script runtime every connection builds its session from.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::curriculum::{Curriculum, CurriculumError};
use crate::oracle::{oracle_from_env, HintOracle};
use crate::script::{Interpreter, ScriptRuntime};
use crate::session::SessionDeps;
use crate::storage::{JsonFileStore, ProgressLedger};

#[derive(Clone)]
pub struct AppState {
  pub curriculum: Arc<Curriculum>,
  pub ledger: Arc<ProgressLedger>,
  pub oracle: Arc<dyn HintOracle>,
  pub runtime: Arc<dyn ScriptRuntime>,
  pub config: AppConfig,
}

impl AppState {
  /// Load the curriculum and wire the file store, oracle and interpreter.
  #[instrument(level = "info", skip_all)]
  pub fn from_config(config: AppConfig) -> Result<Self, CurriculumError> {
    let curriculum = Arc::new(Curriculum::load(config.curriculum.path.as_deref())?);
    let store = JsonFileStore::new(&config.storage.dir, &config.storage.key);
    info!(target: "conquest_backend", path = %store.path().display(), "progress store ready");
    Ok(Self {
      curriculum,
      ledger: Arc::new(ProgressLedger::new(Arc::new(store))),
      oracle: oracle_from_env(config.prompts.clone()),
      runtime: Arc::new(Interpreter::with_step_budget(config.session.step_budget)),
      config,
    })
  }

  pub fn session_deps(&self) -> SessionDeps {
    SessionDeps {
      curriculum: Arc::clone(&self.curriculum),
      ledger: Arc::clone(&self.ledger),
      oracle: Arc::clone(&self.oracle),
      runtime: Arc::clone(&self.runtime),
      settings: self.config.session.clone(),
    }
  }
}

#[cfg(test)]
pub(crate) fn test_state(curriculum: Arc<Curriculum>) -> AppState {
  use crate::oracle::OfflineOracle;
  use crate::storage::MemoryStore;

  let mut config = AppConfig::default();
  config.session.load_delay_ms = 0;
  config.session.submit_delay_ms = 0;
  AppState {
    curriculum,
    ledger: Arc::new(ProgressLedger::new(Arc::new(MemoryStore::default()))),
    oracle: Arc::new(OfflineOracle::new("test")),
    runtime: Arc::new(Interpreter::default()),
    config,
  }
}
