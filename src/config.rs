//! Application configuration loaded from TOML.
//!
//! Every section is optional; a missing or unreadable file yields defaults.
//! See `AppConfig` for the expected schema.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub curriculum: CurriculumConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub prompts: Prompts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  pub static_dir: PathBuf,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self { port: 3000, static_dir: PathBuf::from("./static") }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Directory holding one JSON document per storage key.
  pub dir: PathBuf,
  pub key: String,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self { dir: PathBuf::from("./data"), key: crate::storage::PROGRESS_KEY.into() }
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CurriculumConfig {
  /// Replaces the built-in curriculum when set.
  #[serde(default)]
  pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub load_delay_ms: u64,
  pub submit_delay_ms: u64,
  /// Upper bound on interpreter steps per submission.
  pub step_budget: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self { load_delay_ms: 500, submit_delay_ms: 300, step_budget: crate::script::DEFAULT_STEP_BUDGET }
  }
}

/// Prompts used by the oracle. Placeholders: `{title}`, `{description}`,
/// `{code}`, `{static_hint}`, `{error}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub hint_system: String,
  pub hint_user_template: String,
  pub analysis_system: String,
  pub analysis_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      hint_system: "You are a JavaScript tutor inside a fantasy learning game. Give one short, subtle hint. Never write the solution.".into(),
      hint_user_template: "Challenge: {title}\nTask: {description}\nReference hint (do not repeat): {static_hint}\n\nStudent code:\n```javascript\n{code}\n```\n\nGive one guiding hint.".into(),
      analysis_system: "You are a JavaScript tutor inside a fantasy learning game. Explain why an attempt failed in two or three sentences without giving the full answer.".into(),
      analysis_user_template: "Challenge: {title}\nTask: {description}\nThe attempt failed with: {error}\n\nStudent code:\n```javascript\n{code}\n```\n\nExplain what went wrong.".into(),
    }
  }
}

/// Load `AppConfig` from CONQUEST_CONFIG_PATH, then apply `PORT`.
/// Read or parse errors are logged and fall back to defaults.
pub fn load_app_config_from_env() -> AppConfig {
  let mut cfg = std::env::var("CONQUEST_CONFIG_PATH")
    .ok()
    .and_then(|path| load_app_config(&path))
    .unwrap_or_default();
  if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
    cfg.server.port = port;
  }
  cfg
}

fn load_app_config(path: &str) -> Option<AppConfig> {
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "conquest_backend", %path, "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "conquest_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "conquest_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_config_keeps_defaults() {
    let cfg: AppConfig = toml::from_str(
      r#"
        [session]
        load_delay_ms = 0

        [prompts]
        hint_system = "terse"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.session.load_delay_ms, 0);
    assert_eq!(cfg.session.submit_delay_ms, 300);
    assert_eq!(cfg.prompts.hint_system, "terse");
    assert!(cfg.prompts.analysis_user_template.contains("{error}"));
    assert_eq!(cfg.server.port, 3000);
    assert_eq!(cfg.storage.key, "codeConquestPlayerProgress");
  }

  #[test]
  fn unreadable_file_yields_none() {
    assert!(load_app_config("/definitely/not/here.toml").is_none());
  }
}
