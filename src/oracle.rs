//! The Oracle: optional hint and failure-analysis text from a chat-completions API.
//!
//! Configured by `OPENAI_API_KEY` (required), `OPENAI_BASE_URL` and `OPENAI_MODEL`.
//! Without a key the offline oracle answers `None` immediately.
//!
//! NOTE: the API key and the learner's source are never logged; sizes and
//! latencies are.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::util::{fill_template, strip_code_fences, trunc_for_log};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum OracleError {
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },
}

/// Source of generated guidance. Failures resolve to `None`.
#[async_trait]
pub trait HintOracle: Send + Sync {
  async fn request_hint(&self, title: &str, description: &str, source: &str, static_hint: Option<&str>) -> Option<String>;

  async fn request_analysis(&self, title: &str, description: &str, source: &str, failure: &str) -> Option<String>;

  fn is_online(&self) -> bool;
}

/// Used when no credential is configured.
#[derive(Debug, Clone)]
pub struct OfflineOracle {
  reason: &'static str,
}

impl OfflineOracle {
  pub fn new(reason: &'static str) -> Self {
    Self { reason }
  }
}

#[async_trait]
impl HintOracle for OfflineOracle {
  async fn request_hint(&self, title: &str, _: &str, _: &str, _: Option<&str>) -> Option<String> {
    info!(target: "oracle", %title, reason = self.reason, "hint unavailable");
    None
  }

  async fn request_analysis(&self, title: &str, _: &str, _: &str, _: &str) -> Option<String> {
    info!(target: "oracle", %title, reason = self.reason, "analysis unavailable");
    None
  }

  fn is_online(&self) -> bool {
    false
  }
}

#[derive(Clone)]
pub struct OpenAiOracle {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
  prompts: Prompts,
}

impl OpenAiOracle {
  /// Build the client when OPENAI_API_KEY holds a non-blank value.
  pub fn from_env(prompts: Prompts) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
    Self::new(&api_key, base_url, model, prompts)
  }

  pub fn new(api_key: &str, base_url: impl Into<String>, model: impl Into<String>, prompts: Prompts) -> Option<Self> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
      return None;
    }
    let client = reqwest::Client::builder().timeout(Duration::from_secs(20)).build().ok()?;
    Some(Self {
      client,
      api_key: api_key.to_string(),
      base_url: base_url.into().trim_end_matches('/').to_string(),
      model: model.into(),
      prompts,
    })
  }

  #[instrument(level = "info", target = "oracle", skip(self, system, user), fields(model = %self.model, user_len = user.len()))]
  async fn chat_plain(&self, system: &str, user: &str, temperature: f32) -> Result<String, OracleError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      max_tokens: Some(300),
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "conquest-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(OracleError::Status { status, message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(target: "oracle", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, "usage");
    }
    Ok(body.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default())
  }

  async fn ask(&self, what: &'static str, system: &str, user: &str) -> Option<String> {
    let start = Instant::now();
    match self.chat_plain(system, user, 0.7).await {
      Ok(text) => {
        let reply = clean_reply(&text);
        info!(target: "oracle", what, elapsed = ?start.elapsed(), reply_len = reply.as_ref().map_or(0, String::len), "oracle replied");
        reply
      }
      Err(e) => {
        error!(target: "oracle", what, elapsed = ?start.elapsed(), error = %e, "oracle call failed");
        None
      }
    }
  }
}

#[async_trait]
impl HintOracle for OpenAiOracle {
  async fn request_hint(&self, title: &str, description: &str, source: &str, static_hint: Option<&str>) -> Option<String> {
    let user = fill_template(
      &self.prompts.hint_user_template,
      &[
        ("title", title),
        ("description", description),
        ("code", source),
        ("static_hint", static_hint.unwrap_or("none")),
      ],
    );
    self.ask("hint", &self.prompts.hint_system, &user).await
  }

  async fn request_analysis(&self, title: &str, description: &str, source: &str, failure: &str) -> Option<String> {
    let user = fill_template(
      &self.prompts.analysis_user_template,
      &[("title", title), ("description", description), ("code", source), ("error", failure)],
    );
    self.ask("analysis", &self.prompts.analysis_system, &user).await
  }

  fn is_online(&self) -> bool {
    true
  }
}

/// Pick the online oracle when a credential is present.
pub fn oracle_from_env(prompts: Prompts) -> Arc<dyn HintOracle> {
  match OpenAiOracle::from_env(prompts) {
    Some(o) => {
      info!(target: "oracle", model = %o.model, base_url = %o.base_url, "oracle online");
      Arc::new(o)
    }
    None => {
      warn!(target: "oracle", "OPENAI_API_KEY not set; hints fall back to static text");
      Arc::new(OfflineOracle::new("OPENAI_API_KEY not set"))
    }
  }
}

/// Strip code fences and whitespace; an empty reply counts as no reply.
fn clean_reply(text: &str) -> Option<String> {
  let s = strip_code_fences(text);
  (!s.is_empty()).then_some(s)
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
}

fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
