//! Post-execution analysis of skill output by an LLM.
//!
//! The provider is chosen by [`LlmProvider`]; Anthropic uses the Messages
//! API, OpenAI and local servers (Ollama, vLLM, llama.cpp) share the
//! chat-completions shape. Analysis never fails an execution: provider
//! errors come back as an `Analysis unavailable ...` text and a missing API
//! key yields no analysis at all.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, warn};

use opschain_types::{ParamMap, SkillAnalysis};
use opschain_util::{LlmProvider, LlmSettings, truncate_chars};

/// Characters of step output included in the prompt.
pub const MAX_PROMPT_OUTPUT_CHARS: usize = 15_000;
const MAX_TOKENS: u32 = 2000;
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_LOCAL_MODEL: &str = "gpt-oss:20b";
const LOCAL_PLACEHOLDER_KEY: &str = "not-needed";
const OPENAI_TIMEOUT: Duration = Duration::from_secs(120);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Produces an analysis of a finished execution.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// `output` holds the `=== <step> ===` blocks; `params` are the request parameters.
    async fn analyze(&self, output: &str, params: &ParamMap, config: &SkillAnalysis) -> Option<String>;
}

/// Analyzer that never produces analysis.
pub struct NoopAnalyzer;

#[async_trait]
impl Analyzer for NoopAnalyzer {
    async fn analyze(&self, _output: &str, _params: &ParamMap, _config: &SkillAnalysis) -> Option<String> {
        None
    }
}

/// Fill `{{output}}` and `{{params}}` in a prompt template.
pub fn build_prompt(template: &str, output: &str, params: &ParamMap) -> String {
    let params_json = serde_json::to_string_pretty(params).unwrap_or_else(|_| "{}".into());
    template
        .replace("{{output}}", truncate_chars(output, MAX_PROMPT_OUTPUT_CHARS))
        .replace("{{params}}", &params_json)
}

/// First non-empty of an override, the skill's model and a provider default.
fn pick_model(override_model: Option<&str>, skill_model: &str, default: &str) -> String {
    override_model
        .filter(|model| !model.is_empty())
        .or(Some(skill_model).filter(|model| !model.is_empty()))
        .unwrap_or(default)
        .to_string()
}

/// Analyzer backed by a hosted or local LLM.
pub struct LlmAnalyzer {
    http: Client,
    settings: LlmSettings,
}

impl LlmAnalyzer {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = Client::builder().build().context("build analysis http client")?;
        Ok(Self { http, settings })
    }

    async fn anthropic(&self, prompt: &str, skill_model: &str) -> Result<Option<String>> {
        let Some(api_key) = self.settings.anthropic_api_key.as_deref() else {
            return Ok(None);
        };
        let model = pick_model(self.settings.anthropic_model.as_deref(), skill_model, DEFAULT_ANTHROPIC_MODEL);
        let response = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": model,
                "max_tokens": MAX_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Anthropic API error {}: {}", status.as_u16(), truncate_chars(&body, 200)));
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct MessagesResponse {
            content: Vec<ContentBlock>,
        }

        let body: MessagesResponse = response.json().await?;
        body.content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .map(Some)
            .ok_or_else(|| anyhow!("empty response from Anthropic"))
    }

    async fn chat_completions(
        &self,
        label: &str,
        base_url: &str,
        api_key: &str,
        model: String,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let response = self
            .http
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(&json!({
                "model": model,
                "max_tokens": MAX_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            return Ok(Some(format!(
                "Analysis unavailable: {label} returned {}: {}",
                status.as_u16(),
                truncate_chars(&body, 200)
            )));
        }

        let body: Value = response.json().await?;
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|content| Some(content.to_string()))
            .ok_or_else(|| anyhow!("response has no choices[0].message.content"))
    }

    async fn dispatch(&self, prompt: &str, skill_model: &str) -> Result<Option<String>> {
        let settings = &self.settings;
        match &settings.provider {
            LlmProvider::Anthropic => self.anthropic(prompt, skill_model).await,
            LlmProvider::OpenAi => {
                let Some(api_key) = settings.openai_api_key.as_deref() else {
                    return Ok(None);
                };
                let model = pick_model(settings.openai_model.as_deref(), skill_model, DEFAULT_OPENAI_MODEL);
                self.chat_completions("OpenAI", &settings.openai_base_url, api_key, model, prompt, OPENAI_TIMEOUT)
                    .await
            }
            LlmProvider::Local => {
                let api_key = settings.local_api_key.as_deref().unwrap_or(LOCAL_PLACEHOLDER_KEY);
                let model = pick_model(settings.local_model.as_deref(), skill_model, DEFAULT_LOCAL_MODEL);
                self.chat_completions("Local LLM", &settings.local_base_url, api_key, model, prompt, LOCAL_TIMEOUT)
                    .await
            }
            LlmProvider::Unknown(name) => Ok(Some(format!(
                "Analysis unavailable: Unknown provider '{name}'. Use 'anthropic', 'openai', or 'local'."
            ))),
        }
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(&self, output: &str, params: &ParamMap, config: &SkillAnalysis) -> Option<String> {
        let prompt = build_prompt(&config.prompt_template, output, params);
        let provider = self.settings.provider.as_str();
        if let LlmProvider::Unknown(name) = &self.settings.provider {
            warn!(provider = %name, "unknown analysis provider");
        }
        match self.dispatch(&prompt, &config.model).await {
            Ok(analysis) => analysis,
            Err(err) => {
                error!(provider, error = %err, "analysis failed");
                Some(format!("Analysis unavailable ({provider}): {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("pool_name".into(), json!("web_pool"));
        params
    }

    #[test]
    fn prompt_substitutes_output_and_params() {
        let prompt = build_prompt("Output:\n{{output}}\nParams:\n{{params}}", "=== show ===\nup", &params());
        assert!(prompt.contains("=== show ===\nup"));
        assert!(prompt.contains("\"pool_name\": \"web_pool\""));
    }

    #[test]
    fn prompt_output_is_truncated() {
        let output = "x".repeat(MAX_PROMPT_OUTPUT_CHARS + 100);
        let prompt = build_prompt("{{output}}", &output, &ParamMap::new());
        assert_eq!(prompt.len(), MAX_PROMPT_OUTPUT_CHARS);
    }

    #[test]
    fn model_precedence() {
        assert_eq!(pick_model(Some("env-model"), "skill-model", "default"), "env-model");
        assert_eq!(pick_model(Some(""), "skill-model", "default"), "skill-model");
        assert_eq!(pick_model(None, "", "default"), "default");
    }

    #[tokio::test]
    async fn missing_api_key_yields_no_analysis() {
        let analyzer = LlmAnalyzer::new(LlmSettings::default()).unwrap();
        let config = SkillAnalysis {
            enabled: true,
            prompt_template: "{{output}}".into(),
            model: String::new(),
        };
        assert_eq!(analyzer.analyze("out", &ParamMap::new(), &config).await, None);
    }

    #[tokio::test]
    async fn unknown_provider_is_reported() {
        let settings = LlmSettings {
            provider: LlmProvider::Unknown("gemini".into()),
            ..LlmSettings::default()
        };
        let analyzer = LlmAnalyzer::new(settings).unwrap();
        let analysis = analyzer.analyze("out", &ParamMap::new(), &SkillAnalysis::default()).await;
        assert_eq!(
            analysis.as_deref(),
            Some("Analysis unavailable: Unknown provider 'gemini'. Use 'anthropic', 'openai', or 'local'.")
        );
    }

    #[tokio::test]
    async fn noop_analyzer_is_silent() {
        assert_eq!(NoopAnalyzer.analyze("out", &params(), &SkillAnalysis::default()).await, None);
    }
}
