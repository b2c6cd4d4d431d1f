//! Runtime settings resolved from the environment.
//!
//! Every value follows the same rule: an explicit environment variable wins,
//! otherwise a default rooted in the platform config directory is used.
//!
//! | Variable | Default |
//! |---|---|
//! | `OPSCHAIN_DATA_DIR` | `<config_dir>/opschain` |
//! | `OPSCHAIN_SKILLS_DIR` | `<data_dir>/skills` |
//! | `VAULT_ADDR` | `http://127.0.0.1:8200` |
//! | `VAULT_TOKEN_FILE` / `VAULT_TOKEN` | none |
//! | `OPSCHAIN_LOCAL_API` | `http://127.0.0.1:8000` |
//! | `LLM_PROVIDER` | `anthropic` |

use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::path_processing::{default_data_dir, dir_from_env, expand_tilde};

pub const DATA_DIR_ENV: &str = "OPSCHAIN_DATA_DIR";
pub const SKILLS_DIR_ENV: &str = "OPSCHAIN_SKILLS_DIR";
pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
pub const VAULT_TOKEN_FILE_ENV: &str = "VAULT_TOKEN_FILE";
pub const LOCAL_API_ENV: &str = "OPSCHAIN_LOCAL_API";
pub const LLM_PROVIDER_ENV: &str = "LLM_PROVIDER";

pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";
pub const DEFAULT_LOCAL_API: &str = "http://127.0.0.1:8000";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LOCAL_LLM_BASE_URL: &str = "http://127.0.0.1:11434/v1";

/// Errors raised while reading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL ('{value}'): {source}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Analysis backend selected by `LLM_PROVIDER`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    Anthropic,
    OpenAi,
    /// Any OpenAI-compatible local endpoint (Ollama, vLLM, llama.cpp).
    Local,
    Unknown(String),
}

impl LlmProvider {
    pub fn as_str(&self) -> &str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
            LlmProvider::Unknown(name) => name,
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "" | "anthropic" => LlmProvider::Anthropic,
            "openai" => LlmProvider::OpenAi,
            "local" => LlmProvider::Local,
            other => LlmProvider::Unknown(other.to_string()),
        })
    }
}

/// Credential vault location and token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    pub addr: String,
    pub token: Option<String>,
}

/// LLM analysis settings. Model overrides take precedence over the model a skill requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: String,
    pub local_base_url: String,
    pub local_model: Option<String>,
    pub local_api_key: Option<String>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub vault: VaultSettings,
    /// Base URL of the local administrative API used by `/api/` hypervisor endpoints.
    pub local_api_base: String,
    pub llm: LlmSettings,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = dir_from_env(DATA_DIR_ENV, default_data_dir);
        let skills_dir = dir_from_env(SKILLS_DIR_ENV, || data_dir.join("skills"));

        let vault = VaultSettings {
            addr: url_var(VAULT_ADDR_ENV, DEFAULT_VAULT_ADDR)?,
            token: vault_token(),
        };
        let local_api_base = url_var(LOCAL_API_ENV, DEFAULT_LOCAL_API)?;

        let llm = LlmSettings {
            provider: optional_var(LLM_PROVIDER_ENV)
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            anthropic_api_key: optional_var("ANTHROPIC_API_KEY"),
            anthropic_model: optional_var("ANTHROPIC_MODEL"),
            openai_api_key: optional_var("OPENAI_API_KEY"),
            openai_model: optional_var("OPENAI_MODEL"),
            openai_base_url: url_var("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL)?,
            local_base_url: url_var("LOCAL_LLM_BASE_URL", DEFAULT_LOCAL_LLM_BASE_URL)?,
            local_model: optional_var("LOCAL_LLM_MODEL"),
            local_api_key: optional_var("LOCAL_LLM_API_KEY"),
        };

        debug!(data_dir = %data_dir.display(), skills_dir = %skills_dir.display(), provider = %llm.provider, "resolved settings");
        Ok(Self {
            data_dir,
            skills_dir,
            vault,
            local_api_base,
            llm,
        })
    }

    pub fn chains_dir(&self) -> PathBuf {
        self.data_dir.join("automations")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("automation_runs")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }

    pub fn clusters_dir(&self) -> PathBuf {
        self.data_dir.join("clusters")
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn url_var(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let value = optional_var(name).unwrap_or_else(|| default.to_string());
    Url::parse(&value).map_err(|source| ConfigError::InvalidUrl {
        var: name,
        value: value.clone(),
        source,
    })?;
    Ok(value.trim_end_matches('/').to_string())
}

/// Token from `VAULT_TOKEN_FILE` when the file is readable and non-empty, else `VAULT_TOKEN`.
fn vault_token() -> Option<String> {
    if let Some(path) = optional_var(VAULT_TOKEN_FILE_ENV) {
        let path = expand_tilde(&path);
        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => return Some(content.trim().to_string()),
            Ok(_) => warn!(path = %path.display(), "vault token file is empty"),
            Err(error) => warn!(path = %path.display(), %error, "could not read vault token file"),
        }
    }
    optional_var(VAULT_TOKEN_ENV)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: &[&str] = &[
        DATA_DIR_ENV,
        SKILLS_DIR_ENV,
        VAULT_ADDR_ENV,
        VAULT_TOKEN_ENV,
        VAULT_TOKEN_FILE_ENV,
        LOCAL_API_ENV,
        LLM_PROVIDER_ENV,
    ];

    /// Every settings variable unset, except the given overrides.
    fn env_with<'a>(overrides: &[(&'static str, &'a str)]) -> Vec<(&'static str, Option<&'a str>)> {
        ALL_VARS
            .iter()
            .map(|name| (*name, overrides.iter().find(|(key, _)| key == name).map(|(_, value)| *value)))
            .collect()
    }

    #[test]
    fn skills_dir_defaults_under_data_dir() {
        temp_env::with_vars(env_with(&[(DATA_DIR_ENV, "/srv/opschain")]), || {
            let settings = Settings::from_env().unwrap();
            assert_eq!(settings.data_dir, PathBuf::from("/srv/opschain"));
            assert_eq!(settings.skills_dir, PathBuf::from("/srv/opschain/skills"));
            assert_eq!(settings.runs_dir(), PathBuf::from("/srv/opschain/automation_runs"));
            assert_eq!(settings.vault.addr, DEFAULT_VAULT_ADDR);
            assert_eq!(settings.local_api_base, DEFAULT_LOCAL_API);
            assert_eq!(settings.llm.provider, LlmProvider::Anthropic);
        });
    }

    #[test]
    fn token_file_wins_over_token_variable() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        fs::write(&token_path, "s.from-file\n").unwrap();
        let token_path = token_path.to_string_lossy().to_string();

        let vars = env_with(&[(VAULT_TOKEN_ENV, "s.from-env"), (VAULT_TOKEN_FILE_ENV, token_path.as_str())]);
        temp_env::with_vars(vars, || {
            let settings = Settings::from_env().unwrap();
            assert_eq!(settings.vault.token.as_deref(), Some("s.from-file"));
        });
    }

    #[test]
    fn missing_token_file_falls_back_to_variable() {
        let vars = env_with(&[(VAULT_TOKEN_ENV, "s.from-env"), (VAULT_TOKEN_FILE_ENV, "/nonexistent/opschain/token")]);
        temp_env::with_vars(vars, || {
            let settings = Settings::from_env().unwrap();
            assert_eq!(settings.vault.token.as_deref(), Some("s.from-env"));
        });
    }

    #[test]
    fn invalid_vault_address_is_rejected() {
        temp_env::with_vars(env_with(&[(VAULT_ADDR_ENV, "not a url")]), || {
            let error = Settings::from_env().unwrap_err();
            assert!(error.to_string().contains(VAULT_ADDR_ENV));
        });
    }

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!("local".parse::<LlmProvider>().unwrap(), LlmProvider::Local);
        assert_eq!("gemini".parse::<LlmProvider>().unwrap(), LlmProvider::Unknown("gemini".into()));
    }
}
