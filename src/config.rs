//! Runtime settings, resolved once at startup from CLI flags and the environment.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::constants;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GROQ_API_KEY is not set; pass --api-key or export GROQ_API_KEY")]
    MissingApiKey,
    #[error("model name must not be empty")]
    EmptyModel,
    #[error("failed to read system prompt file {path}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("system prompt file {0} is empty")]
    EmptyPromptFile(PathBuf),
}

#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub system_prompt: String,
}

// Keep the credential out of logs.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("system_prompt_chars", &self.system_prompt.chars().count())
            .finish()
    }
}

impl Settings {
    /// Fails fast on a missing credential; there is no degraded mode.
    pub fn resolve(
        api_key: Option<String>,
        api_url: String,
        model: String,
        system_prompt_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let model = model.trim().to_string();
        if model.is_empty() {
            return Err(ConfigError::EmptyModel);
        }

        let system_prompt = match system_prompt_file {
            Some(path) => load_system_prompt(path)?,
            None => constants::SYSTEM_PROMPT.to_string(),
        };

        Ok(Self {
            api_key,
            api_url,
            model,
            system_prompt,
        })
    }
}

fn load_system_prompt(path: &Path) -> Result<String, ConfigError> {
    let prompt = std::fs::read_to_string(path).map_err(|source| ConfigError::PromptFile {
        path: path.to_path_buf(),
        source,
    })?;
    if prompt.trim().is_empty() {
        return Err(ConfigError::EmptyPromptFile(path.to_path_buf()));
    }
    Ok(prompt)
}
