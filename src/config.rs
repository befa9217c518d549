//! Application configuration
//!
//! Settings load from an optional TOML file in the platform config
//! directory, with the API key overridable through the environment.
//! Everything has a default so the guide runs with nothing but
//! `GEMINI_API_KEY` set.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::transport::SessionSetup;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
const DEFAULT_VOICE: &str = "Zephyr";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
你是一个对外经贸博物馆（UIBE Museum）的专业、热情且博学的电子导游。\n\
你的名字叫“博雅”。\n\
\n\
你的主要职责是：\n\
1. 向游客介绍博物馆关于中国对外贸易历史的展览。\n\
2. 深入讲解中国传统文化（如丝绸之路、瓷器、茶叶贸易等）。\n\
3. 用生动、优雅的中文与游客交流。\n\
\n\
性格特点：\n\
- 声音温和，语速适中。\n\
- 引经据典，但通俗易懂。\n\
- 当谈到中国传统文化时，语气充满自豪感。\n\
\n\
如果用户问你不知道的信息，礼貌地表示你还在学习中，并建议他们参观特定的展厅。\n\
请保持对话简短互动，不要一次性输出长篇大论，鼓励用户提问。";

/// Guide application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuideConfig {
    /// API key for the live endpoint; the environment wins over the file
    pub api_key: Option<String>,
    /// WebSocket endpoint of the speech model service
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Synthesized voice preset
    pub voice: String,
    /// Assistant persona and behavioral constraints
    pub system_instruction: String,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: crate::transport::live::DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl GuideConfig {
    /// Path of the config file, when the platform exposes one
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "uibe", "museum-live-guide")
            .map(|dirs| dirs.config_dir().join("guide.toml"))
    }

    /// Load the config file if present, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)?;
                toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?
            }
            _ => Self::default(),
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        Ok(config)
    }

    /// The API key, or a configuration error naming where to put it.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::Config(format!("no API key; set {} or add api_key to the config file", API_KEY_ENV))
        })
    }

    /// The fixed transport configuration for a session.
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuideConfig::default();
        assert_eq!(config.voice, "Zephyr");
        assert!(config.model.starts_with("models/"));
        assert!(config.endpoint.starts_with("wss://"));
        assert!(config.system_instruction.contains("博雅"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: GuideConfig = toml::from_str(
            r#"
            voice = "Kore"
            api_key = "file-key"
            "#,
        )
        .unwrap();
        assert_eq!(config.voice, "Kore");
        assert_eq!(config.api_key.as_deref(), Some("file-key"));
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_require_api_key_errors_when_missing() {
        let config = GuideConfig::default();
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_session_setup_mirrors_config() {
        let config = GuideConfig::default();
        let setup = config.session_setup();
        assert_eq!(setup.model, config.model);
        assert_eq!(setup.voice, config.voice);
        assert_eq!(setup.system_instruction, config.system_instruction);
    }
}
