use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::chat_api::DEFAULT_MODEL;
use crate::client::SpeechSettings;
use crate::shell::{DEFAULT_GENERATION, DEFAULT_MANIFEST};
use crate::speech::system_locale;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub speak_replies: Option<bool>,
    pub voice_index: Option<usize>,
    pub locale: Option<String>,
    /// Program and arguments; the text is appended as the last argument
    pub synthesizer_command: Option<Vec<String>>,
    /// Program and arguments; prints the transcript on stdout
    pub recognizer_command: Option<Vec<String>>,
    pub data_dir: Option<PathBuf>,
    pub shell: ShellConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Origin the manifest paths are resolved against. Defaults to the chat
    /// endpoint.
    pub origin: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub generation: Option<String>,
    pub manifest: Option<Vec<String>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    /// Remember the speech toggle and voice across runs
    pub fn save_speech_preferences(enabled: bool, voice_index: usize) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.speak_replies = Some(enabled);
        config.voice_index = Some(voice_index);
        config.save()
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("jarvis").join("config.json"))
    }

    // Resolved settings - env vars first, then config, then defaults

    pub fn endpoint(&self) -> String {
        std::env::var("JARVIS_ENDPOINT")
            .ok()
            .or_else(|| self.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    pub fn model(&self) -> String {
        std::env::var("JARVIS_MODEL")
            .ok()
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn speech_settings(&self) -> SpeechSettings {
        SpeechSettings {
            enabled: self.speak_replies.unwrap_or(true),
            voice_index: self.voice_index.unwrap_or(0),
            locale: self.locale.clone().unwrap_or_else(system_locale),
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join("jarvis"))
    }

    pub fn shell_origin(&self) -> String {
        self.shell.origin.clone().unwrap_or_else(|| self.endpoint())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.shell.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not determine cache directory"))?;
        Ok(cache_dir.join("jarvis").join("shell"))
    }

    pub fn generation(&self) -> String {
        self.shell
            .generation
            .clone()
            .unwrap_or_else(|| DEFAULT_GENERATION.to_string())
    }

    pub fn manifest(&self) -> Vec<String> {
        self.shell
            .manifest
            .clone()
            .unwrap_or_else(|| DEFAULT_MANIFEST.iter().map(|p| p.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::new());
        assert_eq!(config.generation(), "jarvis-v1");
        assert_eq!(config.manifest().len(), 5);
        assert!(config.speech_settings().enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"voice_index": 3, "shell": {"generation": "jarvis-v2"}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.speech_settings().voice_index, 3);
        assert_eq!(config.generation(), "jarvis-v2");
        assert_eq!(config.manifest()[0], "/");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::new();
        config.speak_replies = Some(false);
        config.recognizer_command = Some(vec!["listen".into(), "--lang".into(), "{locale}".into()]);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!loaded.speech_settings().enabled);
    }

    #[test]
    fn test_shell_origin_defaults_to_endpoint() {
        let mut config = Config::new();
        config.endpoint = Some("http://jarvis.local:9000".into());
        if std::env::var("JARVIS_ENDPOINT").is_err() {
            assert_eq!(config.shell_origin(), "http://jarvis.local:9000");
        }
        config.shell.origin = Some("http://cdn.local".into());
        assert_eq!(config.shell_origin(), "http://cdn.local");
    }
}
