//! Configuration management for story-weaver-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults so the service runs with no config file at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8768 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub model: String,
    pub host: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2:3b".into(),
            host: "http://localhost:11434".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub seed: u32,
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            top_k: 50,
            top_p: 0.95,
            seed: 42,
            max_tokens: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    pub wrap_width: usize,
    pub audio_dir: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            wrap_width: 90,
            audio_dir: "stories".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub enabled: bool,
    pub voice: String,
    pub speed: f32,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: "af_heart".into(),
            speed: 1.0,
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ollama: OllamaConfig,
    pub sampling: SamplingConfig,
    pub story: StoryConfig,
    pub tts: TtsConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/story-weaver/config.yaml
    /// 3. /etc/story-weaver/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/story-weaver/config.yaml")),
                Some(PathBuf::from("/etc/story-weaver/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_section_defaults() {
        let yaml = r#"
ollama:
  model: "llama3.2:1b"
sampling:
  temperature: 1.1
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.ollama.model, "llama3.2:1b");
        assert_eq!(config.ollama.host, "http://localhost:11434");
        assert_eq!(config.sampling.temperature, 1.1);
        assert_eq!(config.sampling.seed, 42);
        assert_eq!(config.server.port, 8768);
        assert_eq!(config.story.wrap_width, 90);
    }

    #[test]
    fn empty_yaml_is_all_defaults() {
        let config: Config = serde_yml::from_str("{}").unwrap();
        assert!(config.tts.enabled);
        assert_eq!(config.tts.voice, "af_heart");
        assert_eq!(config.sampling.max_tokens, 200);
    }
}
