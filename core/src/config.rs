use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Record runs to the journal
    #[serde(default = "default_true")]
    pub journal_enabled: bool,

    /// Path to the run journal (optional, uses default if None)
    pub journal_path: Option<String>,

    /// Model API configuration
    pub api: ApiConfig,

    /// Synthesis pipeline options
    pub pipeline: PipelineConfig,

    /// Transition rendering options
    pub transition: TransitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Chat-completions endpoint (OpenAI compatible)
    pub endpoint: String,

    /// API key sent as a bearer token
    pub api_key: Option<String>,

    /// Model used for image editing
    pub image_model: String,

    /// Model used for judging candidates
    pub judge_model: String,

    /// Per-request timeout in seconds; requests are unbounded when unset
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default output width in pixels
    pub width: u32,

    /// Default output height in pixels
    pub height: u32,

    /// Number of concurrent candidate generations
    pub fan_out: usize,

    /// Whole-pipeline attempts before giving up
    pub max_attempts: u32,

    /// Reject results whose similarity to the reference is rated low
    pub quality_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Render the before/after cross-fade
    pub enabled: bool,

    /// ffmpeg binary (name on PATH or absolute path)
    pub ffmpeg_path: String,

    /// Default cross-fade length in milliseconds
    pub duration_ms: u64,

    /// Frame rate of the animation
    pub fps: u32,

    /// Directory for staged stills (system temp dir if None)
    pub temp_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_enabled: true,
            journal_path: None,
            api: ApiConfig {
                endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
                api_key: None,
                image_model: "google/gemini-2.5-flash-image-preview".to_string(),
                judge_model: "openai/gpt-5-mini".to_string(),
                timeout_secs: None,
            },
            pipeline: PipelineConfig {
                width: 400,
                height: 400,
                fan_out: 5,
                max_attempts: 2,
                quality_check: false,
            },
            transition: TransitionConfig {
                enabled: true,
                ffmpeg_path: "ffmpeg".to_string(),
                duration_ms: 1000,
                fps: 18,
                temp_dir: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Get the default config path (~/.config/restyle/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("restyle").join("config.toml"))
    }

    /// Load from default path, or return default config if not found
    pub fn load_or_default() -> Self {
        Self::default_path()
            .and_then(|p| Self::load(&p).ok())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;
        if pipeline.width == 0 || pipeline.height == 0 {
            return Err(ConfigError::Invalid(
                "pipeline width and height must be positive".to_string(),
            ));
        }
        if pipeline.fan_out == 0 {
            return Err(ConfigError::Invalid(
                "pipeline fan_out must be at least 1".to_string(),
            ));
        }
        if pipeline.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pipeline max_attempts must be at least 1".to_string(),
            ));
        }
        if self.transition.fps == 0 || self.transition.duration_ms == 0 {
            return Err(ConfigError::Invalid(
                "transition fps and duration_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.fan_out, 5);
        assert_eq!(config.pipeline.max_attempts, 2);
        assert_eq!((config.pipeline.width, config.pipeline.height), (400, 400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.api.image_model, config.api.image_model);
        assert_eq!(parsed.transition.fps, config.transition.fps);
    }

    #[test]
    fn test_load_rejects_zero_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.pipeline.fan_out = 0;
        config.save(&path).unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }
}
