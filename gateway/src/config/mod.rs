//! Configuration management
//!
//! This module handles loading, validation, and management of the Parley
//! gateway configuration. Configuration is stored in TOML format at
//! ~/.parley/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **auth**: Shared access key and identity provider endpoint
//! - **backends**: Base URL and per-call deadline for each external service
//! - **session**: Conversation memory bounds and idle eviction
//! - **breaker**: Circuit breaker thresholds and retry budget
//! - **server**: HTTP bind address
//!
//! # Examples
//!
//! ```no_run
//! use parley_gateway::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Listening on {}:{}", config.server.bind, config.server.port);
//! println!("History cap: {}", config.session.max_history_turns);
//! # Ok(())
//! # }
//! ```

use sdk::errors::GatewayError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// This structure represents the complete Parley configuration loaded from
/// ~/.parley/config.toml. All sections have usable defaults except the
/// access key, which must be set before the gateway accepts requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core gateway settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Authentication settings
    pub auth: AuthConfig,

    /// External backend endpoints
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Session memory settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Circuit breaker and retry settings
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Core gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared access key compared for equality against the caller-supplied key
    pub access_key: String,

    /// Base URL of the identity provider used for token introspection
    #[serde(default = "default_identity_base_url")]
    pub identity_base_url: String,

    /// Deadline for identity provider calls in seconds
    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
}

/// External backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendsConfig {
    /// Speech-to-text backend settings
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Vector search backend settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Language generation backend settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Speech synthesis backend settings
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// Transcription backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Base URL for the transcription service
    #[serde(default = "default_transcription_base_url")]
    pub base_url: String,

    /// Per-call deadline in seconds
    #[serde(default = "default_transcription_timeout")]
    pub timeout_secs: u64,
}

/// Retrieval backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL for the retrieval service
    #[serde(default = "default_retrieval_base_url")]
    pub base_url: String,

    /// Per-call deadline in seconds
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,

    /// Number of passages requested per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL for the generation service
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// Per-call deadline in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

/// Synthesis backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL for the synthesis service
    #[serde(default = "default_synthesis_base_url")]
    pub base_url: String,

    /// Per-call deadline in seconds
    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,

    /// Voice identifier passed through to the synthesis backend
    #[serde(default)]
    pub voice_id: Option<String>,
}

/// Session memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum turns kept per session; oldest evicted first
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Recent turns included in the retrieval query for disambiguation
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// Sessions idle longer than this are evictable
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// How often the eviction sweep runs
    #[serde(default = "default_evict_interval")]
    pub evict_interval_secs: u64,
}

/// Circuit breaker and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before a backend's circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a probe
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Retries per backend call after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base backoff delay in milliseconds, doubled per retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_identity_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_identity_timeout() -> u64 {
    5
}

fn default_transcription_base_url() -> String {
    "http://localhost:50051".to_string()
}

fn default_transcription_timeout() -> u64 {
    30
}

fn default_retrieval_base_url() -> String {
    "http://localhost:50052".to_string()
}

fn default_retrieval_timeout() -> u64 {
    10
}

fn default_top_k() -> usize {
    4
}

fn default_generation_base_url() -> String {
    "http://localhost:50053".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_synthesis_base_url() -> String {
    "http://localhost:50054".to_string()
}

fn default_synthesis_timeout() -> u64 {
    30
}

fn default_max_history_turns() -> usize {
    20
}

fn default_context_turns() -> usize {
    6
}

fn default_idle_ttl() -> u64 {
    1800
}

fn default_evict_interval() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: default_transcription_base_url(),
            timeout_secs: default_transcription_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_retrieval_base_url(),
            timeout_secs: default_retrieval_timeout(),
            top_k: default_top_k(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_synthesis_base_url(),
            timeout_secs: default_synthesis_timeout(),
            voice_id: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
            context_turns: default_context_turns(),
            idle_ttl_secs: default_idle_ttl(),
            evict_interval_secs: default_evict_interval(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl SessionConfig {
    /// Idle threshold as a `Duration`
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

impl BreakerConfig {
    /// Cooldown as a `Duration`
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Base backoff as a `Duration`
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Config {
    /// Load configuration from the default location (~/.parley/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default
    /// configuration. Validates the configuration after loading and returns
    /// descriptive errors if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, GatewayError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, GatewayError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save it to path
    ///
    /// The created file carries a placeholder access key, so the result of
    /// this function fails validation until the operator edits it. The file
    /// is still written to give them something to edit.
    fn create_default(path: &Path) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GatewayError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| GatewayError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| GatewayError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.parley/config.toml)
    pub fn default_config_path() -> Result<PathBuf, GatewayError> {
        let home = dirs::home_dir()
            .ok_or_else(|| GatewayError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".parley").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            auth: AuthConfig {
                access_key: String::new(),
                identity_base_url: default_identity_base_url(),
                timeout_secs: default_identity_timeout(),
            },
            backends: BackendsConfig::default(),
            session: SessionConfig::default(),
            breaker: BreakerConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or bounds are
    /// nonsensical (zero history cap, zero top-k, empty access key).
    pub fn validate(&self) -> Result<(), GatewayError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(GatewayError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.auth.access_key.is_empty() {
            return Err(GatewayError::Config(
                "auth.access_key must be set".to_string(),
            ));
        }

        if self.session.max_history_turns == 0 {
            return Err(GatewayError::Config(
                "session.max_history_turns must be at least 1".to_string(),
            ));
        }

        if self.backends.retrieval.top_k == 0 {
            return Err(GatewayError::Config(
                "backends.retrieval.top_k must be at least 1".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(GatewayError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default_config();
        config.auth.access_key = "test-key".to_string();
        config
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.session.max_history_turns, 20);
        assert_eq!(config.backends.retrieval.top_k, 4);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown_secs, 30);
        assert_eq!(config.breaker.retries, 2);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_validation_rejects_empty_access_key() {
        let config = Config::default_config();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_history_cap() {
        let mut config = valid_config();
        config.session.max_history_turns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let mut config = valid_config();
        config.core.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = valid_config();
        let toml_string = toml::to_string(&config).unwrap();

        // Verify it can be deserialized back
        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.session.max_history_turns,
            deserialized.session.max_history_turns
        );
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(
            &path,
            r#"
[auth]
access_key = "secret"

[session]
max_history_turns = 8
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.auth.access_key, "secret");
        assert_eq!(config.session.max_history_turns, 8);
        // Unspecified sections fall back to defaults
        assert_eq!(config.backends.retrieval.top_k, 4);
    }

    #[test]
    fn test_load_from_missing_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");

        assert!(Config::load_from_path(&path).is_err());
    }
}
