//! Configuration loading, validation, and management for Paperflow.
//!
//! Loads configuration from `~/.paperflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use paperflow_core::{AgentType, AiProvider};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.paperflow/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider credentials and endpoints, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Which provider and model each cloud agent uses
    #[serde(default = "default_agent_routes")]
    pub agents: BTreeMap<String, AgentRoute>,

    /// Per-provider admission limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default pipeline shape and state retention
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Routing of one agent type onto a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRoute {
    pub provider: AiProvider,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn builtin_route(agent_type: AgentType) -> AgentRoute {
    let provider = match agent_type {
        AgentType::ContentSummarizer | AgentType::ConceptExplainer => AiProvider::Anthropic,
        AgentType::PerplexityResearcher | AgentType::RelatedPaperDiscovery => AiProvider::Perplexity,
        _ => AiProvider::OpenAi,
    };
    AgentRoute { provider, model: None }
}

fn default_agent_routes() -> BTreeMap<String, AgentRoute> {
    AgentType::ALL
        .into_iter()
        .map(|t| (t.as_str().to_string(), builtin_route(t)))
        .collect()
}

// ── Rate limits ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Short (burst) window length
    #[serde(default = "default_short_window_ms")]
    pub short_window_ms: u64,

    /// Long (sustained) window length
    #[serde(default = "default_long_window_ms")]
    pub long_window_ms: u64,

    /// Limits keyed by provider name
    #[serde(default = "default_provider_limits")]
    pub providers: BTreeMap<String, ProviderLimits>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Requests admitted per short window
    pub short_term_limit: u32,
    /// Requests admitted per long window
    pub long_term_limit: u32,
}

fn default_short_window_ms() -> u64 {
    1_000
}
fn default_long_window_ms() -> u64 {
    60_000
}

/// Built-in limits; Perplexity is deliberately conservative.
pub fn builtin_limits(provider: AiProvider) -> ProviderLimits {
    match provider {
        AiProvider::OpenAi => ProviderLimits { short_term_limit: 3, long_term_limit: 200 },
        AiProvider::Perplexity => ProviderLimits { short_term_limit: 2, long_term_limit: 50 },
        AiProvider::Anthropic => ProviderLimits { short_term_limit: 10, long_term_limit: 600 },
    }
}

fn default_provider_limits() -> BTreeMap<String, ProviderLimits> {
    AiProvider::ALL
        .into_iter()
        .map(|p| (p.as_str().to_string(), builtin_limits(p)))
        .collect()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_window_ms: default_short_window_ms(),
            long_window_ms: default_long_window_ms(),
            providers: default_provider_limits(),
        }
    }
}

impl RateLimitConfig {
    pub fn short_window(&self) -> Duration {
        Duration::from_millis(self.short_window_ms)
    }

    pub fn long_window(&self) -> Duration {
        Duration::from_millis(self.long_window_ms)
    }

    /// Limits for a provider, falling back to the built-in table.
    pub fn limits_for(&self, provider: AiProvider) -> ProviderLimits {
        self.providers
            .get(provider.as_str())
            .copied()
            .unwrap_or_else(|| builtin_limits(provider))
    }
}

// ── Circuit breaker ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Cooldown before an open circuit admits a trial call
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Minimum spacing between trial calls while half-open
    #[serde(default = "default_half_open_probe_interval_secs")]
    pub half_open_probe_interval_secs: u64,

    /// When set, a background sweep moves expired open circuits to half-open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_interval_secs: Option<u64>,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_open_timeout_secs() -> u64 {
    180
}
fn default_half_open_probe_interval_secs() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_secs: default_open_timeout_secs(),
            half_open_probe_interval_secs: default_half_open_probe_interval_secs(),
            monitor_interval_secs: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn half_open_probe_interval(&self) -> Duration {
        Duration::from_secs(self.half_open_probe_interval_secs)
    }

    /// Sweep interval; `None` (or zero) disables the sweep.
    pub fn monitor_interval(&self) -> Option<Duration> {
        self.monitor_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

// ── Retry ───────────────────────────────────────────────────────────────────

/// Retry budget for one agent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
}

impl RetrySettings {
    pub const fn new(max_retries: u32, initial_delay_ms: u64) -> Self {
        Self { max_retries, initial_delay_ms }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Symmetric jitter fraction (0.1 = ±10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Used for agent types without an entry in `agents`
    #[serde(default = "default_retry_settings")]
    pub default: RetrySettings,

    /// Per-agent-type overrides keyed by kebab-case agent type
    #[serde(default = "default_agent_retry_settings")]
    pub agents: BTreeMap<String, RetrySettings>,
}

fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.1
}
fn default_retry_settings() -> RetrySettings {
    RetrySettings::new(3, 8_000)
}

/// Built-in retry table, tuned to each provider's tolerance.
pub fn builtin_retry_settings(agent_type: AgentType) -> RetrySettings {
    match agent_type {
        AgentType::PaperProcessor => RetrySettings::new(3, 10_000),
        AgentType::ContentSummarizer => RetrySettings::new(4, 8_000),
        AgentType::ConceptExplainer => RetrySettings::new(4, 5_000),
        AgentType::MetadataEnhancer => RetrySettings::new(4, 5_000),
        AgentType::QualityChecker => RetrySettings::new(3, 6_000),
        AgentType::CitationFormatter => RetrySettings::new(3, 4_000),
        AgentType::PerplexityResearcher => RetrySettings::new(5, 15_000),
        AgentType::RelatedPaperDiscovery => RetrySettings::new(4, 12_000),
    }
}

fn default_agent_retry_settings() -> BTreeMap<String, RetrySettings> {
    AgentType::ALL
        .into_iter()
        .map(|t| (t.as_str().to_string(), builtin_retry_settings(t)))
        .collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            default: default_retry_settings(),
            agents: default_agent_retry_settings(),
        }
    }
}

impl RetryConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Retry budget for an agent type.
    pub fn settings_for(&self, agent_type: AgentType) -> RetrySettings {
        self.agents
            .get(agent_type.as_str())
            .copied()
            .unwrap_or(self.default)
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub include_metadata_enhancement: bool,

    #[serde(default = "default_true")]
    pub include_citation_processing: bool,

    #[serde(default)]
    pub include_research_discovery: bool,

    #[serde(default)]
    pub include_perplexity_research: bool,

    /// Style passed to the summarizer ("brief", "standard", "detailed")
    #[serde(default = "default_summary_style")]
    pub summary_style: String,

    /// Mode passed to related-paper discovery
    #[serde(default = "default_discovery_mode")]
    pub discovery_mode: String,

    /// How long finished runs stay visible in the active-run map
    #[serde(default = "default_state_retention_secs")]
    pub state_retention_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_summary_style() -> String {
    "standard".into()
}
fn default_discovery_mode() -> String {
    "related".into()
}
fn default_state_retention_secs() -> u64 {
    3_600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            include_metadata_enhancement: true,
            include_citation_processing: true,
            include_research_discovery: false,
            include_perplexity_research: false,
            summary_style: default_summary_style(),
            discovery_mode: default_discovery_mode(),
            state_retention_secs: default_state_retention_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn state_retention(&self) -> Duration {
        Duration::from_secs(self.state_retention_secs)
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.paperflow/config.toml).
    ///
    /// Provider API keys missing from the file are read from
    /// `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `PERPLEXITY_API_KEY`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Fill missing provider keys from the environment.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for provider in AiProvider::ALL {
            let var = format!("{}_API_KEY", provider.as_str().to_uppercase());
            let entry = self.providers.entry(provider.as_str().to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = lookup(&var);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".paperflow")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker thresholds must be at least 1".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationError(
                "retry.jitter must be in [0.0, 1.0)".into(),
            ));
        }

        if self.rate_limits.short_window_ms == 0 || self.rate_limits.long_window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limits windows must be greater than zero".into(),
            ));
        }

        for (name, limits) in &self.rate_limits.providers {
            name.parse::<AiProvider>().map_err(ConfigError::ValidationError)?;
            if limits.short_term_limit == 0 || limits.long_term_limit == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate_limits.providers.{name}: limits must be at least 1"
                )));
            }
        }

        for name in self.retry.agents.keys().chain(self.agents.keys()) {
            name.parse::<AgentType>().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// Route for an agent type, falling back to the built-in routing.
    pub fn route_for(&self, agent_type: AgentType) -> AgentRoute {
        self.agents
            .get(agent_type.as_str())
            .cloned()
            .unwrap_or_else(|| builtin_route(agent_type))
    }

    /// Provider settings by provider kind.
    pub fn provider(&self, provider: AiProvider) -> Option<&ProviderConfig> {
        self.providers.get(provider.as_str())
    }

    /// Check if an API key is available for a provider.
    pub fn has_api_key(&self, provider: AiProvider) -> bool {
        self.provider(provider)
            .and_then(|p| p.api_key.as_deref())
            .is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            agents: default_agent_routes(),
            rate_limits: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.open_timeout(), Duration::from_secs(180));
    }

    #[test]
    fn builtin_retry_table_matches_agents() {
        let retry = RetryConfig::default();
        assert_eq!(
            retry.settings_for(AgentType::PerplexityResearcher),
            RetrySettings::new(5, 15_000)
        );
        assert_eq!(
            retry.settings_for(AgentType::CitationFormatter),
            RetrySettings::new(3, 4_000)
        );
        assert_eq!(retry.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn partial_retry_table_falls_back_to_default() {
        let toml_str = r#"
[retry.default]
max_retries = 2
initial_delay_ms = 1000

[retry.agents.content-summarizer]
max_retries = 7
initial_delay_ms = 500
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.retry.settings_for(AgentType::ContentSummarizer),
            RetrySettings::new(7, 500)
        );
        assert_eq!(
            config.retry.settings_for(AgentType::QualityChecker),
            RetrySettings::new(2, 1000)
        );
    }

    #[test]
    fn rate_limit_defaults() {
        let limits = RateLimitConfig::default();
        assert_eq!(
            limits.limits_for(AiProvider::OpenAi),
            ProviderLimits { short_term_limit: 3, long_term_limit: 200 }
        );
        assert_eq!(
            limits.limits_for(AiProvider::Perplexity),
            ProviderLimits { short_term_limit: 2, long_term_limit: 50 }
        );
        assert_eq!(limits.short_window(), Duration::from_secs(1));
        assert_eq!(limits.long_window(), Duration::from_secs(60));
    }

    #[test]
    fn config_serialization_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.retry.agents.len(), AgentType::ALL.len());
        assert_eq!(parsed.route_for(AgentType::PerplexityResearcher).provider, AiProvider::Perplexity);
    }

    #[test]
    fn unknown_agent_key_rejected() {
        let toml_str = r#"
[retry.agents.paper-shredder]
max_retries = 1
initial_delay_ms = 10
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_threshold_rejected() {
        let mut config = AppConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn jitter_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.pipeline.state_retention_secs, 3_600);
        assert_eq!(config.route_for(AgentType::ContentSummarizer).provider, AiProvider::Anthropic);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[providers.openai]
api_key = "sk-test"

[rate_limits.providers.openai]
short_term_limit = 1
long_term_limit = 5

[pipeline]
include_research_discovery = true
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert!(config.has_api_key(AiProvider::OpenAi));
        assert_eq!(config.rate_limits.limits_for(AiProvider::OpenAi).long_term_limit, 5);
        // Providers missing from the overridden table fall back to built-ins
        assert_eq!(config.rate_limits.limits_for(AiProvider::Anthropic).short_term_limit, 10);
        assert!(config.pipeline.include_research_discovery);
        assert!(config.pipeline.include_metadata_enhancement);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_fill_missing_keys_only() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("from-file".into()),
                ..ProviderConfig::default()
            },
        );
        config.apply_env_overrides(|key| match key {
            "OPENAI_API_KEY" => Some("from-env".into()),
            "PERPLEXITY_API_KEY" => Some("pplx-env".into()),
            _ => None,
        });

        assert_eq!(config.provider(AiProvider::OpenAi).unwrap().api_key.as_deref(), Some("from-file"));
        assert_eq!(config.provider(AiProvider::Perplexity).unwrap().api_key.as_deref(), Some("pplx-env"));
        assert!(!config.has_api_key(AiProvider::Anthropic));
    }

    #[test]
    fn debug_redacts_api_keys() {
        let provider = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..ProviderConfig::default()
        };
        let debug = format!("{provider:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
