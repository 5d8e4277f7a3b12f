//! Client configuration: YAML file with serde defaults, then environment overrides.
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretBox;
use serde::Deserialize;

use sl_base::constants::{
    DEFAULT_AGENT_NAME, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES, DEFAULT_STALL_TIMEOUT_MS,
    MANUAL_RETRY_LIMIT, STORE_DIR,
};

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "storyloom.yaml";

const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api/chat/stream";

#[derive(Debug)]
pub enum ConfigError {
    /// Config file exists but could not be read
    Read { path: PathBuf, source: std::io::Error },
    /// Config file is not valid YAML for `ClientConfig`
    Parse(serde_yaml::Error),
    /// A field holds a value the client cannot work with
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => write!(f, "Cannot read {}: {}", path.display(), source),
            ConfigError::Parse(e) => write!(f, "Cannot parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

/// An agent the client can route to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    /// Lower-case keywords that select this agent during intent classification
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub intent_endpoint: Option<String>,
    #[serde(skip)]
    pub api_token: Option<SecretBox<String>>,
    pub user_id: String,
    pub project_id: Option<String>,
    pub model_provider: Option<String>,
    pub model: Option<String>,
    pub enable_web_search: bool,
    pub enable_knowledge_base: bool,
    pub retry: RetrySettings,
    /// No signal for this long cancels the stream; 0 disables the check
    pub stall_timeout_ms: u64,
    pub manual_retry_limit: u32,
    pub store_dir: PathBuf,
    pub agents: Vec<AgentProfile>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            intent_endpoint: None,
            api_token: None,
            user_id: "local".to_string(),
            project_id: None,
            model_provider: None,
            model: None,
            enable_web_search: false,
            enable_knowledge_base: false,
            retry: RetrySettings::default(),
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
            manual_retry_limit: MANUAL_RETRY_LIMIT,
            store_dir: PathBuf::from(STORE_DIR),
            agents: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load `path` if it exists (defaults otherwise), apply env overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = if path.exists() {
            let yaml = fs::read_to_string(path)
                .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
            Self::from_yaml(&yaml)?
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = env::var("STORYLOOM_ENDPOINT") {
            self.endpoint = v;
        }
        if let Ok(v) = env::var("STORYLOOM_INTENT_ENDPOINT") {
            self.intent_endpoint = Some(v);
        }
        if let Ok(v) = env::var("STORYLOOM_TOKEN") {
            self.api_token = Some(SecretBox::new(Box::new(v)));
        }
        if let Ok(v) = env::var("STORYLOOM_USER_ID") {
            self.user_id = v;
        }
        if let Ok(v) = env::var("STORYLOOM_PROJECT_ID") {
            self.project_id = Some(v);
        }
        if let Ok(v) = env::var("STORYLOOM_STORE_DIR") {
            self.store_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint is empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("user_id is empty".into()));
        }
        if let Some(dup) = self.agents.iter().enumerate().find_map(|(i, a)| {
            self.agents[..i].iter().any(|b| b.id == a.id).then_some(a.id.as_str())
        }) {
            return Err(ConfigError::Invalid(format!("agent id '{}' declared twice", dup)));
        }
        Ok(())
    }

    /// `None` when stall detection is disabled.
    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_ms > 0).then(|| Duration::from_millis(self.stall_timeout_ms))
    }

    /// Display name for an agent id, falling back to the generic assistant name.
    pub fn agent_name(&self, agent_id: Option<&str>) -> String {
        agent_id
            .and_then(|id| self.agents.iter().find(|a| a.id == id))
            .map(|a| a.name.clone())
            .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg = ClientConfig::from_yaml("").unwrap();
        assert_eq!(cfg.retry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.manual_retry_limit, 3);
        assert_eq!(cfg.store_dir, PathBuf::from(STORE_DIR));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = ClientConfig::from_yaml(
            "endpoint: https://example.test/stream\nretry:\n  max_retries: 5\nagents:\n  - id: writer\n    name: Story Writer\n    keywords: [outline, plot]\n",
        )
        .unwrap();
        assert_eq!(cfg.endpoint, "https://example.test/stream");
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.initial_delay_ms, DEFAULT_INITIAL_DELAY_MS);
        assert_eq!(cfg.agents[0].keywords, vec!["outline", "plot"]);
    }

    #[test]
    fn invalid_yaml_is_parse_error() {
        let err = ClientConfig::from_yaml("retry: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validate_rejects_empty_endpoint() {
        let cfg = ClientConfig { endpoint: "  ".into(), ..ClientConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_duplicate_agents() {
        let agent = AgentProfile { id: "a".into(), name: "A".into(), keywords: vec![] };
        let cfg = ClientConfig { agents: vec![agent.clone(), agent], ..ClientConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stall_timeout_zero_disables() {
        let cfg = ClientConfig { stall_timeout_ms: 0, ..ClientConfig::default() };
        assert!(cfg.stall_timeout().is_none());
    }

    #[test]
    fn agent_name_falls_back() {
        let cfg = ClientConfig {
            agents: vec![AgentProfile { id: "critic".into(), name: "Script Critic".into(), keywords: vec![] }],
            ..ClientConfig::default()
        };
        assert_eq!(cfg.agent_name(Some("critic")), "Script Critic");
        assert_eq!(cfg.agent_name(Some("nobody")), DEFAULT_AGENT_NAME);
        assert_eq!(cfg.agent_name(None), DEFAULT_AGENT_NAME);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ClientConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert!(!cfg.endpoint.is_empty());
    }
}
