use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_API_URL: &str = "http://localhost:5001/api";
pub const DEFAULT_USER_ID: &str = "demo-user-123";
pub const HELIX_SYSTEM_MESSAGE: &str =
    "You are Helix, an AI recruiting assistant. Help create effective recruiting outreach sequences.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Route chat and generation through the backend; when false the direct
    /// provider path is used instead.
    pub use_backend_api: bool,
    pub use_anthropic: bool,
    pub debug_mode: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { use_backend_api: true, use_anthropic: true, debug_mode: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealtimeSettings {
    pub events_path: String,
    pub max_reconnect_attempts: u32,
    pub poll_interval_ms: u64,
    pub echo_window_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            events_path: "/events".into(),
            max_reconnect_attempts: 3,
            poll_interval_ms: 5_000,
            echo_window_ms: 3_000,
        }
    }
}

impl RealtimeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_message: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderSettings {
    pub fn openai_defaults() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            system_message: HELIX_SYSTEM_MESSAGE.into(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }

    pub fn anthropic_defaults() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1".into(),
            api_key: None,
            model: "claude-3-5-sonnet-20241022".into(),
            system_message: HELIX_SYSTEM_MESSAGE.into(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Configuration built once at startup and handed to every store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub api_base_url: String,
    pub user_id: String,
    pub request_timeout_ms: u64,
    pub features: FeatureFlags,
    pub realtime: RealtimeSettings,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            user_id: DEFAULT_USER_ID.into(),
            request_timeout_ms: 30_000,
            features: FeatureFlags::default(),
            realtime: RealtimeSettings::default(),
            openai: ProviderSettings::openai_defaults(),
            anthropic: ProviderSettings::anthropic_defaults(),
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn events_url(&self) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), self.realtime.events_path)
    }

    pub fn validate(&self) -> ClientResult<()> {
        let parsed = url::Url::parse(&self.api_base_url)
            .map_err(|e| ClientError::Config(format!("api_base_url {}: {}", self.api_base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!("unsupported scheme {}", parsed.scheme())));
        }
        if self.user_id.trim().is_empty() {
            return Err(ClientError::Config("user_id must not be empty".into()));
        }
        Ok(())
    }
}

/// One partial configuration layer: a JSON file, the environment, or the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub use_backend_api: Option<bool>,
    pub use_anthropic: Option<bool>,
    pub debug_mode: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub echo_window_ms: Option<u64>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
}

impl ConfigOverrides {
    pub fn from_file(path: &Path) -> ClientResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| get(key).and_then(|v| parse_bool(&v));
        Self {
            api_base_url: get("HELIX_API_URL"),
            user_id: get("HELIX_USER_ID"),
            request_timeout_ms: get("HELIX_TIMEOUT_MS").and_then(|v| v.parse().ok()),
            use_backend_api: flag("HELIX_USE_BACKEND"),
            use_anthropic: flag("HELIX_USE_ANTHROPIC"),
            debug_mode: flag("HELIX_DEBUG"),
            max_reconnect_attempts: None,
            poll_interval_ms: None,
            echo_window_ms: None,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: None,
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_model: None,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolve layers field by field: cli over env over file over defaults.
pub fn resolve_config(
    file: &ConfigOverrides,
    env: &ConfigOverrides,
    cli: &ConfigOverrides,
) -> AppConfig {
    let base = AppConfig::default();

    let mut openai = base.openai.clone();
    openai.api_key = cli
        .openai_api_key
        .clone()
        .or_else(|| env.openai_api_key.clone())
        .or_else(|| file.openai_api_key.clone());
    if let Some(model) = cli
        .openai_model
        .clone()
        .or_else(|| env.openai_model.clone())
        .or_else(|| file.openai_model.clone())
    {
        openai.model = model;
    }

    let mut anthropic = base.anthropic.clone();
    anthropic.api_key = cli
        .anthropic_api_key
        .clone()
        .or_else(|| env.anthropic_api_key.clone())
        .or_else(|| file.anthropic_api_key.clone());
    if let Some(model) = cli
        .anthropic_model
        .clone()
        .or_else(|| env.anthropic_model.clone())
        .or_else(|| file.anthropic_model.clone())
    {
        anthropic.model = model;
    }

    let features = FeatureFlags {
        use_backend_api: cli
            .use_backend_api
            .or(env.use_backend_api)
            .or(file.use_backend_api)
            .unwrap_or(base.features.use_backend_api),
        use_anthropic: cli
            .use_anthropic
            .or(env.use_anthropic)
            .or(file.use_anthropic)
            .unwrap_or(base.features.use_anthropic),
        debug_mode: cli
            .debug_mode
            .or(env.debug_mode)
            .or(file.debug_mode)
            .unwrap_or(base.features.debug_mode),
    };

    let realtime = RealtimeSettings {
        events_path: base.realtime.events_path.clone(),
        max_reconnect_attempts: cli
            .max_reconnect_attempts
            .or(env.max_reconnect_attempts)
            .or(file.max_reconnect_attempts)
            .unwrap_or(base.realtime.max_reconnect_attempts),
        poll_interval_ms: cli
            .poll_interval_ms
            .or(env.poll_interval_ms)
            .or(file.poll_interval_ms)
            .unwrap_or(base.realtime.poll_interval_ms),
        echo_window_ms: cli
            .echo_window_ms
            .or(env.echo_window_ms)
            .or(file.echo_window_ms)
            .unwrap_or(base.realtime.echo_window_ms),
    };

    AppConfig {
        api_base_url: cli
            .api_base_url
            .clone()
            .or_else(|| env.api_base_url.clone())
            .or_else(|| file.api_base_url.clone())
            .unwrap_or(base.api_base_url),
        user_id: cli
            .user_id
            .clone()
            .or_else(|| env.user_id.clone())
            .or_else(|| file.user_id.clone())
            .unwrap_or(base.user_id),
        request_timeout_ms: cli
            .request_timeout_ms
            .or(env.request_timeout_ms)
            .or(file.request_timeout_ms)
            .unwrap_or(base.request_timeout_ms),
        features,
        realtime,
        openai,
        anthropic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn precedence_cli_over_env_over_file() {
        let file = ConfigOverrides {
            api_base_url: Some("http://file:1/api".into()),
            user_id: Some("file-user".into()),
            poll_interval_ms: Some(9_000),
            use_anthropic: Some(false),
            openai_api_key: Some("file-key".into()),
            ..Default::default()
        };
        let env = ConfigOverrides {
            api_base_url: Some("http://env:2/api".into()),
            use_backend_api: Some(false),
            openai_api_key: Some("env-key".into()),
            ..Default::default()
        };
        let cli = ConfigOverrides {
            api_base_url: Some("http://cli:3/api".into()),
            ..Default::default()
        };

        let cfg = resolve_config(&file, &env, &cli);

        assert_eq!(cfg.api_base_url, "http://cli:3/api");
        assert_eq!(cfg.user_id, "file-user"); // from file
        assert!(!cfg.features.use_backend_api); // from env
        assert!(!cfg.features.use_anthropic); // from file
        assert_eq!(cfg.realtime.poll_interval_ms, 9_000);
        assert_eq!(cfg.realtime.max_reconnect_attempts, 3); // default
        assert_eq!(cfg.openai.api_key.as_deref(), Some("env-key"));
        assert_eq!(cfg.anthropic.model, "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn env_lookup_parses_flags() {
        let vars: HashMap<&str, &str> = [
            ("HELIX_API_URL", "http://example.test/api"),
            ("HELIX_USE_BACKEND", "off"),
            ("HELIX_USE_ANTHROPIC", "maybe"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]
        .into_iter()
        .collect();
        let env = ConfigOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(env.api_base_url.as_deref(), Some("http://example.test/api"));
        assert_eq!(env.use_backend_api, Some(false));
        assert_eq!(env.use_anthropic, None);
        assert_eq!(env.anthropic_api_key.as_deref(), Some("sk-ant"));
    }

    #[test]
    fn file_layer_loads_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("helix.json");
        std::fs::write(&path, r#"{"user_id":"u-9","echo_window_ms":250}"#).unwrap();
        let layer = ConfigOverrides::from_file(&path).unwrap();
        assert_eq!(layer.user_id.as_deref(), Some("u-9"));
        assert_eq!(layer.echo_window_ms, Some(250));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(ConfigOverrides::from_file(&path), Err(ClientError::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.events_url(), "http://localhost:5001/api/events");
        cfg.api_base_url = "localhost:5001".into();
        assert!(cfg.validate().is_err());
        cfg.api_base_url = "ftp://host/api".into();
        assert!(cfg.validate().is_err());
    }
}
