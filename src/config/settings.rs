use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub claude: ClaudeSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub http_client: HttpClientSettings,
}

/// Claude 渠道设置：beta 默认值与 header 透传/伪装相关开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSettings {
    #[serde(default)]
    pub default_beta_enabled: bool,
    #[serde(default)]
    pub default_beta_header: String,
    /// Extra headers written per origin model name, applied after all other
    /// header rules so deployments can pin provider-specific values.
    #[serde(default)]
    pub model_headers: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub fingerprint: ClientFingerprint,
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            default_beta_enabled: false,
            default_beta_header: String::new(),
            model_headers: HashMap::new(),
            fingerprint: ClientFingerprint::default(),
        }
    }
}

/// Fingerprint the adaptor synthesizes when an inbound request carries no
/// `x-stainless-*` identity at all (only while default-beta is enabled).
/// Defaults mimic the official TypeScript SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFingerprint {
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_package_version")]
    pub package_version: String,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_lang() -> String {
    "js".to_string()
}
fn default_package_version() -> String {
    "0.55.1".to_string()
}
fn default_os() -> String {
    "MacOS".to_string()
}
fn default_arch() -> String {
    "arm64".to_string()
}
fn default_runtime() -> String {
    "node".to_string()
}
fn default_runtime_version() -> String {
    "v22.12.0".to_string()
}
fn default_retry_count() -> String {
    "0".to_string()
}
fn default_timeout() -> String {
    "600".to_string()
}
fn default_user_agent() -> String {
    "anthropic-typescript/0.55.1".to_string()
}

impl Default for ClientFingerprint {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            package_version: default_package_version(),
            os: default_os(),
            arch: default_arch(),
            runtime: default_runtime(),
            runtime_version: default_runtime_version(),
            retry_count: default_retry_count(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl LedgerSettings {
    /// Environment takes precedence over file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("LEDGER_BASE_URL")
            && !url.trim().is_empty()
        {
            self.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("LEDGER_API_KEY")
            && !key.trim().is_empty()
        {
            self.api_key = Some(key);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}
fn default_pool_max_idle_per_host() -> usize {
    10
}
fn default_pool_idle_timeout_secs() -> u64 {
    90
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| GatewayError::Config(format!("read {}: {}", path, e)))?;
                Self::parse(&content)?
            }
            None => Settings::default(),
        };
        settings.ledger.apply_env();
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];

        for name in &possible_names {
            if Path::new(name).exists() {
                return Some(name.to_string());
            }
        }

        None
    }
}
