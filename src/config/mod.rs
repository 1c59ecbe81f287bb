//! Configuration loading
//!
//! JSON5 file plus environment overrides. The file is optional; a missing
//! file yields defaults. Credentials are never required at load time: a
//! deployment without them starts and then rejects webhooks (fail closed).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "switchboard.json5";

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SWITCHBOARD_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: json5::Error },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub telnyx: TelnyxConfig,
    pub twilio: TwilioConfig,
    pub voice_vendor: VoiceVendorConfig,
    pub security: SecurityConfig,
    pub records: RecordsConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind: String,
    /// How long finished calls stay in the action store.
    pub call_retention_secs: u64,
    /// How long calls that never finish stay in the action store.
    pub call_idle_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            call_retention_secs: 3600,
            call_idle_ttl_secs: 14_400,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `switchboard=debug,info`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelnyxConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    /// Base64 Ed25519 public key for `/webhooks/telnyx/call`.
    pub public_key: Option<String>,
    /// Per-endpoint keys for `/webhooks/telnyx/public/{endpoint}/call`.
    pub endpoint_keys: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for TelnyxConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: crate::dispatch::TELNYX_API_BASE.to_string(),
            public_key: None,
            endpoint_keys: BTreeMap::new(),
            timeout_secs: crate::dispatch::DEFAULT_DISPATCH_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TwilioConfig {
    pub auth_token: Option<String>,
    /// Public origin Twilio posts to, e.g. `https://voice.example.com`.
    /// The signed URL is this plus the request path and query.
    pub webhook_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceVendorConfig {
    pub sip_host: String,
}

impl Default for VoiceVendorConfig {
    fn default() -> Self {
        Self {
            sip_host: "sip.retellai.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "test" | "staging" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub environment: Environment,
    /// Accept webhooks that fail verification, with a warning. Ignored in
    /// production.
    pub allow_unsigned_webhooks: bool,
}

impl SecurityConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordsConfig {
    /// External call-record service. Records stay in memory when unset.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    pub executor_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            executor_url: None,
            timeout_secs: 8,
        }
    }
}

/// Resolve the config path: explicit flag, then `SWITCHBOARD_CONFIG`, then
/// the default file name.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the file at `path` (defaults when it does not exist) and apply
/// environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => json5::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        }
        Err(source) => {
            return Err(ConfigError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

impl Config {
    /// Overlay environment values. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bind) = get("SWITCHBOARD_BIND") {
            self.server.bind = bind;
        }
        if let Some(level) = get("SWITCHBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(key) = get("TELNYX_API_KEY") {
            self.telnyx.api_key = Some(key);
        }
        if let Some(key) = get("TELNYX_PUBLIC_KEY") {
            self.telnyx.public_key = Some(key);
        }
        if let Some(token) = get("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(token);
        }
        if let Some(host) = get("VOICE_VENDOR_SIP_HOST") {
            self.voice_vendor.sip_host = host;
        }
        if let Some(env) = get("SWITCHBOARD_ENV") {
            match Environment::parse(&env) {
                Some(parsed) => self.security.environment = parsed,
                None => warn!(value = %env, "unrecognised SWITCHBOARD_ENV, keeping configured environment"),
            }
        }
        if let Some(allow) = get("SWITCHBOARD_ALLOW_UNSIGNED_WEBHOOKS") {
            self.security.allow_unsigned_webhooks = allow == "true" || allow == "1";
        }
    }

    /// Problems worth a warning at startup. None of them stop the server.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.telnyx.public_key.is_none() && self.telnyx.endpoint_keys.is_empty() {
            problems.push("telnyx.publicKey is not set; Telnyx webhooks will be rejected".to_string());
        }
        if self.telnyx.api_key.is_none() {
            problems.push("telnyx.apiKey is not set; answer/transfer requests will fail".to_string());
        }
        if self.twilio.auth_token.is_none() {
            problems.push("twilio.authToken is not set; Twilio webhooks will be rejected".to_string());
        }
        if self.twilio.auth_token.is_some() && self.twilio.webhook_base_url.is_none() {
            problems.push(
                "twilio.webhookBaseUrl is not set; signatures are checked against the Host header"
                    .to_string(),
            );
        }
        if self.security.allow_unsigned_webhooks {
            if self.security.is_production() {
                problems.push(
                    "security.allowUnsignedWebhooks is ignored in production".to_string(),
                );
            } else {
                problems.push(
                    "security.allowUnsignedWebhooks is on; unverified webhooks will be accepted"
                        .to_string(),
                );
            }
        }
        if self.telnyx.timeout_secs == 0 {
            problems.push("telnyx.timeoutSecs is 0; using the 10s default".to_string());
        }

        problems
    }
}

/// Keys whose values are replaced by `config show`.
const SECRET_KEYS: &[&str] = &["apiKey", "authToken", "publicKey", "endpointKeys"];

/// Serialize `config` with every secret replaced by `[REDACTED]`.
pub fn redacted(config: &Config) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    redact_secrets(&mut value);
    value
}

fn redact_secrets(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && !val.is_null() {
                    *val = serde_json::Value::String("[REDACTED]".to_string());
                } else {
                    redact_secrets(val);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config.voice_vendor.sip_host, "sip.retellai.com");
        assert_eq!(config.telnyx.timeout_secs, 10);
        assert!(config.security.is_production());
        assert!(!config.security.allow_unsigned_webhooks);
    }

    #[test]
    fn test_parse_json5_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                // comments and trailing commas are fine
                server: {{ bind: "0.0.0.0:9000" }},
                telnyx: {{
                    apiKey: "KEY",
                    publicKey: "cHVi",
                    endpointKeys: {{ partner: "cGFydG5lcg==" }},
                }},
                security: {{ environment: "development", allowUnsignedWebhooks: true }},
                voiceVendor: {{ sipHost: "sip.example.net" }},
            }}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.call_retention_secs, 3600);
        assert_eq!(config.server.call_idle_ttl_secs, 14_400);
        assert_eq!(config.telnyx.api_key.as_deref(), Some("KEY"));
        assert_eq!(config.telnyx.endpoint_keys["partner"], "cGFydG5lcg==");
        assert_eq!(config.telnyx.api_base_url, "https://api.telnyx.com/v2");
        assert_eq!(config.security.environment, Environment::Development);
        assert_eq!(config.voice_vendor.sip_host, "sip.example.net");
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ server: ").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SWITCHBOARD_BIND", "0.0.0.0:7000"),
            ("TELNYX_API_KEY", "from-env"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("SWITCHBOARD_ENV", "development"),
            ("SWITCHBOARD_ALLOW_UNSIGNED_WEBHOOKS", "1"),
            ("VOICE_VENDOR_SIP_HOST", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.bind, "0.0.0.0:7000");
        assert_eq!(config.telnyx.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.twilio.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.security.environment, Environment::Development);
        assert!(config.security.allow_unsigned_webhooks);
        // Empty values do not override.
        assert_eq!(config.voice_vendor.sip_host, "sip.retellai.com");
    }

    #[test]
    fn test_unknown_env_keeps_production() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == "SWITCHBOARD_ENV").then(|| "qa-ish".to_string()));
        assert!(config.security.is_production());
    }

    #[test]
    fn test_validate_warns_without_failing() {
        let problems = Config::default().validate();
        assert!(problems.iter().any(|p| p.contains("telnyx.publicKey")));
        assert!(problems.iter().any(|p| p.contains("twilio.authToken")));

        let mut config = Config::default();
        config.security.allow_unsigned_webhooks = true;
        assert!(config
            .validate()
            .iter()
            .any(|p| p.contains("ignored in production")));
    }

    #[test]
    fn test_redaction() {
        let mut config = Config::default();
        config.telnyx.api_key = Some("secret-key".to_string());
        config
            .telnyx
            .endpoint_keys
            .insert("partner".to_string(), "abc".to_string());

        let value = redacted(&config);
        let text = value.to_string();
        assert!(!text.contains("secret-key"));
        assert!(!text.contains("\"abc\""));
        assert_eq!(value["telnyx"]["apiKey"], "[REDACTED]");
        assert!(value["twilio"]["authToken"].is_null());
        assert_eq!(value["voiceVendor"]["sipHost"], "sip.retellai.com");
    }
}
