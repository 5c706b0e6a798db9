use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::client::{validate_region, ServiceFamily};
use crate::credentials::Credential;
use crate::mcp::context::{UpstreamSettings, DEFAULT_AI_REGION};
use crate::retry::{RetryPolicy, MAX_ATTEMPTS};

pub const ENV_ACCESS_KEY_ID: &str = "ALIYUN_ACCESS_KEY_ID";
pub const ENV_ACCESS_KEY_SECRET: &str = "ALIYUN_ACCESS_KEY_SECRET";
pub const ENV_SECURITY_TOKEN: &str = "ALIYUN_SECURITY_TOKEN";
pub const ENV_SERVER_HOST: &str = "MCP_SERVER_HOST";
pub const ENV_SERVER_PORT: &str = "MCP_SERVER_PORT";
pub const ENV_TRANSPORT: &str = "MCP_TRANSPORT";
pub const ENV_LOG_LEVEL: &str = "MCP_LOG_LEVEL";
pub const ENV_REGION: &str = "OBSERVABILITY_REGION";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read environment file {}: {message}", path.display())]
    EnvFile { path: PathBuf, message: String },

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error(
        "no credentials configured: set ALIYUN_ACCESS_KEY_ID and ALIYUN_ACCESS_KEY_SECRET \
         or pass --access-key-id and --access-key-secret"
    )]
    MissingCredentials,
}

/// Transport the server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Stdio,
    StreamableHttp,
    Sse,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "streamable-http" | "streamable_http" | "http" => Ok(TransportKind::StreamableHttp),
            "sse" => Ok(TransportKind::Sse),
            other => Err(ConfigError::InvalidValue {
                key: ENV_TRANSPORT.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MCPConfig {
    pub transport: TransportKind,
    pub server: ServerConfig,
    pub mcp: MCPProtocolConfig,
    pub logging: LoggingConfig,
    pub upstream: UpstreamConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MCPProtocolConfig {
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    #[serde(with = "duration_string")]
    pub default_timeout: Duration,
    #[serde(with = "duration_string")]
    pub ai_timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "duration_string")]
    pub retry_backoff: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
    pub ai_region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_endpoint: Option<String>,
    /// Endpoint templates keyed by service family (`log-search`, `metrics`, `trace`, `workspace`)
    pub endpoints: BTreeMap<String, String>,
}

/// Credential material; secrets are never serialised back out
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_key_secret: Option<String>,
    #[serde(skip_serializing)]
    pub security_token: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key_id", &self.access_key_id)
            .field(
                "access_key_secret",
                &self.access_key_secret.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for MCPProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_version: "2025-06-18".to_string(),
            server_name: "observability-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            ai_timeout: Duration::from_secs(60),
            retry_attempts: 2,
            retry_backoff: Duration::from_secs(1),
            default_region: None,
            ai_region: DEFAULT_AI_REGION.to_string(),
            ai_endpoint: None,
            endpoints: BTreeMap::new(),
        }
    }
}

/// Values supplied on the command line; highest priority layer
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub security_token: Option<String>,
    pub region: Option<String>,
    pub log_level: Option<String>,
}

impl MCPConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Resolve configuration against the real process environment
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let process_env: HashMap<String, String> = std::env::vars().collect();
        Self::resolve(overrides, &process_env)
    }

    /// Layer, lowest first: defaults, config file, process environment,
    /// environment file, command-line flags.
    pub fn resolve(
        overrides: &ConfigOverrides,
        process_env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match &overrides.config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(process_env)?;

        if let Some(path) = &overrides.env_file {
            let file_env = read_env_file(path)?;
            config.apply_env(&file_env)?;
        }

        config.apply_overrides(overrides);
        config.credential()?;
        config.validate_upstream()?;
        Ok(config)
    }

    /// Reject upstream settings every call would trip over
    fn validate_upstream(&self) -> Result<(), ConfigError> {
        let upstream = &self.upstream;
        if !(1..=MAX_ATTEMPTS).contains(&upstream.retry_attempts) {
            return Err(ConfigError::InvalidValue {
                key: "upstream.retry_attempts".to_string(),
                value: upstream.retry_attempts.to_string(),
            });
        }

        let regions = [
            ("upstream.default_region", upstream.default_region.as_deref()),
            ("upstream.ai_region", Some(upstream.ai_region.as_str())),
        ];
        for (key, region) in regions {
            if let Some(region) = region {
                validate_region(region).map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: region.to_string(),
                })?;
            }
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(id) = get(ENV_ACCESS_KEY_ID) {
            self.credentials.access_key_id = Some(id.to_string());
        }
        if let Some(secret) = get(ENV_ACCESS_KEY_SECRET) {
            self.credentials.access_key_secret = Some(secret.to_string());
        }
        if let Some(token) = get(ENV_SECURITY_TOKEN) {
            self.credentials.security_token = Some(token.to_string());
        }
        if let Some(host) = get(ENV_SERVER_HOST) {
            self.server.host = host.to_string();
        }
        if let Some(port) = get(ENV_SERVER_PORT) {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_SERVER_PORT.to_string(),
                value: port.to_string(),
            })?;
        }
        if let Some(transport) = get(ENV_TRANSPORT) {
            self.transport = transport.parse()?;
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.logging.level = level.to_string();
        }
        if let Some(region) = get(ENV_REGION) {
            self.upstream.default_region = Some(region.to_string());
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(transport) = overrides.transport {
            self.transport = transport;
        }
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(id) = &overrides.access_key_id {
            self.credentials.access_key_id = Some(id.clone());
        }
        if let Some(secret) = &overrides.access_key_secret {
            self.credentials.access_key_secret = Some(secret.clone());
        }
        if let Some(token) = &overrides.security_token {
            self.credentials.security_token = Some(token.clone());
        }
        if let Some(region) = &overrides.region {
            self.upstream.default_region = Some(region.clone());
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// The configured credential, if complete
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        match (
            &self.credentials.access_key_id,
            &self.credentials.access_key_secret,
        ) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                let credential = Credential::new(id.clone(), secret.clone());
                Ok(match &self.credentials.security_token {
                    Some(token) if !token.is_empty() => credential.with_security_token(token.clone()),
                    _ => credential,
                })
            }
            _ => Err(ConfigError::MissingCredentials),
        }
    }

    pub fn upstream_settings(&self) -> Result<UpstreamSettings, ConfigError> {
        self.validate_upstream()?;
        let mut endpoint_templates = HashMap::new();
        for (key, template) in &self.upstream.endpoints {
            let family = match key.as_str() {
                "log-search" => ServiceFamily::LogSearch,
                "metrics" => ServiceFamily::Metrics,
                "trace" => ServiceFamily::Trace,
                "workspace" => ServiceFamily::Workspace,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "upstream.endpoints".to_string(),
                        value: other.to_string(),
                    })
                }
            };
            endpoint_templates.insert(family, template.clone());
        }

        Ok(UpstreamSettings {
            data_timeout: self.upstream.default_timeout,
            ai_timeout: self.upstream.ai_timeout,
            retry: RetryPolicy::fixed(self.upstream.retry_attempts, self.upstream.retry_backoff),
            default_region: self.upstream.default_region.clone(),
            ai_region: self.upstream.ai_region.clone(),
            ai_endpoint: self.upstream.ai_endpoint.clone(),
            endpoint_templates,
        })
    }
}

/// Read `KEY=VALUE` pairs without touching the process environment
fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let env_error = |message: String| ConfigError::EnvFile {
        path: path.to_path_buf(),
        message,
    };

    let iter = dotenvy::from_path_iter(path).map_err(|e| env_error(e.to_string()))?;
    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| env_error(e.to_string()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

// Helper module for duration serialization
mod duration_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = format!("{}s", duration.as_secs());
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Some(stripped) = s.strip_suffix('s') {
            let secs: u64 = stripped.parse().map_err(serde::de::Error::custom)?;
            Ok(Duration::from_secs(secs))
        } else {
            Err(serde::de::Error::custom(
                "Expected duration string ending with 's'",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn credential_env() -> HashMap<String, String> {
        env(&[(ENV_ACCESS_KEY_ID, "env-id"), (ENV_ACCESS_KEY_SECRET, "env-secret")])
    }

    #[test]
    fn test_missing_credentials_is_an_error() {
        let result = MCPConfig::resolve(&ConfigOverrides::default(), &HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingCredentials)));
    }

    #[test]
    fn test_process_env_is_applied() {
        let mut vars = credential_env();
        vars.insert(ENV_TRANSPORT.into(), "sse".into());
        vars.insert(ENV_SERVER_PORT.into(), "9000".into());
        vars.insert(ENV_REGION.into(), "cn-hangzhou".into());

        let config = MCPConfig::resolve(&ConfigOverrides::default(), &vars).unwrap();
        assert_eq!(config.transport, TransportKind::Sse);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.default_region.as_deref(), Some("cn-hangzhou"));
        assert_eq!(config.credential().unwrap().access_key_id(), "env-id");
    }

    #[test]
    fn test_flag_beats_env_file_beats_process_env() {
        let mut env_file = NamedTempFile::new().unwrap();
        writeln!(env_file, "{ENV_ACCESS_KEY_ID}=file-id").unwrap();
        writeln!(env_file, "{ENV_SERVER_HOST}=10.0.0.1").unwrap();
        writeln!(env_file, "{ENV_LOG_LEVEL}=debug").unwrap();

        let mut vars = credential_env();
        vars.insert(ENV_SERVER_HOST.into(), "192.168.0.1".into());
        vars.insert(ENV_LOG_LEVEL.into(), "warn".into());

        let overrides = ConfigOverrides {
            env_file: Some(env_file.path().to_path_buf()),
            log_level: Some("trace".into()),
            ..Default::default()
        };
        let config = MCPConfig::resolve(&overrides, &vars).unwrap();

        assert_eq!(config.credential().unwrap().access_key_id(), "file-id");
        assert_eq!(config.credential().unwrap().access_key_secret(), "env-secret");
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_config_file_is_lowest_layer() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
transport = "streamable-http"

[server]
port = 7000

[upstream]
ai_timeout = "90s"
retry_attempts = 1
default_region = "cn-beijing"

[upstream.endpoints]
trace = "arms-vpc.{{region}}.aliyuncs.com"

[credentials]
access_key_id = "file-id"
access_key_secret = "file-secret"
"#
        )
        .unwrap();

        let overrides = ConfigOverrides {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let vars = env(&[(ENV_SERVER_PORT, "7100")]);
        let config = MCPConfig::resolve(&overrides, &vars).unwrap();

        assert_eq!(config.transport, TransportKind::StreamableHttp);
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.server.host, "127.0.0.1");

        let settings = config.upstream_settings().unwrap();
        assert_eq!(settings.ai_timeout, Duration::from_secs(90));
        assert_eq!(settings.retry.max_attempts(), 1);
        assert_eq!(settings.default_region.as_deref(), Some("cn-beijing"));
        assert_eq!(
            settings.endpoint_templates.get(&ServiceFamily::Trace).map(String::as_str),
            Some("arms-vpc.{region}.aliyuncs.com")
        );
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = MCPConfig::default();
        config.credentials.access_key_id = Some("id".into());
        config.credentials.access_key_secret = Some("super-secret".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(rendered.contains("access_key_id"));
        assert!(!rendered.contains("super-secret"));
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let mut vars = credential_env();
        vars.insert(ENV_TRANSPORT.into(), "carrier-pigeon".into());
        assert!(matches!(
            MCPConfig::resolve(&ConfigOverrides::default(), &vars),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = MCPConfig::default();
        config.upstream.endpoints.insert("billing".into(), "x".into());
        assert!(config.upstream_settings().is_err());
    }

    #[test]
    fn test_retry_attempts_above_two_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[upstream]\nretry_attempts = 3").unwrap();
        let overrides = ConfigOverrides {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let err = MCPConfig::resolve(&overrides, &credential_env()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, ref value }
                if key == "upstream.retry_attempts" && value == "3"
        ));
    }

    #[test]
    fn test_malformed_regions_fail_at_startup() {
        let mut vars = credential_env();
        vars.insert(ENV_REGION.into(), "cn-hangzhou.attacker.example".into());
        let err = MCPConfig::resolve(&ConfigOverrides::default(), &vars).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "upstream.default_region"
        ));

        let mut config = MCPConfig::default();
        config.upstream.ai_region = "Shanghai".into();
        assert!(matches!(
            config.upstream_settings(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "upstream.ai_region"
        ));
    }
}
