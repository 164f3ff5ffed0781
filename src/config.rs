use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "BCSYNC_";

const DEFAULT_API_HOST: &str = "https://api.businesscentral.dynamics.com";
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_SCOPE: &str = "https://api.businesscentral.dynamics.com/.default";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Remote API and identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub tenant_id: Option<String>,
    /// Business Central environment name (e.g. "production", "sandbox")
    pub environment: String,
    pub company_id: Option<String>,
    /// API publisher for custom APIs; standard API when unset
    pub publisher: Option<String>,
    pub group: Option<String>,
    pub version: String,
    pub client_id: Option<String>,
    #[serde(serialize_with = "mask_secret")]
    pub client_secret: Option<String>,
    /// Full base URL, overriding the one built from the fields above
    pub base_url: Option<String>,
    /// Token authority URL, overriding the one built from `tenant_id`
    pub authority_url: Option<String>,
    pub scope: String,
    /// Sent as `$schemaversion` on every delta query
    pub schema_version: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            environment: "production".to_string(),
            company_id: None,
            publisher: None,
            group: None,
            version: "v2.0".to_string(),
            client_id: None,
            client_secret: None,
            base_url: None,
            authority_url: None,
            scope: DEFAULT_SCOPE.to_string(),
            schema_version: Some("1.0".to_string()),
        }
    }
}

impl ApiConfig {
    /// Base URL that entity names are resolved against.
    pub fn base_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let company = require(&self.company_id, "api.company_id")?;
        let api_path = match (&self.publisher, &self.group) {
            (Some(publisher), Some(group)) => {
                format!("api/{}/{}/{}", publisher, group, self.version)
            }
            (None, None) => format!("api/{}", self.version),
            _ => {
                return Err(ConfigError::Invalid(
                    "api.publisher and api.group must be set together".to_string(),
                ))
            }
        };
        Ok(format!(
            "{}/v2.0/{}/{}/companies({})/",
            DEFAULT_API_HOST, self.environment, api_path, company
        ))
    }

    /// Token authority, e.g. `https://login.microsoftonline.com/<tenant>`.
    pub fn authority_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.authority_url {
            return Ok(url.clone());
        }
        let tenant = require(&self.tenant_id, "api.tenant_id")?;
        Ok(format!("{}/{}", DEFAULT_AUTHORITY_HOST, tenant))
    }

    /// Client id and secret for the client-credentials exchange.
    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        Ok((
            require(&self.client_id, "api.client_id")?,
            require(&self.client_secret, "api.client_secret")?,
        ))
    }
}

/// Run driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Tables synced at once within a priority group
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Attempts per request on transient failures
    pub max_attempts: u32,
    /// First retry delay, doubled on each further retry
    pub retry_backoff_ms: u64,
    pub table_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_backoff_ms: 500,
            table_timeout_secs: 600,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn table_timeout(&self) -> Duration {
        Duration::from_secs(self.table_timeout_secs)
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub api: ApiConfig,
    pub sync: SyncSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    api: Option<ApiConfig>,
    sync: Option<SyncSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading overrides through `env`.
    pub fn load_with_env<F>(config_path: Option<PathBuf>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_db_path = Self::default_data_dir().join("bcsync.db");

        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut config_file = None;
        let mut api = ApiConfig::default();
        let mut sync = SyncSettings::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(api_config) = file_config.api {
                api = api_config;
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        let var = |name: &str| env(&format!("{}{}", ENV_PREFIX, name));

        // Apply environment variable overrides
        if let Some(db_path) = var("DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }

        let api_overrides: [(&str, &mut Option<String>); 9] = [
            ("TENANT_ID", &mut api.tenant_id),
            ("COMPANY_ID", &mut api.company_id),
            ("PUBLISHER", &mut api.publisher),
            ("GROUP", &mut api.group),
            ("CLIENT_ID", &mut api.client_id),
            ("CLIENT_SECRET", &mut api.client_secret),
            ("BASE_URL", &mut api.base_url),
            ("AUTHORITY_URL", &mut api.authority_url),
            ("SCHEMA_VERSION", &mut api.schema_version),
        ];
        for (name, slot) in api_overrides {
            if let Some(value) = var(name) {
                *slot = Some(value);
            }
        }
        if let Some(environment) = var("ENVIRONMENT") {
            api.environment = environment;
        }
        if let Some(version) = var("API_VERSION") {
            api.version = version;
        }

        if let Some(value) = var("CONCURRENCY") {
            sync.concurrency = parse_env("CONCURRENCY", &value)?;
        }
        if let Some(value) = var("REQUEST_TIMEOUT_SECS") {
            sync.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = var("MAX_ATTEMPTS") {
            sync.max_attempts = parse_env("MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = var("RETRY_BACKOFF_MS") {
            sync.retry_backoff_ms = parse_env("RETRY_BACKOFF_MS", &value)?;
        }
        if let Some(value) = var("TABLE_TIMEOUT_SECS") {
            sync.table_timeout_secs = parse_env("TABLE_TIMEOUT_SECS", &value)?;
        }

        if sync.concurrency == 0 || sync.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sync.concurrency and sync.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_path,
            config_file,
            api,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/bcsync/
    /// - macOS: ~/Library/Application Support/bcsync/
    /// - Windows: %APPDATA%/bcsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bcsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/bcsync/
    /// - macOS: ~/Library/Application Support/bcsync/
    /// - Windows: %APPDATA%/bcsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bcsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::Invalid(format!("{}{} has invalid value '{}'", ENV_PREFIX, name, value))
    })
}

fn mask_secret<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_some("********"),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    Missing(&'static str),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Missing(name) => write!(f, "Missing required setting '{}'", name),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &std::path::Path, contents: &str) -> PathBuf {
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        config_path
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("bcsync.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert!(config.config_file.is_none());
        assert_eq!(config.api.environment, "production");
        assert_eq!(config.api.schema_version.as_deref(), Some("1.0"));
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.retry_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(
            temp_dir.path(),
            r#"
database_path: data/bc.db
api:
  tenant_id: contoso.onmicrosoft.com
  environment: sandbox
  company_id: 6a3c1f10-0000-0000-0000-000000000001
  publisher: contoso
  group: reporting
  version: v1.0
  client_id: app-id
  client_secret: hunter2
sync:
  concurrency: 2
  max_attempts: 5
"#,
        );

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/bc.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.sync.concurrency, 2);
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.table_timeout_secs, 600);
        assert_eq!(
            config.api.base_url().unwrap(),
            "https://api.businesscentral.dynamics.com/v2.0/sandbox/api/contoso/reporting/v1.0/companies(6a3c1f10-0000-0000-0000-000000000001)/"
        );
        assert_eq!(
            config.api.authority_url().unwrap(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com"
        );
        assert_eq!(config.api.credentials().unwrap(), ("app-id", "hunter2"));
    }

    #[test]
    fn test_standard_api_base_url() {
        let api = ApiConfig {
            company_id: Some("c1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            api.base_url().unwrap(),
            "https://api.businesscentral.dynamics.com/v2.0/production/api/v2.0/companies(c1)/"
        );
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(
            temp_dir.path(),
            "api:\n  client_secret: fromfile\nsync:\n  concurrency: 2\n",
        );

        let env: HashMap<&str, &str> = HashMap::from([
            ("BCSYNC_CLIENT_SECRET", "fromenv"),
            ("BCSYNC_CONCURRENCY", "8"),
            ("BCSYNC_DATABASE_PATH", "/tmp/env.db"),
        ]);
        let config = Config::load_with_env(Some(config_path), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.api.client_secret.as_deref(), Some("fromenv"));
        assert_eq!(config.sync.concurrency, 8);
        assert_eq!(config.database_path.value, PathBuf::from("/tmp/env.db"));
        assert_eq!(config.database_path.source, ConfigSource::Environment);
    }

    #[test]
    fn test_env_overrides_api_path_and_backoff() {
        let temp_dir = tempdir().unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("BCSYNC_COMPANY_ID", "c1"),
            ("BCSYNC_PUBLISHER", "contoso"),
            ("BCSYNC_GROUP", "reporting"),
            ("BCSYNC_API_VERSION", "v1.0"),
            ("BCSYNC_RETRY_BACKOFF_MS", "250"),
        ]);
        let config = Config::load_with_env(Some(temp_dir.path().join("none.yaml")), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(
            config.api.base_url().unwrap(),
            "https://api.businesscentral.dynamics.com/v2.0/production/api/contoso/reporting/v1.0/companies(c1)/"
        );
        assert_eq!(config.sync.retry_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_env_value() {
        let temp_dir = tempdir().unwrap();
        let err = Config::load_with_env(Some(temp_dir.path().join("none.yaml")), |key| {
            (key == "BCSYNC_MAX_ATTEMPTS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("BCSYNC_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_missing_required_settings() {
        let api = ApiConfig::default();
        assert!(matches!(
            api.base_url(),
            Err(ConfigError::Missing("api.company_id"))
        ));
        assert!(matches!(
            api.authority_url(),
            Err(ConfigError::Missing("api.tenant_id"))
        ));
        assert!(matches!(
            api.credentials(),
            Err(ConfigError::Missing("api.client_id"))
        ));
    }

    #[test]
    fn test_serialized_config_masks_secret() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(temp_dir.path(), "api:\n  client_secret: hunter2\n");
        let config = Config::load_with_env(Some(config_path), no_env).unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("********"));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(temp_dir.path(), "invalid: yaml: content: [\n");

        let result = Config::load_with_env(Some(config_path), no_env);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
