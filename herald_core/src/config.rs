use std::{path::Path, sync::OnceLock, time::Duration};

use config::{Config, Environment, File, FileFormat};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use sea_orm::ConnectOptions;
use serde::Deserialize;
use thiserror::Error;

static DEFAULT_CONFIG_FILE: &str = "herald.toml";
static CONFIG_PATH_VAR: &str = "HERALD_CONFIG";
static ENV_PREFIX: &str = "HERALD";

/// Everything but RFC 3986 unreserved characters is escaped in DSN parts.
const DSN_PART: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable {0} is referenced by the config but not set")]
    MissingVariable(String),

    #[error("malformed config")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub external_auth: ExternalAuthSettings,
    #[serde(default)]
    pub object_store: ObjectStoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            env: default_env(),
            port: default_port(),
        }
    }
}

impl AppSettings {
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub dbname: String,
    #[serde(default = "default_max_open")]
    pub max_open_connections: u32,
    #[serde(default = "default_max_idle")]
    pub max_idle_connections: u32,
    /// Seconds.
    #[serde(default = "default_max_lifetime")]
    pub connection_max_lifetime: u64,
}

impl DatabaseSettings {
    pub fn url(&self) -> String {
        match self.driver.as_str() {
            "sqlite" if self.dbname == ":memory:" => "sqlite::memory:".to_string(),
            "sqlite" => format!("sqlite://{}?mode=rwc", self.dbname),
            driver => {
                let scheme = if driver == "postgres" { "postgres" } else { "mysql" };
                let port = self.port.unwrap_or(if scheme == "postgres" { 5432 } else { 3306 });
                format!(
                    "{scheme}://{}:{}@{}:{port}/{}",
                    utf8_percent_encode(&self.username, DSN_PART),
                    utf8_percent_encode(&self.password, DSN_PART),
                    self.host,
                    utf8_percent_encode(&self.dbname, DSN_PART),
                )
            }
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(self.url());
        options
            .max_connections(self.max_open_connections)
            .min_connections(self.max_idle_connections.min(self.max_open_connections))
            .max_lifetime(Duration::from_secs(self.connection_max_lifetime))
            .sqlx_logging(true)
            .sqlx_logging_level(log::LevelFilter::Debug);
        options
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.driver.as_str() {
            "mysql" | "postgres" => {
                for (key, value) in [
                    ("database.host", &self.host),
                    ("database.username", &self.username),
                    ("database.dbname", &self.dbname),
                ] {
                    if value.trim().is_empty() {
                        return Err(ConfigError::Invalid(format!("{key} is required")));
                    }
                }
            }
            "sqlite" => {
                if self.dbname.trim().is_empty() {
                    return Err(ConfigError::Invalid("database.dbname is required".into()));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported database.driver {other}"
                )))
            }
        }

        if self.max_open_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_open_connections must be positive".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub token_secret: String,
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: i64,
}

/// Credentials for the external code-exchange login. Consumed by the login flow only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalAuthSettings {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
}

/// File upload backend settings. Consumed by the upload collaborator only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectStoreSettings {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub bucket: String,
}

fn default_env() -> String {
    "development".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_driver() -> String {
    "mysql".to_string()
}

fn default_max_open() -> u32 {
    10
}

fn default_max_idle() -> u32 {
    2
}

fn default_max_lifetime() -> u64 {
    3600
}

fn default_expiration_hours() -> i64 {
    72
}

impl HeraldConfig {
    /// Loads the config from `$HERALD_CONFIG`, falling back to `./herald.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_path(path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses TOML after `${VAR}` / `${VAR:-default}` interpolation, then applies
    /// `HERALD__SECTION__KEY` environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let expanded = interpolate(raw, |name| std::env::var(name).ok())?;

        let config: HeraldConfig = Config::builder()
            .add_source(File::from_str(&expanded, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        if self.auth.token_secret.is_empty() {
            return Err(ConfigError::Invalid("auth.token_secret is required".into()));
        }
        if self.auth.expiration_hours <= 0 {
            return Err(ConfigError::Invalid(
                "auth.expiration_hours must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid placeholder regex")
    })
}

/// Expands `${VAR}` and `${VAR:-default}`. A default applies when the variable is unset or empty.
pub fn interpolate<F>(raw: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let expanded = placeholder().replace_all(raw, |caps: &Captures| {
        let name = &caps[1];
        match (lookup(name).filter(|v| !v.is_empty()), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingVariable(name)),
        None => Ok(expanded.into_owned()),
    }
}
