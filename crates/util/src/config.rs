use std::{env, fmt, net::SocketAddr, time::Duration};

use super::server_bind_address;

const DEFAULT_DATABASE_URL: &str = "sqlite://admin_service.db?mode=rwc";
const DEFAULT_API_PREFIX: &str = "/api/v1";
const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";
const DEFAULT_CONSUMER_GROUP: &str = "admin-service";
const DEFAULT_AUTH_SERVICE_URL: &str = "http://auth-service:8000";
const DEFAULT_JWT_SECRET: &str = "supersecretkey";
const DEFAULT_JWT_ALGORITHM: &str = "HS256";
const DEFAULT_TOKEN_EXPIRE_MINUTES: u64 = 30;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;
const SUPPORTED_JWT_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Message bus connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub bootstrap_servers: String,
    pub consumer_group: String,
}

/// Bearer token settings shared with the external auth service.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub service_url: String,
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub token_expire_minutes: u64,
}

impl AuthSettings {
    /// URL where callers obtain access tokens.
    pub fn token_url(&self) -> String {
        format!("{}/api/v1/auth/token", self.service_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("service_url", &self.service_url)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("token_expire_minutes", &self.token_expire_minutes)
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub api_prefix: String,
    pub cors_origins: Vec<String>,
    pub bus: BusSettings,
    pub auth: AuthSettings,
    pub notify_application_created: bool,
    pub operation_timeout: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url = var_or("DATABASE_URL", DEFAULT_DATABASE_URL);
        let api_prefix = normalize_prefix(&var_or("API_V1_STR", DEFAULT_API_PREFIX));
        let cors_origins = env::var("CORS_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_default();

        let bus = BusSettings {
            bootstrap_servers: var_or("KAFKA_BOOTSTRAP_SERVERS", DEFAULT_BOOTSTRAP_SERVERS),
            consumer_group: var_or("KAFKA_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
        };

        let jwt_secret = match env::var("JWT_SECRET_KEY") {
            Ok(value) if !value.is_empty() => value,
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingVariable("JWT_SECRET_KEY"));
            }
            _ => DEFAULT_JWT_SECRET.to_string(),
        };
        let jwt_algorithm = var_or("JWT_ALGORITHM", DEFAULT_JWT_ALGORITHM).to_uppercase();
        if !SUPPORTED_JWT_ALGORITHMS.contains(&jwt_algorithm.as_str()) {
            return Err(ConfigError::UnsupportedAlgorithm(jwt_algorithm));
        }
        let auth = AuthSettings {
            service_url: var_or("AUTH_SERVICE_URL", DEFAULT_AUTH_SERVICE_URL),
            jwt_secret,
            jwt_algorithm,
            token_expire_minutes: parse_u64(
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                DEFAULT_TOKEN_EXPIRE_MINUTES,
            )?,
        };

        let notify_application_created = parse_bool("NOTIFY_APPLICATION_CREATED", false)?;
        let timeout_secs = parse_u64("OPERATION_TIMEOUT_SECS", DEFAULT_OPERATION_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "OPERATION_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            api_prefix,
            cors_origins,
            bus,
            auth,
            notify_application_created,
            operation_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Accepts both `a,b` and `["a", "b"]` forms.
fn parse_origins(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim_matches('\'').trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.trim_end_matches('/').to_string())
        .collect()
}

/// Returns the prefix with a leading `/` and without a trailing one. The root
/// prefix is returned as an empty string.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVariable(&'static str),
    UnsupportedAlgorithm(String),
    InvalidValue { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVariable(name) => write!(f, "{name} must be set in production"),
            Self::UnsupportedAlgorithm(value) => write!(
                f,
                "JWT_ALGORITHM must be one of {} (got {value})",
                SUPPORTED_JWT_ALGORITHMS.join(", ")
            ),
            Self::InvalidValue { name, value } => write!(f, "invalid {name} value: {value}"),
        }
    }
}

impl std::error::Error for ConfigError {}
