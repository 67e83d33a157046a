use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub mattermost: MattermostConfig,
    pub llm: LlmConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MattermostConfig {
    pub url: String,
    pub token: SecretString,
    pub bot_username: String,
    pub timeout_secs: u64,
    /// Consecutive failed websocket sessions tolerated before giving up; `0` retries forever.
    pub reconnect_max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub default_timezone: String,
    pub dialog_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub mattermost_url: Option<String>,
    pub mattermost_token: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://summarybot.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            mattermost: MattermostConfig {
                url: "http://localhost:8065".to_string(),
                token: String::new().into(),
                bot_username: "summary-bot".to_string(),
                timeout_secs: 10,
                reconnect_max_retries: 0,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "qwen3:14b".to_string(),
                timeout_secs: 120,
                max_tokens: 1000,
                temperature: 0.3,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: 60,
                default_timezone: "Europe/Moscow".to_string(),
                dialog_ttl_secs: 300,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl SchedulerConfig {
    /// Fallback zone for users whose own preference is unknown. Valid after `AppConfig::validate`.
    pub fn fallback_timezone(&self) -> Tz {
        self.default_timezone.trim().parse::<Tz>().unwrap_or(chrono_tz::Europe::Moscow)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("summarybot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(mattermost) = patch.mattermost {
            if let Some(url) = mattermost.url {
                self.mattermost.url = url;
            }
            if let Some(token) = mattermost.token {
                self.mattermost.token = secret_value(token);
            }
            if let Some(bot_username) = mattermost.bot_username {
                self.mattermost.bot_username = bot_username;
            }
            if let Some(timeout_secs) = mattermost.timeout_secs {
                self.mattermost.timeout_secs = timeout_secs;
            }
            if let Some(reconnect_max_retries) = mattermost.reconnect_max_retries {
                self.mattermost.reconnect_max_retries = reconnect_max_retries;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(poll_interval_secs) = scheduler.poll_interval_secs {
                self.scheduler.poll_interval_secs = poll_interval_secs;
            }
            if let Some(default_timezone) = scheduler.default_timezone {
                self.scheduler.default_timezone = default_timezone;
            }
            if let Some(dialog_ttl_secs) = scheduler.dialog_ttl_secs {
                self.scheduler.dialog_ttl_secs = dialog_ttl_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SUMMARYBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SUMMARYBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SUMMARYBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SUMMARYBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SUMMARYBOT_MATTERMOST_URL") {
            self.mattermost.url = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_MATTERMOST_TOKEN") {
            self.mattermost.token = secret_value(value);
        }
        if let Some(value) = read_env("SUMMARYBOT_MATTERMOST_BOT_USERNAME") {
            self.mattermost.bot_username = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_MATTERMOST_TIMEOUT_SECS") {
            self.mattermost.timeout_secs = parse_u64("SUMMARYBOT_MATTERMOST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SUMMARYBOT_MATTERMOST_RECONNECT_MAX_RETRIES") {
            self.mattermost.reconnect_max_retries =
                parse_u32("SUMMARYBOT_MATTERMOST_RECONNECT_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("SUMMARYBOT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SUMMARYBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SUMMARYBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SUMMARYBOT_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("SUMMARYBOT_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("SUMMARYBOT_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("SUMMARYBOT_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("SUMMARYBOT_SCHEDULER_POLL_INTERVAL_SECS") {
            self.scheduler.poll_interval_secs =
                parse_u64("SUMMARYBOT_SCHEDULER_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SUMMARYBOT_SCHEDULER_DEFAULT_TIMEZONE") {
            self.scheduler.default_timezone = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_SCHEDULER_DIALOG_TTL_SECS") {
            self.scheduler.dialog_ttl_secs =
                parse_u64("SUMMARYBOT_SCHEDULER_DIALOG_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("SUMMARYBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SUMMARYBOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SUMMARYBOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SUMMARYBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SUMMARYBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SUMMARYBOT_LOGGING_LEVEL").or_else(|| read_env("SUMMARYBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SUMMARYBOT_LOGGING_FORMAT").or_else(|| read_env("SUMMARYBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(mattermost_url) = overrides.mattermost_url {
            self.mattermost.url = mattermost_url;
        }
        if let Some(mattermost_token) = overrides.mattermost_token {
            self.mattermost.token = secret_value(mattermost_token);
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(poll_interval_secs) = overrides.poll_interval_secs {
            self.scheduler.poll_interval_secs = poll_interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_mattermost(&self.mattermost)?;
        validate_llm(&self.llm)?;
        validate_scheduler(&self.scheduler)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("summarybot.toml"), PathBuf::from("config/summarybot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_mattermost(mattermost: &MattermostConfig) -> Result<(), ConfigError> {
    if !is_http_url(&mattermost.url) {
        return Err(ConfigError::Validation(
            "mattermost.url must start with http:// or https://".to_string(),
        ));
    }

    if mattermost.token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "mattermost.token is required. Create a bot account in System Console > Integrations > Bot Accounts and copy its access token".to_string(),
        ));
    }

    if mattermost.timeout_secs == 0 || mattermost.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mattermost.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if !is_http_url(&llm.base_url) {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    // Wider ticks could step over the whole fire window and silently skip deliveries.
    if scheduler.poll_interval_secs == 0 || scheduler.poll_interval_secs > 120 {
        return Err(ConfigError::Validation(
            "scheduler.poll_interval_secs must be in range 1..=120".to_string(),
        ));
    }

    if scheduler.default_timezone.trim().parse::<Tz>().is_err() {
        return Err(ConfigError::Validation(format!(
            "scheduler.default_timezone `{}` is not a known IANA timezone",
            scheduler.default_timezone
        )));
    }

    if scheduler.dialog_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.dialog_ttl_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    mattermost: Option<MattermostPatch>,
    llm: Option<LlmPatch>,
    scheduler: Option<SchedulerPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MattermostPatch {
    url: Option<String>,
    token: Option<String>,
    bot_username: Option<String>,
    timeout_secs: Option<u64>,
    reconnect_max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    poll_interval_secs: Option<u64>,
    default_timezone: Option<String>,
    dialog_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_MATTERMOST_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("summarybot.toml");
            fs::write(
                &path,
                r#"
[mattermost]
url = "https://chat.example.com"
token = "${TEST_MATTERMOST_TOKEN}"

[scheduler]
default_timezone = "Asia/Yekaterinburg"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.mattermost.token.expose_secret() == "token-from-env",
                "mattermost token should be loaded from environment",
            )?;
            ensure(
                config.mattermost.url == "https://chat.example.com",
                "mattermost url should come from the file",
            )?;
            ensure(
                config.scheduler.fallback_timezone() == chrono_tz::Asia::Yekaterinburg,
                "default timezone should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_MATTERMOST_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUMMARYBOT_MATTERMOST_TOKEN", "token-test");
        env::set_var("SUMMARYBOT_LOG_LEVEL", "warn");
        env::set_var("SUMMARYBOT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "SUMMARYBOT_MATTERMOST_TOKEN",
            "SUMMARYBOT_LOG_LEVEL",
            "SUMMARYBOT_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUMMARYBOT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SUMMARYBOT_MATTERMOST_TOKEN", "token-from-env");
        env::set_var("SUMMARYBOT_SCHEDULER_POLL_INTERVAL_SECS", "45");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("summarybot.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[mattermost]
token = "token-from-file"

[scheduler]
poll_interval_secs = 30

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.mattermost.token.expose_secret() == "token-from-env",
                "env token should win over file and defaults",
            )?;
            ensure(
                config.scheduler.poll_interval_secs == 45,
                "env poll interval should win over the file",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "SUMMARYBOT_DATABASE_URL",
            "SUMMARYBOT_MATTERMOST_TOKEN",
            "SUMMARYBOT_SCHEDULER_POLL_INTERVAL_SECS",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        clear_vars(&["SUMMARYBOT_MATTERMOST_TOKEN"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("mattermost.token")
        );
        ensure(has_message, "validation failure should mention mattermost.token")
    }

    #[test]
    fn scheduler_settings_are_validated() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUMMARYBOT_MATTERMOST_TOKEN", "token-test");
        env::set_var("SUMMARYBOT_SCHEDULER_DEFAULT_TIMEZONE", "Moon/Base");

        let result = (|| -> Result<(), String> {
            let bad_zone = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(bad_zone, Err(ConfigError::Validation(ref message)) if message.contains("default_timezone")),
                "unknown timezone should be rejected",
            )?;

            env::remove_var("SUMMARYBOT_SCHEDULER_DEFAULT_TIMEZONE");
            let too_slow = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    poll_interval_secs: Some(600),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(too_slow, Err(ConfigError::Validation(ref message)) if message.contains("poll_interval_secs")),
                "poll interval wider than the fire window should be rejected",
            )
        })();

        clear_vars(&["SUMMARYBOT_MATTERMOST_TOKEN", "SUMMARYBOT_SCHEDULER_DEFAULT_TIMEZONE"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUMMARYBOT_MATTERMOST_TOKEN", "mm-secret-value");
        env::set_var("SUMMARYBOT_LLM_API_KEY", "llm-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("mm-secret-value"), "debug output should not contain token")?;
            ensure(!debug.contains("llm-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["SUMMARYBOT_MATTERMOST_TOKEN", "SUMMARYBOT_LLM_API_KEY"]);
        result
    }
}
