use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub avito: AvitoConfig,
    pub gemini: GeminiConfig,
    pub telegram: TelegramConfig,
    pub responder: ResponderConfig,
    pub server: ServerConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AvitoConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub user_id: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub store_name: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub owner_chat_id: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ResponderConfig {
    pub app_base_url: String,
    pub context_limit: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
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
    pub avito_client_id: Option<String>,
    pub avito_client_secret: Option<String>,
    pub avito_user_id: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_store_name: Option<String>,
    pub gemini_model: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_owner_chat_id: Option<String>,
    pub app_base_url: Option<String>,
    pub context_limit: Option<usize>,
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
                url: "sqlite://otvet.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            avito: AvitoConfig {
                client_id: String::new(),
                client_secret: String::new().into(),
                user_id: String::new(),
                timeout_secs: 30,
            },
            gemini: GeminiConfig {
                api_key: String::new().into(),
                store_name: String::new(),
                model: "gemini-1.5-flash".to_string(),
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                owner_chat_id: String::new(),
                timeout_secs: 10,
            },
            responder: ResponderConfig { app_base_url: String::new(), context_limit: 20 },
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 8000 },
            delivery: DeliveryConfig { max_attempts: 3, base_delay_ms: 500, max_delay_ms: 5_000 },
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("otvet.toml"));
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

        if let Some(avito) = patch.avito {
            if let Some(client_id) = avito.client_id {
                self.avito.client_id = client_id;
            }
            if let Some(client_secret) = avito.client_secret {
                self.avito.client_secret = secret_value(client_secret);
            }
            if let Some(user_id) = avito.user_id {
                self.avito.user_id = user_id;
            }
            if let Some(timeout_secs) = avito.timeout_secs {
                self.avito.timeout_secs = timeout_secs;
            }
        }

        if let Some(gemini) = patch.gemini {
            if let Some(api_key) = gemini.api_key {
                self.gemini.api_key = secret_value(api_key);
            }
            if let Some(store_name) = gemini.store_name {
                self.gemini.store_name = store_name;
            }
            if let Some(model) = gemini.model {
                self.gemini.model = model;
            }
            if let Some(timeout_secs) = gemini.timeout_secs {
                self.gemini.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token);
            }
            if let Some(owner_chat_id) = telegram.owner_chat_id {
                self.telegram.owner_chat_id = owner_chat_id;
            }
            if let Some(timeout_secs) = telegram.timeout_secs {
                self.telegram.timeout_secs = timeout_secs;
            }
        }

        if let Some(responder) = patch.responder {
            if let Some(app_base_url) = responder.app_base_url {
                self.responder.app_base_url = app_base_url;
            }
            if let Some(context_limit) = responder.context_limit {
                self.responder.context_limit = context_limit;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(max_attempts) = delivery.max_attempts {
                self.delivery.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = delivery.base_delay_ms {
                self.delivery.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = delivery.max_delay_ms {
                self.delivery.max_delay_ms = max_delay_ms;
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
        if let Some(value) = read_env("OTVET_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("OTVET_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("OTVET_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OTVET_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("OTVET_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OTVET_AVITO_CLIENT_ID") {
            self.avito.client_id = value;
        }
        if let Some(value) = read_env("OTVET_AVITO_CLIENT_SECRET") {
            self.avito.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("OTVET_AVITO_USER_ID") {
            self.avito.user_id = value;
        }
        if let Some(value) = read_env("OTVET_AVITO_TIMEOUT_SECS") {
            self.avito.timeout_secs = parse_u64("OTVET_AVITO_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OTVET_GEMINI_API_KEY") {
            self.gemini.api_key = secret_value(value);
        }
        if let Some(value) = read_env("OTVET_GEMINI_STORE_NAME") {
            self.gemini.store_name = value;
        }
        if let Some(value) = read_env("OTVET_GEMINI_MODEL") {
            self.gemini.model = value;
        }
        if let Some(value) = read_env("OTVET_GEMINI_TIMEOUT_SECS") {
            self.gemini.timeout_secs = parse_u64("OTVET_GEMINI_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OTVET_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("OTVET_TELEGRAM_OWNER_CHAT_ID") {
            self.telegram.owner_chat_id = value;
        }
        if let Some(value) = read_env("OTVET_TELEGRAM_TIMEOUT_SECS") {
            self.telegram.timeout_secs = parse_u64("OTVET_TELEGRAM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OTVET_APP_BASE_URL") {
            self.responder.app_base_url = value;
        }
        if let Some(value) = read_env("OTVET_CONTEXT_LIMIT") {
            self.responder.context_limit = parse_usize("OTVET_CONTEXT_LIMIT", &value)?;
        }

        if let Some(value) = read_env("OTVET_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("OTVET_SERVER_PORT") {
            self.server.port = parse_u16("OTVET_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("OTVET_DELIVERY_MAX_ATTEMPTS") {
            self.delivery.max_attempts = parse_u32("OTVET_DELIVERY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("OTVET_DELIVERY_BASE_DELAY_MS") {
            self.delivery.base_delay_ms = parse_u64("OTVET_DELIVERY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("OTVET_DELIVERY_MAX_DELAY_MS") {
            self.delivery.max_delay_ms = parse_u64("OTVET_DELIVERY_MAX_DELAY_MS", &value)?;
        }

        let log_level = read_env("OTVET_LOGGING_LEVEL").or_else(|| read_env("OTVET_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("OTVET_LOGGING_FORMAT").or_else(|| read_env("OTVET_LOG_FORMAT"));
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
        if let Some(client_id) = overrides.avito_client_id {
            self.avito.client_id = client_id;
        }
        if let Some(client_secret) = overrides.avito_client_secret {
            self.avito.client_secret = secret_value(client_secret);
        }
        if let Some(user_id) = overrides.avito_user_id {
            self.avito.user_id = user_id;
        }
        if let Some(api_key) = overrides.gemini_api_key {
            self.gemini.api_key = secret_value(api_key);
        }
        if let Some(store_name) = overrides.gemini_store_name {
            self.gemini.store_name = store_name;
        }
        if let Some(model) = overrides.gemini_model {
            self.gemini.model = model;
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(owner_chat_id) = overrides.telegram_owner_chat_id {
            self.telegram.owner_chat_id = owner_chat_id;
        }
        if let Some(app_base_url) = overrides.app_base_url {
            self.responder.app_base_url = app_base_url;
        }
        if let Some(context_limit) = overrides.context_limit {
            self.responder.context_limit = context_limit;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_avito(&self.avito)?;
        validate_gemini(&self.gemini)?;
        validate_telegram(&self.telegram)?;
        validate_responder(&self.responder)?;
        validate_server(&self.server)?;
        validate_delivery(&self.delivery)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("otvet.toml"), PathBuf::from("config/otvet.toml")]
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

fn validate_avito(avito: &AvitoConfig) -> Result<(), ConfigError> {
    if avito.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "avito.client_id is required. Create OAuth2 credentials at https://developers.avito.ru"
                .to_string(),
        ));
    }
    if avito.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "avito.client_secret is required. Create OAuth2 credentials at https://developers.avito.ru"
                .to_string(),
        ));
    }
    if avito.user_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "avito.user_id is required (the seller account the bot answers for)".to_string(),
        ));
    }
    if avito.timeout_secs == 0 || avito.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "avito.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_gemini(gemini: &GeminiConfig) -> Result<(), ConfigError> {
    if gemini.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "gemini.api_key is required for retrieval and answer generation".to_string(),
        ));
    }
    if gemini.store_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "gemini.store_name is required (the file-search store holding seller documents)"
                .to_string(),
        ));
    }
    if gemini.model.trim().is_empty() {
        return Err(ConfigError::Validation("gemini.model must not be empty".to_string()));
    }
    if gemini.timeout_secs == 0 || gemini.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "gemini.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    if telegram.bot_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Create a bot via @BotFather".to_string(),
        ));
    }
    if telegram.owner_chat_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "telegram.owner_chat_id is required (the chat receiving audit notifications)"
                .to_string(),
        ));
    }
    if telegram.timeout_secs == 0 || telegram.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "telegram.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_responder(responder: &ResponderConfig) -> Result<(), ConfigError> {
    let base_url = responder.app_base_url.trim();
    if base_url.is_empty() {
        return Err(ConfigError::Validation(
            "responder.app_base_url is required (public URL Avito delivers webhooks to)"
                .to_string(),
        ));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "responder.app_base_url must start with http:// or https://".to_string(),
        ));
    }
    if responder.context_limit == 0 || responder.context_limit > 100 {
        return Err(ConfigError::Validation(
            "responder.context_limit must be in range 1..=100".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    Ok(())
}

fn validate_delivery(delivery: &DeliveryConfig) -> Result<(), ConfigError> {
    if delivery.max_attempts == 0 || delivery.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "delivery.max_attempts must be in range 1..=10".to_string(),
        ));
    }
    if delivery.max_delay_ms < delivery.base_delay_ms {
        return Err(ConfigError::Validation(
            "delivery.max_delay_ms must be at least delivery.base_delay_ms".to_string(),
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

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    avito: Option<AvitoPatch>,
    gemini: Option<GeminiPatch>,
    telegram: Option<TelegramPatch>,
    responder: Option<ResponderPatch>,
    server: Option<ServerPatch>,
    delivery: Option<DeliveryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AvitoPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    user_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiPatch {
    api_key: Option<String>,
    store_name: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    owner_chat_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponderPatch {
    app_base_url: Option<String>,
    context_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
