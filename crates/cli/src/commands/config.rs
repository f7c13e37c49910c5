use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use otvet_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let doc = config_file_doc.as_ref();
    let path = config_file_path.as_deref();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        field_source("database.url", Some("OTVET_DATABASE_URL"), doc, path),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        field_source("database.max_connections", Some("OTVET_DATABASE_MAX_CONNECTIONS"), doc, path),
    ));
    lines.push(render_line(
        "avito.client_id",
        &config.avito.client_id,
        field_source("avito.client_id", Some("OTVET_AVITO_CLIENT_ID"), doc, path),
    ));
    lines.push(render_line(
        "avito.client_secret",
        &redact_secret(config.avito.client_secret.expose_secret()),
        field_source("avito.client_secret", Some("OTVET_AVITO_CLIENT_SECRET"), doc, path),
    ));
    lines.push(render_line(
        "avito.user_id",
        &config.avito.user_id,
        field_source("avito.user_id", Some("OTVET_AVITO_USER_ID"), doc, path),
    ));
    lines.push(render_line(
        "gemini.api_key",
        &redact_secret(config.gemini.api_key.expose_secret()),
        field_source("gemini.api_key", Some("OTVET_GEMINI_API_KEY"), doc, path),
    ));
    lines.push(render_line(
        "gemini.store_name",
        &config.gemini.store_name,
        field_source("gemini.store_name", Some("OTVET_GEMINI_STORE_NAME"), doc, path),
    ));
    lines.push(render_line(
        "gemini.model",
        &config.gemini.model,
        field_source("gemini.model", Some("OTVET_GEMINI_MODEL"), doc, path),
    ));
    lines.push(render_line(
        "telegram.bot_token",
        &redact_secret(config.telegram.bot_token.expose_secret()),
        field_source("telegram.bot_token", Some("OTVET_TELEGRAM_BOT_TOKEN"), doc, path),
    ));
    lines.push(render_line(
        "telegram.owner_chat_id",
        &config.telegram.owner_chat_id,
        field_source("telegram.owner_chat_id", Some("OTVET_TELEGRAM_OWNER_CHAT_ID"), doc, path),
    ));
    lines.push(render_line(
        "responder.app_base_url",
        &config.responder.app_base_url,
        field_source("responder.app_base_url", Some("OTVET_APP_BASE_URL"), doc, path),
    ));
    lines.push(render_line(
        "responder.context_limit",
        &config.responder.context_limit.to_string(),
        field_source("responder.context_limit", Some("OTVET_CONTEXT_LIMIT"), doc, path),
    ));
    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        field_source("server.bind_address", Some("OTVET_SERVER_BIND_ADDRESS"), doc, path),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        field_source("server.port", Some("OTVET_SERVER_PORT"), doc, path),
    ));
    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        field_source("logging.level", Some("OTVET_LOGGING_LEVEL"), doc, path),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        field_source("logging.format", Some("OTVET_LOGGING_FORMAT"), doc, path),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("otvet.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/otvet.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_verbatim() {
        assert_eq!(redact_secret("super-secret"), "<redacted>");
        assert_eq!(redact_secret("   "), "<empty>");
    }

    #[test]
    fn nested_toml_paths_are_found() {
        let doc: toml::Value = "[avito]\nclient_id = \"c1\"".parse().expect("toml");
        assert!(contains_path(&doc, "avito.client_id"));
        assert!(!contains_path(&doc, "avito.client_secret"));
    }
}
