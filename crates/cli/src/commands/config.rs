use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use agenda_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One reported setting: dotted key, rendered value, env vars that can set it.
type Setting = (&'static str, String, &'static [&'static str]);

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in settings(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn settings(config: &AppConfig) -> [Setting; 16] {
    [
        ("database.url", config.database.url.clone(), &["AGENDA_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["AGENDA_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["AGENDA_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["AGENDA_SERVER_BIND_ADDRESS"],
        ),
        ("server.port", config.server.port.to_string(), &["AGENDA_SERVER_PORT", "PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["AGENDA_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "auth.token_secret",
            redact_secret(config.auth.token_secret.expose_secret()),
            &["AGENDA_AUTH_TOKEN_SECRET"],
        ),
        (
            "auth.token_ttl_secs",
            config.auth.token_ttl_secs.to_string(),
            &["AGENDA_AUTH_TOKEN_TTL_SECS"],
        ),
        (
            "auth.password_hash_rounds",
            config.auth.password_hash_rounds.to_string(),
            &["AGENDA_AUTH_PASSWORD_HASH_ROUNDS"],
        ),
        ("mail.transport", config.mail.transport.as_str().to_string(), &["AGENDA_MAIL_TRANSPORT"]),
        ("mail.from_address", config.mail.from_address.clone(), &["AGENDA_MAIL_FROM_ADDRESS"]),
        (
            "mail.webhook_url",
            config.mail.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["AGENDA_MAIL_WEBHOOK_URL"],
        ),
        (
            "mail.queue_capacity",
            config.mail.queue_capacity.to_string(),
            &["AGENDA_MAIL_QUEUE_CAPACITY"],
        ),
        (
            "workflow.enforcement",
            config.workflow.enforcement.as_str().to_string(),
            &["AGENDA_WORKFLOW_ENFORCEMENT"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["AGENDA_LOGGING_LEVEL", "AGENDA_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["AGENDA_LOGGING_FORMAT", "AGENDA_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["agenda.toml", "config/agenda.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
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
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_verbatim() {
        assert_eq!(redact_secret("an-actual-signing-secret"), "<redacted>");
        assert_eq!(redact_secret("  "), "<empty>");
    }

    #[test]
    fn dotted_paths_resolve_against_toml_tables() {
        let doc: toml::Value = "[mail]\ntransport = \"webhook\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "mail.transport"));
        assert!(!contains_path(&doc, "mail.webhook_url"));
        assert!(!contains_path(&doc, "auth.token_secret"));
    }
}
