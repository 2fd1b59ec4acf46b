//! Configuration loading.
//!
//! Configuration is assembled from three layers with increasing precedence:
//! built-in defaults, a JSON or YAML file, and `GATEWAY_`-prefixed
//! environment variables. The file path comes from `GATEWAY_CONFIG_PATH`
//! (default `./config.json`); a missing default file is not an error and
//! yields defaults-plus-env.
//!
//! Environment values are coerced by shape: `true`/`false` become booleans,
//! digit strings integers, dotted numerics floats, anything else a string.

use crate::models::settings::Settings;
use log::{debug, warn};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Upper bound on config file size, guarding against memory exhaustion.
const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// Loads settings from the configured file and applies environment
/// overrides.
///
/// # Errors
///
/// Fails when an explicitly configured file is missing or unreadable, the
/// file exceeds the size cap, or the contents do not parse into the
/// [`Settings`] schema.
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let explicit = std::env::var("GATEWAY_CONFIG_PATH").ok();
    let config_path = explicit
        .clone()
        .unwrap_or_else(|| "./config.json".to_string());

    let mut settings = if Path::new(&config_path).exists() {
        load_file(&config_path)?
    } else if explicit.is_some() {
        return Err(format!("Config file '{}' not found", config_path).into());
    } else {
        debug!("No config file at '{}'; using defaults", config_path);
        Settings::default()
    };

    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads and parses a single config file, dispatching on extension.
pub fn load_file(path: &str) -> Result<Settings, Box<dyn std::error::Error>> {
    debug!("Loading configuration from: {}", path);

    let metadata = fs::metadata(path)
        .map_err(|e| format!("Cannot read config file metadata for '{}': {}", path, e))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "Config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("Cannot read config file: {}", e))?;

    let settings: Settings = if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yaml::from_str(&raw).map_err(|e| format!("Invalid YAML: {}", e))?
    } else {
        serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON: {}", e))?
    };

    debug!(
        "Loaded configuration with {} routes and {} backends",
        settings.routes.len(),
        settings.backends.len()
    );

    Ok(settings)
}

/// Coerces an environment value string into a typed JSON value.
pub fn coerce_env_value(raw: &str) -> Value {
    let lower = raw.to_ascii_lowercase();
    if lower == "true" || lower == "false" {
        return Value::Bool(lower == "true");
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::from(n);
        }
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

/// Applies `GATEWAY_*` environment overrides onto loaded settings.
///
/// Only scalar server/runtime knobs are overridable from the environment;
/// structured sections (routes, backends) come from the file.
fn apply_env_overrides(settings: &mut Settings) {
    if let Some(host) = env_string("GATEWAY_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = env_value("GATEWAY_PORT").and_then(|v| v.as_u64()) {
        settings.server.port = port as u16;
    }
    if let Some(workers) = env_value("GATEWAY_WORKERS").and_then(|v| v.as_u64()) {
        settings.server.workers = workers as usize;
    }
    if let Some(balancer) = env_string("GATEWAY_BALANCER") {
        settings.balancer = balancer;
    }
    if let Some(rps) = env_value("GATEWAY_RATE_LIMIT_RPS").and_then(|v| v.as_f64()) {
        settings.rate_limit.get_or_insert_with(Default::default).requests_per_second = rps;
    }
    if let Some(enabled) = env_value("GATEWAY_HEALTH_ENABLED").and_then(|v| v.as_bool()) {
        settings.health.enabled = enabled;
    }
    if let Some(interval) = env_value("GATEWAY_HEALTH_INTERVAL").and_then(|v| v.as_u64()) {
        settings.health.interval_secs = interval;
    }
    if let Some(enabled) = env_value("GATEWAY_METRICS_ENABLED").and_then(|v| v.as_bool()) {
        settings.metrics.enabled = enabled;
    }
    if let Some(path) = env_string("GATEWAY_METRICS_PATH") {
        settings.metrics.path = path;
    }
    if let Some(secret) = env_string("GATEWAY_JWT_SECRET") {
        settings.jwt.get_or_insert_with(Default::default).secret = secret;
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_value(key: &str) -> Option<Value> {
    let raw = std::env::var(key).ok()?;
    let value = coerce_env_value(&raw);
    if value.is_string() && (key.ends_with("_PORT") || key.ends_with("_INTERVAL")) {
        warn!("Expected numeric value for {}, got '{}'", key, raw);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn coercion_rules() {
        assert_eq!(coerce_env_value("true"), Value::Bool(true));
        assert_eq!(coerce_env_value("False"), Value::Bool(false));
        assert_eq!(coerce_env_value("8080"), Value::from(8080));
        assert_eq!(coerce_env_value("2.5"), Value::from(2.5));
        assert_eq!(coerce_env_value("hello"), Value::String("hello".into()));
        assert_eq!(coerce_env_value("12ab"), Value::String("12ab".into()));
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"version": 2, "server": {{"port": 9999}}, "routes": []}}"#
        )
        .unwrap();

        let settings = load_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.server.port, 9999);
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "version: 3\nserver:\n  port: 7777\n").unwrap();

        let settings = load_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.version, 3);
        assert_eq!(settings.server.port, 7777);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(load_file(file.path().to_str().unwrap()).is_err());
    }
}
