use std::env;

use super::types::{ConfigError, Environment, HandoffMode, StoreBackend, SweepMode};

const DEFAULT_CORS_ORIGINS: &[&str] =
    &["http://localhost:5173", "http://localhost:3000", "http://localhost:8080"];

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_positive_f64(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed > 0.0 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

pub(super) fn parse_cors_origins(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = value else {
        return Ok(default_cors_origins());
    };

    if raw.trim().is_empty() {
        return Ok(default_cors_origins());
    }

    if raw.trim_start().starts_with('[') {
        let parsed: Vec<String> =
            serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidCors(raw.clone()))?;
        if parsed.is_empty() {
            return Ok(default_cors_origins());
        }
        return Ok(parsed);
    }

    let items: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        return Ok(default_cors_origins());
    }

    Ok(items)
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

pub(super) fn parse_store_backend(value: Option<String>) -> Result<StoreBackend, ConfigError> {
    match value.as_deref().map(|item| item.to_ascii_lowercase()) {
        None => Ok(StoreBackend::Memory),
        Some(ref val) if val == "memory" || val == "in_memory" => Ok(StoreBackend::Memory),
        Some(ref val) if val == "postgres" || val == "postgresql" => Ok(StoreBackend::Postgres),
        Some(val) => Err(ConfigError::InvalidValue { field: "STORE_BACKEND", value: val }),
    }
}

pub(super) fn parse_sweep_mode(value: Option<String>) -> Result<SweepMode, ConfigError> {
    match value.as_deref().map(|item| item.to_ascii_lowercase().replace('-', "_")) {
        None => Ok(SweepMode::Partitioned),
        Some(ref val) if val == "partitioned" => Ok(SweepMode::Partitioned),
        Some(ref val) if val == "cross_partition" => Ok(SweepMode::CrossPartition),
        Some(val) => Err(ConfigError::InvalidValue { field: "SWEEP_MODE", value: val }),
    }
}

pub(super) fn parse_handoff_mode(value: Option<String>) -> Result<HandoffMode, ConfigError> {
    match value.as_deref().map(|item| item.to_ascii_lowercase()) {
        None => Ok(HandoffMode::Disabled),
        Some(ref val) if val == "disabled" || val == "off" || val == "none" => {
            Ok(HandoffMode::Disabled)
        }
        Some(ref val) if val == "http" => Ok(HandoffMode::Http),
        Some(ref val) if val == "redis" => Ok(HandoffMode::Redis),
        Some(val) => Err(ConfigError::InvalidValue { field: "HANDOFF_MODE", value: val }),
    }
}

fn default_cors_origins() -> Vec<String> {
    DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cors_origins_json() {
        let raw = "[\"http://a\",\"http://b\"]".to_string();
        let parsed = parse_cors_origins(Some(raw)).expect("cors json");
        assert_eq!(parsed, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn parse_cors_origins_defaults_on_empty() {
        let parsed = parse_cors_origins(Some(" ".to_string())).expect("cors empty");
        assert_eq!(parsed, default_cors_origins());
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn parse_store_backend_variants() {
        assert_eq!(parse_store_backend(None).unwrap(), StoreBackend::Memory);
        assert_eq!(
            parse_store_backend(Some("PostgreSQL".to_string())).unwrap(),
            StoreBackend::Postgres
        );
        assert!(parse_store_backend(Some("cosmos".to_string())).is_err());
    }

    #[test]
    fn parse_sweep_mode_accepts_dashes() {
        assert_eq!(
            parse_sweep_mode(Some("cross-partition".to_string())).unwrap(),
            SweepMode::CrossPartition
        );
        assert_eq!(parse_sweep_mode(None).unwrap(), SweepMode::Partitioned);
    }

    #[test]
    fn parse_handoff_mode_variants() {
        assert_eq!(parse_handoff_mode(Some("off".to_string())).unwrap(), HandoffMode::Disabled);
        assert_eq!(parse_handoff_mode(Some("redis".to_string())).unwrap(), HandoffMode::Redis);
        assert!(parse_handoff_mode(Some("kafka".to_string())).is_err());
    }

    #[test]
    fn parse_positive_f64_rejects_zero() {
        assert!(parse_positive_f64("STORE_COST_HIGH_WATER_MARK", "0".to_string()).is_err());
        assert_eq!(
            parse_positive_f64("STORE_COST_HIGH_WATER_MARK", "12.5".to_string()).unwrap(),
            12.5
        );
    }
}
