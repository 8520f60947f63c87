//! Helpers for environment-driven configuration.

use std::str::FromStr;

/// An environment variable was set to a value that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{key} must be a valid {expected} (got {value:?})")]
pub struct ConfigError {
    pub key: String,
    pub expected: &'static str,
    pub value: String,
}

/// Read `key` and parse it, falling back to `default` when unset or empty.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

/// Read an optional string variable. Empty values count as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a boolean flag (`1`/`true`/`yes`/`on`, case-insensitive).
pub fn env_flag(key: &str) -> Result<bool, ConfigError> {
    match env_opt(key) {
        None => Ok(false),
        Some(raw) => parse_flag(key, &raw),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError {
        key: key.to_string(),
        expected: std::any::type_name::<T>(),
        value: raw.to_string(),
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            key: key.to_string(),
            expected: "boolean",
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u64>("GENQ_POLL_INTERVAL_MS", "soon").unwrap_err();
        assert_eq!(err.key, "GENQ_POLL_INTERVAL_MS");
        assert!(err.to_string().contains("soon"));
        assert_eq!(parse_value::<u64>("K", " 42 ").unwrap(), 42);
    }

    #[test]
    fn flags() {
        assert!(parse_flag("K", "TRUE").unwrap());
        assert!(parse_flag("K", "on").unwrap());
        assert!(!parse_flag("K", "0").unwrap());
        assert!(parse_flag("K", "maybe").is_err());
    }

    #[test]
    fn unset_variable_uses_default() {
        assert_eq!(env_or("GENQ_TEST_SURELY_UNSET_VAR", 7u32).unwrap(), 7);
        assert!(!env_flag("GENQ_TEST_SURELY_UNSET_VAR").unwrap());
    }
}
