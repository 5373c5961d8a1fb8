//! Application Configuration
//!
//! Configuration for the check-in application layer.

use crate::domain::services::{DEFAULT_CODE_LENGTH, is_valid_code_length};
use crate::error::{CheckinError, CheckinResult};
use platform::rate_limit::RateLimitConfig;
use std::str::FromStr;

/// Environment prefix of the pickup rate limit settings
pub const RATE_LIMIT_SECTION: &str = "PICKUP_RATE_LIMIT";

pub const ENV_CODE_LENGTH: &str = "CHECKIN_CODE_LENGTH";
pub const ENV_CODE_MAX_ISSUE_ATTEMPTS: &str = "CHECKIN_CODE_MAX_ISSUE_ATTEMPTS";
pub const ENV_RESOLVER_MAX_ATTEMPTS: &str = "CHECKIN_RESOLVER_MAX_ATTEMPTS";
pub const ENV_CODE_RETENTION_DAYS: &str = "CHECKIN_CODE_RETENTION_DAYS";
pub const ENV_SECURITY_RECIPIENT_GROUP: &str = "CHECKIN_SECURITY_RECIPIENT_GROUP";
pub const ENV_NOTIFY_ON_CHECK_IN: &str = "CHECKIN_NOTIFY_ON_CHECK_IN";

/// Check-in application configuration
#[derive(Debug, Clone)]
pub struct CheckinConfig {
    /// Length of generated attendance codes
    pub code_length: usize,
    /// Collisions tolerated before giving up on a free code
    pub code_max_issue_attempts: u32,
    /// Get-or-create attempts before reporting an invariant violation
    pub resolver_max_attempts: u32,
    /// Days an issued code is kept after its issue date
    pub code_retention_days: u32,
    /// Recipient group alerted when a pickup subject gets blocked
    pub security_recipient_group: String,
    /// Notify the occurrence's group on each check-in
    pub notify_on_check_in: bool,
    /// Failed pickup verification limit
    pub pickup_rate_limit: RateLimitConfig,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            code_max_issue_attempts: 16,
            resolver_max_attempts: 3,
            code_retention_days: 30,
            security_recipient_group: "pickup-security".to_string(),
            notify_on_check_in: true,
            pickup_rate_limit: RateLimitConfig::default(),
        }
    }
}

impl CheckinConfig {
    /// Build from a key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> CheckinResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pickup_rate_limit = RateLimitConfig::from_section(RATE_LIMIT_SECTION, &lookup)
            .map_err(|e| CheckinError::Config(e.to_string()))?;

        let config = Self {
            code_length: parse_or(&lookup, ENV_CODE_LENGTH, defaults.code_length)?,
            code_max_issue_attempts: parse_or(
                &lookup,
                ENV_CODE_MAX_ISSUE_ATTEMPTS,
                defaults.code_max_issue_attempts,
            )?,
            resolver_max_attempts: parse_or(
                &lookup,
                ENV_RESOLVER_MAX_ATTEMPTS,
                defaults.resolver_max_attempts,
            )?,
            code_retention_days: parse_or(
                &lookup,
                ENV_CODE_RETENTION_DAYS,
                defaults.code_retention_days,
            )?,
            security_recipient_group: lookup(ENV_SECURITY_RECIPIENT_GROUP)
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.security_recipient_group),
            notify_on_check_in: parse_or(
                &lookup,
                ENV_NOTIFY_ON_CHECK_IN,
                defaults.notify_on_check_in,
            )?,
            pickup_rate_limit,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build from process environment
    pub fn from_env() -> CheckinResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> CheckinResult<()> {
        if !is_valid_code_length(self.code_length) {
            return Err(CheckinError::Config(format!(
                "{ENV_CODE_LENGTH} out of range: {}",
                self.code_length
            )));
        }
        if self.code_max_issue_attempts == 0 {
            return Err(CheckinError::Config(format!(
                "{ENV_CODE_MAX_ISSUE_ATTEMPTS} must be positive"
            )));
        }
        if self.resolver_max_attempts == 0 {
            return Err(CheckinError::Config(format!(
                "{ENV_RESOLVER_MAX_ATTEMPTS} must be positive"
            )));
        }
        if self.security_recipient_group.is_empty() {
            return Err(CheckinError::Config(format!(
                "{ENV_SECURITY_RECIPIENT_GROUP} must not be empty"
            )));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> CheckinResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CheckinError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CheckinConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.code_length, DEFAULT_CODE_LENGTH);
        assert_eq!(config.resolver_max_attempts, 3);
        assert_eq!(config.pickup_rate_limit.max_attempts, 5);
        assert_eq!(
            config.pickup_rate_limit.window,
            Duration::from_secs(15 * 60)
        );
    }

    #[test]
    fn test_overrides() {
        let config = CheckinConfig::from_lookup(lookup_from(&[
            ("CHECKIN_CODE_LENGTH", "6"),
            ("CHECKIN_NOTIFY_ON_CHECK_IN", "false"),
            ("PICKUP_RATE_LIMIT_MAX_ATTEMPTS", "3"),
            ("PICKUP_RATE_LIMIT_WINDOW_MINUTES", "1"),
        ]))
        .unwrap();
        assert_eq!(config.code_length, 6);
        assert!(!config.notify_on_check_in);
        assert_eq!(config.pickup_rate_limit.max_attempts, 3);
        assert_eq!(config.pickup_rate_limit.window_ms(), 60_000);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for pairs in [
            [("CHECKIN_CODE_LENGTH", "1")],
            [("CHECKIN_CODE_LENGTH", "abc")],
            [("CHECKIN_RESOLVER_MAX_ATTEMPTS", "0")],
            [("PICKUP_RATE_LIMIT_MAX_ATTEMPTS", "0")],
            [("CHECKIN_SECURITY_RECIPIENT_GROUP", "  ")],
        ] {
            let result = CheckinConfig::from_lookup(lookup_from(&pairs));
            assert!(
                matches!(result, Err(CheckinError::Config(_))),
                "{pairs:?} accepted"
            );
        }
    }
}
