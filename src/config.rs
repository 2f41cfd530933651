use std::str::FromStr;
use std::time::Duration;

use crate::errors::RecoveryError;

/// One fixed-window rate limit: at most `max_requests` per `window_ms`,
/// with an optional minimum spacing between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max_requests: u32,
    pub cooldown_ms: Option<u64>,
}

/// The four rules the recovery flow is gated on. The struct is total, so
/// every rule the service consults is configured by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRules {
    pub request_by_ip: RateLimitRule,
    pub request_by_email: RateLimitRule,
    pub verify_by_ip: RateLimitRule,
    pub verify_by_email: RateLimitRule,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            request_by_ip: RateLimitRule {
                window_ms: 15 * 60_000,
                max_requests: 10,
                cooldown_ms: None,
            },
            request_by_email: RateLimitRule {
                window_ms: 15 * 60_000,
                max_requests: 3,
                cooldown_ms: Some(60_000),
            },
            verify_by_ip: RateLimitRule {
                window_ms: 15 * 60_000,
                max_requests: 20,
                cooldown_ms: None,
            },
            verify_by_email: RateLimitRule {
                window_ms: 10 * 60_000,
                max_requests: 10,
                cooldown_ms: None,
            },
        }
    }
}

impl RateLimitRules {
    fn validate(&self) -> Result<(), RecoveryError> {
        let named = [
            ("request-by-ip", &self.request_by_ip),
            ("request-by-email", &self.request_by_email),
            ("verify-by-ip", &self.verify_by_ip),
            ("verify-by-email", &self.verify_by_email),
        ];
        for (name, rule) in named {
            if rule.window_ms == 0 || rule.max_requests == 0 {
                return Err(RecoveryError::ConfigError(format!(
                    "Rate limit rule {} needs a nonzero window and maximum",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub otp_length: usize,
    pub otp_expiry_minutes: u64,
    pub max_otp_attempts: u32,
    pub reset_token_expiry_minutes: u64,
    pub token_quarantine_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub rules: RateLimitRules,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_starttls: bool,
    pub smtp_username: String,
    pub smtp_password: String,
    pub mail_from: String,
    pub mail_from_name: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            otp_length: 6,
            otp_expiry_minutes: 10,
            max_otp_attempts: 3,
            reset_token_expiry_minutes: 10,
            token_quarantine_seconds: 60,
            sweep_interval_seconds: 300,
            rules: RateLimitRules::default(),
            smtp_server: "localhost".to_string(),
            smtp_port: 1025,
            smtp_starttls: true,
            smtp_username: "".to_string(),
            smtp_password: "".to_string(),
            mail_from: "noreply@example.com".to_string(),
            mail_from_name: "Password Recovery".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, RecoveryError> {
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| RecoveryError::ConfigError(format!("Invalid {}", key))),
        Err(_) => Ok(None),
    }
}

fn require_env(key: &str) -> Result<String, RecoveryError> {
    std::env::var(key).map_err(|_| RecoveryError::ConfigError(format!("{} must be set", key)))
}

impl RecoveryConfig {
    pub fn from_env() -> Result<Self, RecoveryError> {
        let mut config = Self::default();

        if let Some(val) = parse_env("OTP_LENGTH")? {
            config.otp_length = val;
        }
        if let Some(val) = parse_env("OTP_EXPIRY_MINUTES")? {
            config.otp_expiry_minutes = val;
        }
        if let Some(val) = parse_env("MAX_OTP_ATTEMPTS")? {
            config.max_otp_attempts = val;
        }
        if let Some(val) = parse_env("RESET_TOKEN_EXPIRY_MINUTES")? {
            config.reset_token_expiry_minutes = val;
        }
        if let Some(val) = parse_env("TOKEN_QUARANTINE_SECONDS")? {
            config.token_quarantine_seconds = val;
        }
        if let Some(val) = parse_env("SWEEP_INTERVAL_SECONDS")? {
            config.sweep_interval_seconds = val;
        }

        if let Some(val) = parse_env("REQUEST_IP_MAX")? {
            config.rules.request_by_ip.max_requests = val;
        }
        if let Some(val) = parse_env("REQUEST_IP_WINDOW_MS")? {
            config.rules.request_by_ip.window_ms = val;
        }
        if let Some(val) = parse_env("REQUEST_EMAIL_MAX")? {
            config.rules.request_by_email.max_requests = val;
        }
        if let Some(val) = parse_env("REQUEST_EMAIL_WINDOW_MS")? {
            config.rules.request_by_email.window_ms = val;
        }
        if let Some(val) = parse_env("REQUEST_EMAIL_COOLDOWN_MS")? {
            config.rules.request_by_email.cooldown_ms = Some(val);
        }
        if let Some(val) = parse_env("VERIFY_IP_MAX")? {
            config.rules.verify_by_ip.max_requests = val;
        }
        if let Some(val) = parse_env("VERIFY_IP_WINDOW_MS")? {
            config.rules.verify_by_ip.window_ms = val;
        }
        if let Some(val) = parse_env("VERIFY_EMAIL_MAX")? {
            config.rules.verify_by_email.max_requests = val;
        }
        if let Some(val) = parse_env("VERIFY_EMAIL_WINDOW_MS")? {
            config.rules.verify_by_email.window_ms = val;
        }

        config.smtp_server = require_env("SMTP_HOST")?;
        config.smtp_port = require_env("SMTP_PORT")?
            .parse()
            .map_err(|_| RecoveryError::ConfigError("Invalid SMTP_PORT".to_string()))?;
        if let Ok(val) = std::env::var("SMTP_STARTTLS") {
            config.smtp_starttls = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("SMTP_USERNAME") {
            config.smtp_username = val;
        }
        if let Ok(val) = std::env::var("SMTP_PASSWORD") {
            config.smtp_password = val;
        }
        config.mail_from = require_env("SMTP_MAIL_FROM")?;
        config.mail_from_name = require_env("SMTP_MAIL_FROM_NAME")?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would otherwise surface as request-time
    /// misbehavior. Run at startup, never per request.
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if !(4..=10).contains(&self.otp_length) {
            return Err(RecoveryError::ConfigError(
                "OTP length must be between 4 and 10 digits".to_string(),
            ));
        }
        if self.otp_expiry_minutes == 0 {
            return Err(RecoveryError::ConfigError(
                "OTP expiry must be nonzero".to_string(),
            ));
        }
        if self.max_otp_attempts == 0 {
            return Err(RecoveryError::ConfigError(
                "Max OTP attempts must be nonzero".to_string(),
            ));
        }
        if self.reset_token_expiry_minutes == 0 {
            return Err(RecoveryError::ConfigError(
                "Reset token expiry must be nonzero".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(RecoveryError::ConfigError(
                "Sweep interval must be nonzero".to_string(),
            ));
        }
        self.rules.validate()
    }

    pub fn otp_expiry_ms(&self) -> u64 {
        self.otp_expiry_minutes * 60_000
    }

    pub fn reset_token_expiry_ms(&self) -> u64 {
        self.reset_token_expiry_minutes * 60_000
    }

    pub fn token_quarantine_ms(&self) -> u64 {
        self.token_quarantine_seconds * 1_000
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}
