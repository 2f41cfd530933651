#![doc = include_str!("../README.md")]

#[cfg(feature = "axum")]
pub mod axum_api;
pub mod clock;
pub mod config;
pub mod cron;
pub mod email;
pub mod errors;
pub mod otp;
pub mod rate_limit;
pub mod reset_token;
pub mod service;
pub mod users;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitRule, RateLimitRules, RecoveryConfig};
pub use cron::{CleanupHandle, CleanupService};
pub use email::{EmailSender, LettreEmailSender};
pub use errors::RecoveryError;
pub use otp::OtpStore;
pub use rate_limit::{RateLimitDecision, RateLimiter, RuleKind};
pub use reset_token::ResetTokenStore;
pub use service::RecoveryService;
pub use users::UserStore;
