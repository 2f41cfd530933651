use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::{RateLimitRule, RateLimitRules};
use crate::errors::RecoveryError;

/// Which gate a check is for. Rules are configured per kind, records are
/// keyed per `(kind, identifier)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    RequestByIp,
    RequestByEmail,
    VerifyByIp,
    VerifyByEmail,
}

impl RateLimitRules {
    pub fn rule(&self, kind: RuleKind) -> RateLimitRule {
        match kind {
            RuleKind::RequestByIp => self.request_by_ip,
            RuleKind::RequestByEmail => self.request_by_email,
            RuleKind::VerifyByIp => self.verify_by_ip,
            RuleKind::VerifyByEmail => self.verify_by_email,
        }
    }
}

/// Denial is a normal outcome here, not an error: callers get a retry hint
/// instead of having to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    fn deny(retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_ms.div_ceil(1_000),
        }
    }
}

#[derive(Debug)]
struct RateLimitRecord {
    count: u32,
    window_start: u64,
    last_attempt: u64,
}

/// Fixed-window limiter with an optional per-attempt cooldown.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    rules: RateLimitRules,
    records: Mutex<HashMap<(RuleKind, String), RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, rules: RateLimitRules) -> Self {
        Self {
            clock,
            rules,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<(RuleKind, String), RateLimitRecord>>, RecoveryError> {
        self.records
            .lock()
            .map_err(|_| RecoveryError::StorageError("Lock poisoned".into()))
    }

    pub fn check(
        &self,
        kind: RuleKind,
        identifier: &str,
    ) -> Result<RateLimitDecision, RecoveryError> {
        let rule = self.rules.rule(kind);
        let now = self.clock.now_ms();
        let mut records = self.lock()?;

        let record = records
            .entry((kind, identifier.to_string()))
            .or_insert(RateLimitRecord {
                count: 0,
                window_start: now,
                last_attempt: now,
            });

        // A zero count marks a record we just inserted.
        if record.count == 0 || now >= record.window_start + rule.window_ms {
            record.count = 1;
            record.window_start = now;
            record.last_attempt = now;
            return Ok(RateLimitDecision::allow());
        }

        // Even a denied check counts as the most recent attempt.
        if let Some(cooldown_ms) = rule.cooldown_ms {
            if now < record.last_attempt + cooldown_ms {
                let retry = record.last_attempt + cooldown_ms - now;
                record.last_attempt = now;
                return Ok(RateLimitDecision::deny(retry));
            }
        }

        if record.count >= rule.max_requests {
            let retry = record.window_start + rule.window_ms - now;
            record.last_attempt = now;
            return Ok(RateLimitDecision::deny(retry));
        }

        record.count += 1;
        record.last_attempt = now;
        Ok(RateLimitDecision::allow())
    }

    /// Drops records whose window and cooldown have both lapsed. A dropped
    /// record and a fresh window are indistinguishable to `check`.
    pub fn purge_expired(&self) -> Result<usize, RecoveryError> {
        let now = self.clock.now_ms();
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|(kind, _), record| {
            let rule = self.rules.rule(*kind);
            let window_open = now < record.window_start + rule.window_ms;
            let cooling = rule
                .cooldown_ms
                .is_some_and(|cooldown_ms| now < record.last_attempt + cooldown_ms);
            window_open || cooling
        });
        Ok(before - records.len())
    }
}
