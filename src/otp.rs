use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;

use crate::clock::Clock;
use crate::errors::RecoveryError;

/// Emails are case-insensitive keys everywhere in this crate.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[derive(Debug)]
struct OtpRecord {
    code: String,
    expires_at: u64,
    attempts: u32,
}

/// One-time codes keyed by email: at most one active record per address,
/// consumed on first successful verification.
pub struct OtpStore {
    clock: Arc<dyn Clock>,
    code_length: usize,
    expiry_ms: u64,
    max_attempts: u32,
    records: Mutex<HashMap<String, OtpRecord>>,
}

impl OtpStore {
    pub fn new(clock: Arc<dyn Clock>, code_length: usize, expiry_ms: u64, max_attempts: u32) -> Self {
        Self {
            clock,
            code_length,
            expiry_ms,
            max_attempts,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, OtpRecord>>, RecoveryError> {
        self.records
            .lock()
            .map_err(|_| RecoveryError::StorageError("Lock poisoned".into()))
    }

    /// Fixed-width numeric code from the thread-local CSPRNG.
    pub fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        let range = 10u64.pow(self.code_length as u32);
        let num = rng.gen_range(0..range);
        format!("{:0width$}", num, width = self.code_length)
    }

    /// Creates or replaces the active record for `email`. A new request
    /// silently invalidates any code issued earlier.
    pub fn store(&self, email: &str, code: &str) -> Result<(), RecoveryError> {
        let now = self.clock.now_ms();
        let mut records = self.lock()?;
        records.insert(
            normalize_email(email),
            OtpRecord {
                code: code.to_string(),
                expires_at: now + self.expiry_ms,
                attempts: 0,
            },
        );
        Ok(())
    }

    /// Verifies and, on a match, consumes the code for `email`.
    ///
    /// The whole lookup-check-mutate sequence runs under the store lock, so
    /// concurrent calls for the same address are totally ordered and the
    /// code is consumed at most once. Rejection order is fixed: missing,
    /// expired, attempts exhausted, then mismatch.
    pub fn verify(&self, email: &str, code: &str) -> Result<(), RecoveryError> {
        let key = normalize_email(email);
        let now = self.clock.now_ms();
        let mut records = self.lock()?;

        let record = match records.get_mut(&key) {
            Some(record) => record,
            None => return Err(RecoveryError::OtpNotFound),
        };

        if now > record.expires_at {
            records.remove(&key);
            return Err(RecoveryError::OtpExpired);
        }

        if record.attempts >= self.max_attempts {
            records.remove(&key);
            return Err(RecoveryError::OtpAttemptsExceeded);
        }

        // Charged before the comparison: the guess budget bounds total
        // tries per issued code, whichever attempt turns out correct.
        record.attempts += 1;

        if record.code == code {
            records.remove(&key);
            Ok(())
        } else {
            Err(RecoveryError::OtpMismatch)
        }
    }

    /// Sweeper hook. `verify` checks expiry on access either way, this only
    /// bounds memory.
    pub fn purge_expired(&self) -> Result<usize, RecoveryError> {
        let now = self.clock.now_ms();
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| now <= record.expires_at);
        Ok(before - records.len())
    }
}
