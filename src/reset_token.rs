use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::RngCore;

use crate::clock::Clock;
use crate::errors::RecoveryError;
use crate::otp::normalize_email;

#[derive(Debug)]
struct ResetTokenRecord {
    email: String,
    expires_at: u64,
    used: bool,
    purge_at: u64,
}

/// Single-use reset tokens, issued after a successful OTP verification.
///
/// A consumed token stays in the map for a short quarantine so a replay
/// reads `TokenAlreadyUsed` rather than `TokenInvalid` - the caller can
/// tell "spent" apart from "never existed".
pub struct ResetTokenStore {
    clock: Arc<dyn Clock>,
    expiry_ms: u64,
    quarantine_ms: u64,
    records: Mutex<HashMap<String, ResetTokenRecord>>,
}

impl ResetTokenStore {
    pub fn new(clock: Arc<dyn Clock>, expiry_ms: u64, quarantine_ms: u64) -> Self {
        Self {
            clock,
            expiry_ms,
            quarantine_ms,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ResetTokenRecord>>, RecoveryError> {
        self.records
            .lock()
            .map_err(|_| RecoveryError::StorageError("Lock poisoned".into()))
    }

    /// Issues an opaque token bound to `email`: 32 CSPRNG bytes, hex-encoded.
    pub fn issue(&self, email: &str) -> Result<String, RecoveryError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let now = self.clock.now_ms();
        let mut records = self.lock()?;
        records.insert(
            token.clone(),
            ResetTokenRecord {
                email: normalize_email(email),
                expires_at: now + self.expiry_ms,
                used: false,
                purge_at: now + self.expiry_ms,
            },
        );
        Ok(token)
    }

    /// Consumes the token and returns the email it authorizes.
    ///
    /// The token transitions unused -> used exactly once; the check and the
    /// transition share one critical section.
    pub fn verify(&self, token: &str) -> Result<String, RecoveryError> {
        let now = self.clock.now_ms();
        let mut records = self.lock()?;

        let record = match records.get_mut(token) {
            Some(record) => record,
            None => return Err(RecoveryError::TokenInvalid),
        };

        if record.used {
            if now >= record.purge_at {
                // Quarantine over: the replay signal has served its purpose.
                records.remove(token);
                return Err(RecoveryError::TokenInvalid);
            }
            return Err(RecoveryError::TokenAlreadyUsed);
        }

        if now > record.expires_at {
            records.remove(token);
            return Err(RecoveryError::TokenExpired);
        }

        record.used = true;
        record.purge_at = now + self.quarantine_ms;
        Ok(record.email.clone())
    }

    /// Sweeper hook: drops unused-expired tokens and used tokens whose
    /// quarantine has lapsed.
    pub fn purge_expired(&self) -> Result<usize, RecoveryError> {
        let now = self.clock.now_ms();
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| {
            if record.used {
                now < record.purge_at
            } else {
                now <= record.expires_at
            }
        });
        Ok(before - records.len())
    }
}
