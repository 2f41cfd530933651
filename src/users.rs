use async_trait::async_trait;

use crate::errors::RecoveryError;

/// The application's user collection, as seen from the recovery flow.
///
/// Both methods must behave identically for known and unknown addresses
/// from a timing point of view as far as practical; the service never
/// surfaces the difference to callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Display name for the greeting in the recovery email, `None` when the
    /// address is not registered.
    async fn display_name(&self, email: &str) -> Result<Option<String>, RecoveryError>;

    /// Persists a new password for an identity already proven by a reset
    /// token. Returns `false` when the account no longer exists.
    async fn set_password(&self, email: &str, new_password: &str) -> Result<bool, RecoveryError>;
}
