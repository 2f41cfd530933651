use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::RecoveryConfig;
use crate::cron::CleanupService;
use crate::email::EmailSender;
use crate::errors::RecoveryError;
use crate::otp::{normalize_email, OtpStore};
use crate::rate_limit::{RateLimiter, RuleKind};
use crate::reset_token::ResetTokenStore;
use crate::users::UserStore;

/// Orchestrates the recovery flow: request a code, confirm it, spend the
/// resulting reset token. Owns the three stores; constructed once at
/// startup and shared behind an `Arc`.
pub struct RecoveryService {
    pub config: RecoveryConfig,
    otps: Arc<OtpStore>,
    tokens: Arc<ResetTokenStore>,
    limiter: Arc<RateLimiter>,
    email_sender: Arc<dyn EmailSender>,
    users: Arc<dyn UserStore>,
}

impl RecoveryService {
    pub fn new(
        config: RecoveryConfig,
        clock: Arc<dyn Clock>,
        email_sender: Arc<dyn EmailSender>,
        users: Arc<dyn UserStore>,
    ) -> Result<Self, RecoveryError> {
        config.validate()?;

        let otps = Arc::new(OtpStore::new(
            clock.clone(),
            config.otp_length,
            config.otp_expiry_ms(),
            config.max_otp_attempts,
        ));
        let tokens = Arc::new(ResetTokenStore::new(
            clock.clone(),
            config.reset_token_expiry_ms(),
            config.token_quarantine_ms(),
        ));
        let limiter = Arc::new(RateLimiter::new(clock, config.rules.clone()));

        Ok(Self {
            config,
            otps,
            tokens,
            limiter,
            email_sender,
            users,
        })
    }

    /// Sweeper over this service's stores; spawn it with
    /// [`CleanupService::spawn`] and the configured interval.
    pub fn sweeper(&self) -> CleanupService {
        CleanupService::new(self.otps.clone(), self.tokens.clone(), self.limiter.clone())
    }

    fn gate(&self, kind: RuleKind, identifier: &str) -> Result<(), RecoveryError> {
        let decision = self.limiter.check(kind, identifier)?;
        if decision.allowed {
            Ok(())
        } else {
            Err(RecoveryError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            })
        }
    }

    /// Issues a recovery code for `email` and hands it to the email
    /// collaborator.
    ///
    /// Succeeds whether or not the address is registered; unknown addresses
    /// take the same path up to (and including) the rate limiter and then
    /// quietly do nothing. Delivery is best-effort: a send failure is
    /// logged, the issued code stays valid until it expires.
    pub async fn request_recovery(&self, email: &str, ip: &str) -> Result<(), RecoveryError> {
        let email = normalize_email(email);
        self.gate(RuleKind::RequestByIp, ip)?;
        self.gate(RuleKind::RequestByEmail, &email)?;

        let display_name = match self.users.display_name(&email).await? {
            Some(name) => name,
            None => {
                debug!("Recovery requested for an unregistered address");
                return Ok(());
            }
        };

        let code = self.otps.generate_code();
        self.otps.store(&email, &code)?;

        if let Err(e) = self.email_sender.send_otp(&email, &code, &display_name).await {
            warn!("Failed to send recovery code: {}", e);
        }
        Ok(())
    }

    /// Consumes the code for `email` and, on success, issues a single-use
    /// reset token.
    pub async fn confirm_otp(
        &self,
        email: &str,
        code: &str,
        ip: &str,
    ) -> Result<String, RecoveryError> {
        let email = normalize_email(email);
        self.gate(RuleKind::VerifyByIp, ip)?;
        self.gate(RuleKind::VerifyByEmail, &email)?;

        self.otps.verify(&email, code)?;
        self.tokens.issue(&email)
    }

    /// Spends the reset token and persists the new password for the email
    /// it authorizes.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), RecoveryError> {
        let email = self.tokens.verify(token)?;

        if !self.users.set_password(&email, new_password).await? {
            // The token is spent either way; nothing useful to tell the caller.
            warn!("Password reset for an address the user store no longer knows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitRule;
    use crate::email::MockEmailSender;
    use crate::users::MockUserStore;
    use mockall::predicate::*;
    use std::sync::Mutex;

    fn service_with(
        config: RecoveryConfig,
        email_sender: MockEmailSender,
        users: MockUserStore,
    ) -> RecoveryService {
        RecoveryService::new(
            config,
            Arc::new(ManualClock::new(1_000_000)),
            Arc::new(email_sender),
            Arc::new(users),
        )
        .unwrap()
    }

    fn capturing_sender() -> (Arc<Mutex<Vec<(String, String, String)>>>, MockEmailSender) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let captured = sent.clone();
        let mut mock_email = MockEmailSender::new();
        mock_email.expect_send_otp().returning(move |to, code, name| {
            captured
                .lock()
                .unwrap()
                .push((to.to_string(), code.to_string(), name.to_string()));
            Ok(())
        });
        (sent, mock_email)
    }

    #[tokio::test]
    async fn test_request_recovery_sends_a_code() {
        let mut mock_users = MockUserStore::new();
        mock_users
            .expect_display_name()
            .with(eq("reader@example.com"))
            .times(1)
            .returning(|_| Ok(Some("Avid Reader".to_string())));

        let mut mock_email = MockEmailSender::new();
        mock_email
            .expect_send_otp()
            .with(eq("reader@example.com"), always(), eq("Avid Reader"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(RecoveryConfig::default(), mock_email, mock_users);
        let result = service
            .request_recovery("Reader@Example.com", "203.0.113.7")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_request_recovery_unknown_email_is_silent() {
        let mut mock_users = MockUserStore::new();
        mock_users
            .expect_display_name()
            .returning(|_| Ok(None));

        let mut mock_email = MockEmailSender::new();
        mock_email.expect_send_otp().times(0);

        let service = service_with(RecoveryConfig::default(), mock_email, mock_users);
        let result = service
            .request_recovery("stranger@example.com", "203.0.113.7")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_request_recovery_rate_limited_by_email() {
        let mut mock_users = MockUserStore::new();
        mock_users
            .expect_display_name()
            .returning(|_| Ok(Some("Avid Reader".to_string())));

        let (_sent, mock_email) = capturing_sender();

        let mut config = RecoveryConfig::default();
        config.rules.request_by_email = RateLimitRule {
            window_ms: 60_000,
            max_requests: 1,
            cooldown_ms: None,
        };

        let service = service_with(config, mock_email, mock_users);
        assert!(service
            .request_recovery("reader@example.com", "203.0.113.7")
            .await
            .is_ok());

        let result = service
            .request_recovery("reader@example.com", "203.0.113.7")
            .await;
        assert!(matches!(
            result,
            Err(RecoveryError::RateLimited { retry_after_secs }) if retry_after_secs > 0
        ));
    }

    #[tokio::test]
    async fn test_request_recovery_survives_email_failure() {
        let mut mock_users = MockUserStore::new();
        mock_users
            .expect_display_name()
            .returning(|_| Ok(Some("Avid Reader".to_string())));

        let mut mock_email = MockEmailSender::new();
        mock_email
            .expect_send_otp()
            .times(1)
            .returning(|_, _, _| Err(RecoveryError::EmailError("SMTP down".to_string())));

        let service = service_with(RecoveryConfig::default(), mock_email, mock_users);
        let result = service
            .request_recovery("reader@example.com", "203.0.113.7")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_full_flow_resets_the_password() {
        let mut mock_users = MockUserStore::new();
        mock_users
            .expect_display_name()
            .returning(|_| Ok(Some("Avid Reader".to_string())));
        mock_users
            .expect_set_password()
            .with(eq("reader@example.com"), eq("correct-horse"))
            .times(1)
            .returning(|_, _| Ok(true));

        let (sent, mock_email) = capturing_sender();
        let service = service_with(RecoveryConfig::default(), mock_email, mock_users);

        service
            .request_recovery("reader@example.com", "203.0.113.7")
            .await
            .unwrap();
        let code = sent.lock().unwrap()[0].1.clone();

        let token = service
            .confirm_otp("reader@example.com", &code, "203.0.113.7")
            .await
            .unwrap();
        assert_eq!(token.len(), 64);

        service.reset_password(&token, "correct-horse").await.unwrap();

        // Spending the token twice reads as a replay, not success.
        let replay = service.reset_password(&token, "correct-horse").await;
        assert!(matches!(replay, Err(RecoveryError::TokenAlreadyUsed)));
    }

    #[tokio::test]
    async fn test_confirm_otp_wrong_code() {
        let mut mock_users = MockUserStore::new();
        mock_users
            .expect_display_name()
            .returning(|_| Ok(Some("Avid Reader".to_string())));

        let (_sent, mock_email) = capturing_sender();
        let service = service_with(RecoveryConfig::default(), mock_email, mock_users);

        service
            .request_recovery("reader@example.com", "203.0.113.7")
            .await
            .unwrap();

        let result = service
            .confirm_otp("reader@example.com", "this-is-wrong", "203.0.113.7")
            .await;
        assert!(matches!(result, Err(RecoveryError::OtpMismatch)));
    }

    #[tokio::test]
    async fn test_reset_password_with_unknown_token() {
        let mock_users = MockUserStore::new();
        let mock_email = MockEmailSender::new();
        let service = service_with(RecoveryConfig::default(), mock_email, mock_users);

        let result = service.reset_password("deadbeef", "correct-horse").await;
        assert!(matches!(result, Err(RecoveryError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_at_construction() {
        let mut config = RecoveryConfig::default();
        config.rules.request_by_ip.max_requests = 0;

        let result = RecoveryService::new(
            config,
            Arc::new(ManualClock::new(0)),
            Arc::new(MockEmailSender::new()),
            Arc::new(MockUserStore::new()),
        );
        assert!(matches!(result, Err(RecoveryError::ConfigError(_))));
    }
}
