use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::errors::RecoveryError;
use crate::otp::OtpStore;
use crate::rate_limit::RateLimiter;
use crate::reset_token::ResetTokenStore;

/// Periodic sweep over the three stores. Purging only bounds memory; every
/// store re-checks expiry on access, so correctness never depends on the
/// sweep schedule.
pub struct CleanupService {
    otps: Arc<OtpStore>,
    tokens: Arc<ResetTokenStore>,
    limiter: Arc<RateLimiter>,
}

impl CleanupService {
    pub fn new(otps: Arc<OtpStore>, tokens: Arc<ResetTokenStore>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            otps,
            tokens,
            limiter,
        }
    }

    /// One sweep pass.
    #[instrument(skip(self))]
    pub fn run_cleanup(&self) -> Result<(), RecoveryError> {
        debug!("Starting scheduled cleanup job");

        let otps = self.otps.purge_expired()?;
        let tokens = self.tokens.purge_expired()?;
        let rate_limits = self.limiter.purge_expired()?;

        if otps + tokens + rate_limits > 0 {
            info!(otps, tokens, rate_limits, "Removed expired recovery records");
        }
        Ok(())
    }

    /// Starts the background scheduler. The returned handle owns the task;
    /// dropping it without `shutdown` leaves the task running for the
    /// lifetime of the runtime.
    pub fn spawn(self, interval: Duration) -> CleanupHandle {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut timer = time::interval(interval);
            info!("Cleanup scheduler started with interval: {:?}", interval);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = timer.tick() => {
                        if let Err(e) = self.run_cleanup() {
                            error!("Cleanup job failed: {:?}", e);
                        }
                    }
                }
            }
            debug!("Cleanup scheduler stopped");
        });

        CleanupHandle { token, handle }
    }
}

/// Lifecycle handle for the sweeper task.
pub struct CleanupHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    /// Cancels the scheduler and waits for the task to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!("Cleanup task failed to join: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitRules;

    fn sweeper_fixture() -> (Arc<ManualClock>, CleanupService, Arc<OtpStore>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let otps = Arc::new(OtpStore::new(clock.clone(), 6, 60_000, 3));
        let tokens = Arc::new(ResetTokenStore::new(clock.clone(), 60_000, 10_000));
        let limiter = Arc::new(RateLimiter::new(clock.clone(), RateLimitRules::default()));
        let service = CleanupService::new(otps.clone(), tokens, limiter);
        (clock, service, otps)
    }

    #[test]
    fn sweep_purges_expired_records() {
        let (clock, service, otps) = sweeper_fixture();
        otps.store("reader@example.com", "123456").unwrap();

        service.run_cleanup().unwrap();
        assert!(otps.verify("reader@example.com", "123456").is_ok());

        otps.store("reader@example.com", "654321").unwrap();
        clock.advance_ms(60_001);
        service.run_cleanup().unwrap();
        assert!(matches!(
            otps.verify("reader@example.com", "654321"),
            Err(RecoveryError::OtpNotFound)
        ));
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let (_clock, service, _otps) = sweeper_fixture();
        let handle = service.spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.shutdown().await;
    }
}
