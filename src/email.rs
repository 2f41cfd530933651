use crate::config::RecoveryConfig;
use crate::errors::RecoveryError;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Out-of-band delivery of a recovery code. Best-effort from the service's
/// point of view: a failed send never invalidates the issued code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_otp(
        &self,
        recipient: &str,
        code: &str,
        display_name: &str,
    ) -> Result<(), RecoveryError>;
}

pub struct LettreEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl LettreEmailSender {
    pub fn new(config: &RecoveryConfig) -> Self {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        // Port 1025 is the local Mailpit convention and wants no TLS at all.
        let mailer = if config.smtp_port == 1025 {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_server)
                .port(config.smtp_port)
                .build()
        } else if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
                .expect("Failed to build SMTP transport (invalid host?)")
                .port(config.smtp_port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
                .expect("Failed to build SMTP transport (invalid host?)")
                .port(config.smtp_port)
                .credentials(creds)
                .build()
        };

        Self {
            mailer,
            from_email: config.mail_from.clone(),
            from_name: config.mail_from_name.clone(),
        }
    }
}

#[async_trait]
impl EmailSender for LettreEmailSender {
    async fn send_otp(
        &self,
        recipient: &str,
        code: &str,
        display_name: &str,
    ) -> Result<(), RecoveryError> {
        let body = format!(
            "Hi {},\n\nYour password reset code is: {}\n\nIf you did not request a reset, you can ignore this message.",
            display_name, code
        );

        let email = Message::builder()
            .from(
                format!("{} <{}>", self.from_name, self.from_email)
                    .parse()
                    .map_err(|e| {
                        RecoveryError::EmailError(format!("Invalid from address: {}", e))
                    })?,
            )
            .to(recipient
                .parse()
                .map_err(|e| RecoveryError::EmailError(format!("Invalid to address: {}", e)))?)
            .subject("Your password reset code")
            .body(body)
            .map_err(|e| RecoveryError::EmailError(format!("Failed to build email: {}", e)))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| RecoveryError::EmailError(format!("Failed to send email: {}", e)))?;
        Ok(())
    }
}
