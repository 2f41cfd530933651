use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum_password_recovery::{
    axum_api::recovery_router, EmailSender, ManualClock, RecoveryConfig, RecoveryError,
    RecoveryService, UserStore,
};

pub const KNOWN_EMAIL: &str = "reader@example.com";

#[derive(Clone, Default)]
pub struct TestEmailSender {
    pub sent_emails: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl TestEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn last_code(&self) -> Option<String> {
        self.sent_emails
            .lock()
            .unwrap()
            .last()
            .map(|(_, code, _)| code.clone())
    }
}

#[async_trait]
impl EmailSender for TestEmailSender {
    async fn send_otp(
        &self,
        recipient: &str,
        code: &str,
        display_name: &str,
    ) -> Result<(), RecoveryError> {
        self.sent_emails.lock().unwrap().push((
            recipient.to_string(),
            code.to_string(),
            display_name.to_string(),
        ));
        Ok(())
    }
}

pub struct TestUserStore {
    pub users: Mutex<HashMap<String, (String, String)>>,
}

impl TestUserStore {
    pub fn with_known_user() -> Self {
        let mut users = HashMap::new();
        users.insert(
            KNOWN_EMAIL.to_string(),
            ("Avid Reader".to_string(), "old-password".to_string()),
        );
        Self {
            users: Mutex::new(users),
        }
    }

    #[allow(dead_code)]
    pub fn password_of(&self, email: &str) -> Option<String> {
        self.users
            .lock()
            .unwrap()
            .get(email)
            .map(|(_, password)| password.clone())
    }
}

#[async_trait]
impl UserStore for TestUserStore {
    async fn display_name(&self, email: &str) -> Result<Option<String>, RecoveryError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(email)
            .map(|(name, _)| name.clone()))
    }

    async fn set_password(&self, email: &str, new_password: &str) -> Result<bool, RecoveryError> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(email) {
            Some((_, password)) => {
                *password = new_password.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub email_sender: Arc<TestEmailSender>,
    pub users: Arc<TestUserStore>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
pub fn spawn_app() -> TestApp {
    spawn_app_with(RecoveryConfig::default())
}

#[allow(dead_code)]
pub fn spawn_app_with(config: RecoveryConfig) -> TestApp {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let email_sender = Arc::new(TestEmailSender::new());
    let users = Arc::new(TestUserStore::with_known_user());

    let service = Arc::new(
        RecoveryService::new(config, clock.clone(), email_sender.clone(), users.clone())
            .expect("valid test config"),
    );

    TestApp {
        router: recovery_router(service),
        email_sender,
        users,
        clock,
    }
}
