use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::models::users::User;
use crate::repositories::store::{get_as, set_as, RemoteStore};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// How a user write reacts to a store failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePolicy {
    /// One attempt; the caller owns the failure.
    Once,
    /// Up to three attempts with exponential backoff.
    Retry,
}

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn RemoteStore>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        get_as(self.store.as_ref(), &format!("users/{}", user_id)).await
    }

    pub async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>, anyhow::Error> {
        let owner = self
            .store
            .get(&format!("referralCodes/{}", code.to_uppercase()))
            .await?;

        match owner {
            Some(Value::String(user_id)) => self.get_user_by_id(&user_id).await,
            _ => Ok(None),
        }
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), anyhow::Error> {
        self.save_user(user, WritePolicy::Retry).await?;
        self.store
            .set(
                &format!("referralCodes/{}", user.referral_code),
                Value::String(user.id.clone()),
            )
            .await
    }

    pub async fn save_user(&self, user: &User, policy: WritePolicy) -> Result<(), anyhow::Error> {
        let path = format!("users/{}", user.id);
        let attempts = match policy {
            WritePolicy::Once => 1,
            WritePolicy::Retry => RETRY_ATTEMPTS,
        };

        let mut attempt = 1;
        loop {
            match set_as(self.store.as_ref(), &path, user).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    log::warn!(
                        "Write to {} failed (attempt {}/{}), retrying in {:?}: {}",
                        path,
                        attempt,
                        attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
