use std::sync::Arc;

use crate::models::withdrawals::Withdrawal;
use crate::repositories::store::{get_as, list_as, set_as, RemoteStore};

#[derive(Clone)]
pub struct WithdrawalRepository {
    store: Arc<dyn RemoteStore>,
}

impl WithdrawalRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn save_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), anyhow::Error> {
        set_as(
            self.store.as_ref(),
            &format!("withdrawals/{}", withdrawal.id),
            withdrawal,
        )
        .await
    }

    pub async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, anyhow::Error> {
        get_as(self.store.as_ref(), &format!("withdrawals/{}", id)).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let mut withdrawals: Vec<Withdrawal> =
            list_as::<Withdrawal>(self.store.as_ref(), "withdrawals")
                .await?
                .into_iter()
                .filter(|w| w.user_id == user_id)
                .collect();
        withdrawals.sort_by_key(|w| w.requested_at);

        Ok(withdrawals)
    }
}
