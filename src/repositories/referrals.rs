use std::sync::Arc;

use serde_json::Value;

use crate::models::referrals::Referral;
use crate::repositories::store::{get_as, list_as, set_as, RemoteStore};

#[derive(Clone)]
pub struct ReferralRepository {
    store: Arc<dyn RemoteStore>,
}

impl ReferralRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Stores the record under its referrer and indexes it by referred user.
    pub async fn insert_referral(&self, referral: &Referral) -> Result<(), anyhow::Error> {
        self.save_referral(referral).await?;
        self.store
            .set(
                &format!("referralIndex/{}", referral.referred_id),
                Value::String(referral.referrer_id.clone()),
            )
            .await
    }

    pub async fn save_referral(&self, referral: &Referral) -> Result<(), anyhow::Error> {
        set_as(
            self.store.as_ref(),
            &format!("referrals/{}/{}", referral.referrer_id, referral.id),
            referral,
        )
        .await
    }

    pub async fn get_referral(
        &self,
        referrer_id: &str,
        referral_id: &str,
    ) -> Result<Option<Referral>, anyhow::Error> {
        get_as(
            self.store.as_ref(),
            &format!("referrals/{}/{}", referrer_id, referral_id),
        )
        .await
    }

    pub async fn list_referrals(&self, referrer_id: &str) -> Result<Vec<Referral>, anyhow::Error> {
        list_as(self.store.as_ref(), &format!("referrals/{}", referrer_id)).await
    }

    /// Every referral record pointing at `referred_id`. Uses the index when
    /// present and falls back to scanning the whole ledger.
    pub async fn find_referrals_for(
        &self,
        referred_id: &str,
    ) -> Result<Vec<Referral>, anyhow::Error> {
        let indexed = self
            .store
            .get(&format!("referralIndex/{}", referred_id))
            .await?;

        if let Some(Value::String(referrer_id)) = indexed {
            let matches: Vec<Referral> = self
                .list_referrals(&referrer_id)
                .await?
                .into_iter()
                .filter(|r| r.referred_id == referred_id)
                .collect();
            if !matches.is_empty() {
                return Ok(matches);
            }
        }

        self.scan_ledger(referred_id).await
    }

    async fn scan_ledger(&self, referred_id: &str) -> Result<Vec<Referral>, anyhow::Error> {
        let Some(Value::Object(referrers)) = self.store.get("referrals").await? else {
            return Ok(Vec::new());
        };

        let mut matches = Vec::new();
        for (referrer_id, records) in referrers {
            let Value::Object(records) = records else {
                continue;
            };
            for (key, record) in records {
                match serde_json::from_value::<Referral>(record) {
                    Ok(referral) if referral.referred_id == referred_id => matches.push(referral),
                    Ok(_) => (),
                    Err(e) => log::warn!("Skipping referral {}/{}: {}", referrer_id, key, e),
                }
            }
        }

        log::debug!(
            "Ledger scan for {} found {} referral(s)",
            referred_id,
            matches.len()
        );
        Ok(matches)
    }
}
