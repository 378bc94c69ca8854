use serde::{Deserialize, Serialize};

use crate::errors::EconomyError;
use crate::models::status::RequestStatus;
use crate::models::tiers::Tier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Stars,
    Upi,
    Manual,
}

/// A manually verified upgrade waiting for an admin decision.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct VipRequest {
    pub id: String,
    pub user_id: String,
    pub tier: Tier,
    pub method: PaymentMethod,
    #[serde(default)]
    pub proof: serde_json::Value,
    pub status: RequestStatus,
    pub requested_at: i64,
    pub processed_at: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewVipRequest {
    pub user_id: String,
    pub tier: Tier,
    pub method: PaymentMethod,
    #[serde(default)]
    pub proof: serde_json::Value,
}

/// A confirmed Stars payment, keyed by the provider's charge id.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct VipPayment {
    pub charge_id: String,
    pub user_id: String,
    pub tier: Tier,
    pub stars: u64,
    pub paid_at: i64,
}

impl VipRequest {
    pub fn new(request: NewVipRequest, id: String, now: i64) -> Result<Self, EconomyError> {
        if !request.tier.is_paid() {
            return Err(EconomyError::InvalidTier(request.tier));
        }

        Ok(VipRequest {
            id,
            user_id: request.user_id,
            tier: request.tier,
            method: request.method,
            proof: request.proof,
            status: RequestStatus::Pending,
            requested_at: now,
            processed_at: None,
        })
    }

    pub fn decide(mut self, to: RequestStatus, now: i64) -> Result<Self, EconomyError> {
        self.status = self.status.transition(to)?;
        self.processed_at = Some(now);
        Ok(self)
    }
}
