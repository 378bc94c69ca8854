use serde::{Deserialize, Serialize};

/// One referred user, stored under the referrer at `referrals/{referrer_id}/{id}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Referral {
    pub id: String,
    pub referrer_id: String,
    pub referred_id: String,
    pub referred_username: Option<String>,
    #[serde(default)]
    pub total_earnings: u64,
    pub created_at: i64,
}

pub const BASIS_POINTS: u64 = 10_000;

/// `floor(amount * bps / 10_000)`.
pub fn commission(amount: u64, commission_bps: u64) -> u64 {
    ((u128::from(amount) * u128::from(commission_bps)) / u128::from(BASIS_POINTS)) as u64
}

/// Signup bonus scaled by the referrer's tier.
pub fn signup_bonus(base: u64, referral_multiplier: f64) -> u64 {
    (base as f64 * referral_multiplier).floor().max(0.0) as u64
}

impl Referral {
    pub fn credit(mut self, amount: u64) -> Self {
        self.total_earnings = self.total_earnings.saturating_add(amount);
        self
    }
}
