use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::EconomyError;
use crate::models::farming::SyncCheckpoint;
use crate::models::tiers::{Tier, TierConfig};
use crate::utils::time::MS_PER_DAY;

/// A player account. Stored at `users/{id}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(from = "StoredUser")]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub coins: u64,
    pub stars: u64,
    pub total_earnings: u64,
    pub tier: Tier,
    pub vip_expiry: Option<i64>,
    pub farming_rate: f64,
    pub claim_streak: u32,
    pub claimed_days: Vec<u8>,
    pub last_claim_at: Option<i64>,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub total_referrals: u64,
    pub banned: bool,
    /// Per device, how much of its latest session is already in `coins`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub farming_sync: BTreeMap<String, SyncCheckpoint>,
    pub created_at: i64,
    pub updated_at: i64,
}

// Older records carry camelCase keys and the duplicated `vip_tier`/`vipExpiry`
// fields. Both spellings are accepted and folded into the canonical field.
#[derive(Deserialize)]
struct StoredUser {
    #[serde(alias = "userId")]
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, alias = "firstName")]
    first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    last_name: Option<String>,
    #[serde(default)]
    coins: u64,
    #[serde(default)]
    stars: u64,
    #[serde(default, alias = "totalEarnings")]
    total_earnings: u64,
    #[serde(default)]
    tier: Option<Tier>,
    #[serde(default)]
    vip_tier: Option<Tier>,
    #[serde(default)]
    vip_expiry: Option<i64>,
    #[serde(default, rename = "vipExpiry")]
    vip_expiry_legacy: Option<i64>,
    #[serde(default, alias = "farmingRate")]
    farming_rate: Option<f64>,
    #[serde(default, alias = "claimStreak")]
    claim_streak: u32,
    #[serde(default, alias = "claimedDays")]
    claimed_days: Vec<u8>,
    #[serde(default, alias = "lastClaimAt")]
    last_claim_at: Option<i64>,
    #[serde(default, alias = "referralCode")]
    referral_code: Option<String>,
    #[serde(default, alias = "referredBy")]
    referred_by: Option<String>,
    #[serde(default, alias = "totalReferrals")]
    total_referrals: u64,
    #[serde(default)]
    banned: bool,
    #[serde(default)]
    farming_sync: BTreeMap<String, SyncCheckpoint>,
    #[serde(default, alias = "createdAt")]
    created_at: i64,
    #[serde(default, alias = "updatedAt")]
    updated_at: i64,
}

pub const DEFAULT_FARMING_RATE: f64 = 1.0;

impl From<StoredUser> for User {
    fn from(stored: StoredUser) -> Self {
        let referral_code = stored
            .referral_code
            .unwrap_or_else(|| referral_code_for(&stored.id));

        User {
            tier: stored.tier.or(stored.vip_tier).unwrap_or_default(),
            vip_expiry: stored.vip_expiry.or(stored.vip_expiry_legacy),
            farming_rate: stored.farming_rate.unwrap_or(DEFAULT_FARMING_RATE),
            id: stored.id,
            username: stored.username,
            first_name: stored.first_name,
            last_name: stored.last_name,
            coins: stored.coins,
            stars: stored.stars,
            total_earnings: stored.total_earnings,
            claim_streak: stored.claim_streak,
            claimed_days: stored.claimed_days,
            last_claim_at: stored.last_claim_at,
            referral_code,
            referred_by: stored.referred_by,
            total_referrals: stored.total_referrals,
            banned: stored.banned,
            farming_sync: stored.farming_sync,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Telegram identity presented on sign-in.
#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub referral_code: Option<String>,
}

/// Deterministic, shareable code derived from the user id.
pub fn referral_code_for(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    format!("{:x}", digest)[..10].to_uppercase()
}

impl User {
    pub fn new(identity: &NewUser, farming_rate: f64, now: i64) -> Self {
        User {
            id: identity.id.clone(),
            username: identity.username.clone(),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            coins: 0,
            stars: 0,
            total_earnings: 0,
            tier: Tier::Free,
            vip_expiry: None,
            farming_rate,
            claim_streak: 0,
            claimed_days: Vec::new(),
            last_claim_at: None,
            referral_code: referral_code_for(&identity.id),
            referred_by: None,
            total_referrals: 0,
            banned: false,
            farming_sync: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tier_config(&self) -> &'static TierConfig {
        self.tier.config()
    }

    pub fn is_vip_active(&self, now: i64) -> bool {
        self.tier.is_paid() && self.vip_expiry.is_some_and(|expiry| expiry > now)
    }

    pub fn ensure_active(&self) -> Result<(), EconomyError> {
        if self.banned {
            return Err(EconomyError::UserBanned(self.id.clone()));
        }
        Ok(())
    }

    /// Drops an expired paid tier back to free.
    pub fn expire_vip(mut self, now: i64) -> Self {
        if self.tier.is_paid() && !self.is_vip_active(now) {
            log::info!("VIP {} expired for user {}", self.tier, self.id);
            self.tier = Tier::Free;
            self.vip_expiry = None;
            self.updated_at = now;
        }
        self
    }

    /// Earned coins: counted in both the balance and lifetime earnings.
    pub fn credit_earnings(mut self, amount: u64, now: i64) -> Self {
        self.coins = self.coins.saturating_add(amount);
        self.total_earnings = self.total_earnings.saturating_add(amount);
        self.updated_at = now;
        self
    }

    pub fn debit(mut self, amount: u64, now: i64) -> Result<Self, EconomyError> {
        if amount > self.coins {
            return Err(EconomyError::InsufficientBalance {
                requested: amount,
                available: self.coins,
            });
        }
        self.coins -= amount;
        self.updated_at = now;
        Ok(self)
    }

    /// Returns coins without counting them as earnings.
    pub fn refund(mut self, amount: u64, now: i64) -> Self {
        self.coins = self.coins.saturating_add(amount);
        self.updated_at = now;
        self
    }

    pub fn apply_tier(mut self, tier: Tier, now: i64) -> Result<Self, EconomyError> {
        if !tier.is_paid() {
            return Err(EconomyError::InvalidTier(tier));
        }
        self.tier = tier;
        self.vip_expiry = Some(now + tier.config().duration_days * MS_PER_DAY);
        self.updated_at = now;
        Ok(self)
    }

    pub fn set_banned(mut self, banned: bool, now: i64) -> Self {
        self.banned = banned;
        self.updated_at = now;
        self
    }
}

/// User as returned to the app, with tier-derived values resolved from the registry.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub vip_active: bool,
    pub multiplier: f64,
    pub withdraw_limit: u32,
    pub min_withdrawal: u64,
    pub referral_boost: f64,
    pub badge: &'static str,
}

impl UserProfile {
    pub fn new(user: User, now: i64) -> Self {
        let config = user.tier_config();
        UserProfile {
            vip_active: user.is_vip_active(now),
            multiplier: config.farming_multiplier,
            withdraw_limit: config.daily_withdrawals,
            min_withdrawal: config.min_withdrawal,
            referral_boost: config.referral_multiplier,
            badge: config.badge,
            user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(id: &str) -> NewUser {
        NewUser {
            id: id.to_string(),
            username: Some("farmer".to_string()),
            first_name: None,
            last_name: None,
            referral_code: None,
        }
    }

    #[test]
    fn test_new_user_starts_free() {
        let user = User::new(&identity("42"), DEFAULT_FARMING_RATE, 1_000);
        assert_eq!(user.tier, Tier::Free);
        assert_eq!(user.coins, 0);
        assert_eq!(user.referral_code, referral_code_for("42"));
        assert_eq!(user.referral_code.len(), 10);
    }

    #[test]
    fn test_legacy_fields_are_folded() {
        let user: User = serde_json::from_value(json!({
            "userId": "7",
            "coins": 500,
            "vip_tier": "diamond",
            "vipExpiry": 99_000,
            "farmingRate": 2.0,
            "claimedDays": [1, 2],
        }))
        .unwrap();

        assert_eq!(user.id, "7");
        assert_eq!(user.tier, Tier::Diamond);
        assert_eq!(user.vip_expiry, Some(99_000));
        assert_eq!(user.farming_rate, 2.0);
        assert_eq!(user.claimed_days, vec![1, 2]);
    }

    #[test]
    fn test_canonical_tier_wins_over_legacy() {
        let user: User = serde_json::from_value(json!({
            "id": "7",
            "tier": "bronze",
            "vip_tier": "diamond",
            "vip_expiry": 5,
            "vipExpiry": 6,
        }))
        .unwrap();

        assert_eq!(user.tier, Tier::Bronze);
        assert_eq!(user.vip_expiry, Some(5));

        let stored = serde_json::to_value(&user).unwrap();
        assert!(stored.get("vip_tier").is_none());
        assert!(stored.get("vipExpiry").is_none());
    }

    #[test]
    fn test_debit_rejects_overdraft() {
        let user = User::new(&identity("1"), 1.0, 0).credit_earnings(100, 0);
        let error = user.clone().debit(101, 0).unwrap_err();
        assert_eq!(
            error,
            EconomyError::InsufficientBalance {
                requested: 101,
                available: 100
            }
        );
        assert_eq!(user.debit(100, 0).unwrap().coins, 0);
    }

    #[test]
    fn test_apply_tier_sets_expiry() {
        let user = User::new(&identity("1"), 1.0, 0)
            .apply_tier(Tier::Bronze, 1_000)
            .unwrap();
        assert_eq!(user.vip_expiry, Some(1_000 + 30 * MS_PER_DAY));
        assert!(user.is_vip_active(1_000));
        assert!(!user.is_vip_active(1_000 + 30 * MS_PER_DAY));

        let error = user.apply_tier(Tier::Free, 0).unwrap_err();
        assert_eq!(error, EconomyError::InvalidTier(Tier::Free));
    }

    #[test]
    fn test_expired_vip_drops_to_free() {
        let user = User::new(&identity("1"), 1.0, 0)
            .apply_tier(Tier::Diamond, 0)
            .unwrap();
        let still_vip = user.clone().expire_vip(MS_PER_DAY);
        assert_eq!(still_vip.tier, Tier::Diamond);

        let expired = user.expire_vip(31 * MS_PER_DAY);
        assert_eq!(expired.tier, Tier::Free);
        assert_eq!(expired.vip_expiry, None);
    }

    #[test]
    fn test_profile_derives_from_registry() {
        let user = User::new(&identity("1"), 1.0, 0)
            .apply_tier(Tier::Diamond, 0)
            .unwrap();
        let profile = UserProfile::new(user, 1);
        assert!(profile.vip_active);
        assert_eq!(profile.multiplier, 2.5);
        assert_eq!(profile.withdraw_limit, 10);

        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["tier"], "diamond");
        assert_eq!(value["multiplier"], 2.5);
    }
}
