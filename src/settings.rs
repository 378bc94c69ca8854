use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::rewards::{RewardSchedule, StreakRules};
use crate::utils::time::{MS_PER_HOUR, MS_PER_SECOND};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Store {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub listen_for_changes: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    pub listen: String,
    /// Key for `/admin` routes; unset keeps them closed.
    pub admin_api_key: Option<String>,
    /// Shared secret of the payment bot confirming Stars charges; unset keeps that route closed.
    pub payment_secret: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Farming {
    pub default_rate: f64,
    pub fast_tick_ms: u64,
    pub slow_tick_ms: u64,
    pub min_elapsed_secs: i64,
    pub session_dir: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Economy {
    pub referral_commission_bps: u64,
    pub referral_signup_bonus: u64,
    pub daily_base_coins: u64,
    pub daily_step_coins: u64,
    pub daily_final_stars: u64,
    pub claim_cooldown_hours: i64,
    pub streak_grace_hours: i64,
    pub refund_rejected_withdrawals: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub store: Store,
    pub http: Http,
    pub farming: Farming,
    pub economy: Economy,
}

impl Farming {
    pub fn min_elapsed_ms(&self) -> i64 {
        self.min_elapsed_secs * MS_PER_SECOND
    }
}

impl Economy {
    pub fn reward_schedule(&self) -> RewardSchedule {
        RewardSchedule {
            base_coins: self.daily_base_coins,
            step_coins: self.daily_step_coins,
            final_day_stars: self.daily_final_stars,
        }
    }

    pub fn streak_rules(&self) -> StreakRules {
        StreakRules {
            cooldown_ms: self.claim_cooldown_hours * MS_PER_HOUR,
            streak_grace_ms: self.streak_grace_hours * MS_PER_HOUR,
        }
    }
}

impl Settings {
    /// Built-in defaults, then the TOML file at `path` (optional), then
    /// `COINFARM__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("COINFARM").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("store.backend", "memory")?
            .set_default("store.max_connections", 5)?
            .set_default("store.listen_for_changes", true)?
            .set_default("http.listen", "0.0.0.0:8080")?
            .set_default("farming.default_rate", 1.0)?
            .set_default("farming.fast_tick_ms", 1_000)?
            .set_default("farming.slow_tick_ms", 10_000)?
            .set_default("farming.min_elapsed_secs", 6)?
            .set_default("economy.referral_commission_bps", 1_000)?
            .set_default("economy.referral_signup_bonus", 500)?
            .set_default("economy.daily_base_coins", 50)?
            .set_default("economy.daily_step_coins", 50)?
            .set_default("economy.daily_final_stars", 5)?
            .set_default("economy.claim_cooldown_hours", 24)?
            .set_default("economy.streak_grace_hours", 48)?
            .set_default("economy.refund_rejected_withdrawals", true)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::builder()
            .and_then(|builder| builder.build())
            .and_then(|config| config.try_deserialize())
            .expect("default settings")
    }
}
