use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::EconomyError;
use crate::models::users::User;
use crate::utils::time::MS_PER_MINUTE;

/// Shortest ticker period regardless of configuration.
pub const MIN_TICK: Duration = Duration::from_secs(1);

/// An open accrual period on one device.
///
/// `base_rate` (coins per minute) and `multiplier` are captured when the
/// session starts; later tier changes do not affect a running session.
/// `total_earned` is what the session has accrued so far and `synced_earned`
/// the part of it already written to the user record.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FarmingSession {
    pub device_id: String,
    pub user_id: String,
    pub start_time: i64,
    pub base_rate: f64,
    pub multiplier: f64,
    pub total_earned: u64,
    #[serde(default)]
    pub synced_earned: u64,
    pub last_tick: i64,
    pub active: bool,
}

#[derive(Debug, PartialEq)]
pub struct Accrual {
    pub session: FarmingSession,
    pub delta: u64,
}

impl FarmingSession {
    pub fn start(user: &User, device_id: &str, now: i64) -> Result<Self, EconomyError> {
        user.ensure_active()?;

        Ok(FarmingSession {
            device_id: device_id.to_string(),
            user_id: user.id.clone(),
            start_time: now,
            base_rate: user.farming_rate,
            multiplier: user.tier_config().farming_multiplier,
            total_earned: 0,
            synced_earned: 0,
            last_tick: now,
            active: true,
        })
    }

    /// `floor(elapsed_minutes * base_rate * multiplier)`, never negative.
    pub fn earned_at(&self, now: i64) -> u64 {
        let elapsed_ms = (now - self.start_time).max(0);
        let elapsed_minutes = elapsed_ms as f64 / MS_PER_MINUTE as f64;
        let earned = (elapsed_minutes * self.base_rate * self.multiplier).floor();

        if earned.is_finite() && earned > 0.0 {
            earned as u64
        } else {
            0
        }
    }

    /// Timer-driven accrual. Ticks closer than `min_elapsed_ms` to the start
    /// are ignored, and a `now` earlier than a previous tick yields no delta.
    pub fn accrue(&self, now: i64, min_elapsed_ms: i64) -> Result<Accrual, EconomyError> {
        if !self.active {
            return Err(EconomyError::SessionNotActive(self.device_id.clone()));
        }

        let mut session = self.clone();
        if now - self.start_time < min_elapsed_ms {
            return Ok(Accrual { session, delta: 0 });
        }

        let earned = self.earned_at(now);
        let delta = earned.saturating_sub(self.total_earned);
        session.total_earned = self.total_earned.max(earned);
        session.last_tick = self.last_tick.max(now);

        Ok(Accrual { session, delta })
    }

    /// Final accrual; the returned session is inactive.
    pub fn stop(&self, now: i64) -> Result<Accrual, EconomyError> {
        let mut accrual = self.accrue(now, 0)?;
        accrual.session.active = false;
        Ok(accrual)
    }

    /// Accrued coins not yet credited to the user record.
    pub fn unsynced(&self) -> u64 {
        self.total_earned.saturating_sub(self.synced_earned)
    }

    pub fn mark_synced(mut self) -> Self {
        self.synced_earned = self.total_earned;
        self
    }

    /// Credits `user` with the part of this session the user record does not
    /// hold yet and moves the device checkpoint along. Applying the same
    /// session state twice credits nothing the second time.
    pub fn credit_to(&self, mut user: User, now: i64) -> (User, u64) {
        let recorded = match user.farming_sync.get(&self.device_id) {
            Some(checkpoint) if checkpoint.start_time == self.start_time => {
                checkpoint.synced.max(self.synced_earned)
            }
            _ => self.synced_earned,
        };
        let credited = self.total_earned.saturating_sub(recorded);
        if credited == 0 {
            return (user, 0);
        }

        user.farming_sync.insert(
            self.device_id.clone(),
            SyncCheckpoint {
                start_time: self.start_time,
                synced: self.total_earned,
            },
        );
        (user.credit_earnings(credited, now), credited)
    }
}

/// Last session position written to a user record for one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncCheckpoint {
    pub start_time: i64,
    pub synced: u64,
}

/// Client-reported connection class, mirroring the browser's effective connection type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    #[default]
    #[serde(alias = "4g", alias = "wifi")]
    Fast,
    #[serde(alias = "3g")]
    Moderate,
    #[serde(alias = "2g", alias = "slow-2g")]
    Slow,
}

impl ConnectionQuality {
    pub fn tick_interval(&self, fast_ms: u64, slow_ms: u64) -> Duration {
        let millis = match self {
            ConnectionQuality::Fast => fast_ms,
            ConnectionQuality::Moderate => (fast_ms + slow_ms) / 2,
            ConnectionQuality::Slow => slow_ms,
        };
        Duration::from_millis(millis).max(MIN_TICK)
    }
}

/// Outcome of stopping a session.
#[derive(Debug, Serialize)]
pub struct FarmingSummary {
    pub session: FarmingSession,
    pub earned: u64,
    pub coins: u64,
    pub synced: bool,
}
