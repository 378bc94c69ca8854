use serde::Serialize;

use crate::errors::EconomyError;
use crate::models::users::User;

pub const CALENDAR_DAYS: u8 = 7;

/// Amounts for the seven calendar slots: `base_coins + (day - 1) * step_coins`,
/// plus `final_day_stars` on the last day.
#[derive(Clone, Copy, Debug)]
pub struct RewardSchedule {
    pub base_coins: u64,
    pub step_coins: u64,
    pub final_day_stars: u64,
}

/// Claim timing: `cooldown_ms` between claims, and after `streak_grace_ms`
/// without a claim the calendar and streak start over.
#[derive(Clone, Copy, Debug)]
pub struct StreakRules {
    pub cooldown_ms: i64,
    pub streak_grace_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyReward {
    pub day: u8,
    pub coins: u64,
    pub stars: u64,
    pub claimed: bool,
}

#[derive(Debug, Serialize)]
pub struct RewardCalendar {
    pub days: Vec<DailyReward>,
    pub next_day: u8,
    pub claim_available: bool,
    pub next_claim_at: Option<i64>,
    pub claim_streak: u32,
}

#[derive(Debug)]
pub struct DailyClaim {
    pub user: User,
    pub reward: DailyReward,
    pub vip_bonus: u64,
}

impl RewardSchedule {
    pub fn reward(&self, day: u8) -> Result<DailyReward, EconomyError> {
        if !(1..=CALENDAR_DAYS).contains(&day) {
            return Err(EconomyError::InvalidDay(day));
        }
        Ok(DailyReward {
            day,
            coins: self.base_coins + u64::from(day - 1) * self.step_coins,
            stars: if day == CALENDAR_DAYS {
                self.final_day_stars
            } else {
                0
            },
            claimed: false,
        })
    }

    pub fn calendar(&self, user: &User, rules: &StreakRules, now: i64) -> RewardCalendar {
        let user = rollover(user.clone(), rules, now);
        let days = (1..=CALENDAR_DAYS)
            .filter_map(|day| self.reward(day).ok())
            .map(|mut reward| {
                reward.claimed = user.claimed_days.contains(&reward.day);
                reward
            })
            .collect();

        RewardCalendar {
            days,
            next_day: next_claimable_day(&user),
            claim_available: is_claim_available(&user, rules, now),
            next_claim_at: user.last_claim_at.map(|at| at + rules.cooldown_ms),
            claim_streak: user.claim_streak,
        }
    }
}

pub fn is_claim_available(user: &User, rules: &StreakRules, now: i64) -> bool {
    match user.last_claim_at {
        Some(last) => now - last >= rules.cooldown_ms,
        None => true,
    }
}

/// Lowest-numbered day not yet claimed in the current cycle.
pub fn next_claimable_day(user: &User) -> u8 {
    (1..=CALENDAR_DAYS)
        .find(|day| !user.claimed_days.contains(day))
        .unwrap_or(1)
}

/// Starts a new cycle when the streak lapsed or the previous cycle is complete
/// and claimable again.
fn rollover(mut user: User, rules: &StreakRules, now: i64) -> User {
    let Some(last) = user.last_claim_at else {
        return user;
    };

    if now - last >= rules.streak_grace_ms {
        user.claimed_days.clear();
        user.claim_streak = 0;
    } else if user.claimed_days.len() >= usize::from(CALENDAR_DAYS)
        && now - last >= rules.cooldown_ms
    {
        user.claimed_days.clear();
    }
    user
}

pub fn claim_daily_reward(
    user: User,
    day: u8,
    schedule: &RewardSchedule,
    rules: &StreakRules,
    now: i64,
) -> Result<DailyClaim, EconomyError> {
    user.ensure_active()?;
    let mut reward = schedule.reward(day)?;

    if let Some(last) = user.last_claim_at {
        let elapsed = now - last;
        if elapsed < rules.cooldown_ms {
            return Err(EconomyError::CooldownActive {
                remaining_ms: rules.cooldown_ms - elapsed,
            });
        }
    }

    let mut user = rollover(user, rules, now);
    let expected = next_claimable_day(&user);
    if day != expected {
        return Err(EconomyError::OutOfOrderClaim {
            expected,
            requested: day,
        });
    }

    let vip_bonus = if user.is_vip_active(now) {
        let bonus = reward.coins as f64 * (user.tier_config().farming_multiplier - 1.0);
        bonus.floor().max(0.0) as u64
    } else {
        0
    };

    user = user.credit_earnings(reward.coins + vip_bonus, now);
    user.stars = user.stars.saturating_add(reward.stars);
    user.claim_streak += 1;
    user.claimed_days.push(day);
    user.last_claim_at = Some(now);
    reward.claimed = true;

    Ok(DailyClaim {
        user,
        reward,
        vip_bonus,
    })
}
