pub mod farming;
pub mod referrals;
pub mod rewards;
pub mod status;
pub mod tasks;
pub mod tiers;
pub mod users;
pub mod vip;
pub mod withdrawals;
