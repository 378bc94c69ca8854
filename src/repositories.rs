pub mod referrals;
pub mod sessions;
pub mod store;
pub mod tasks;
pub mod users;
pub mod vip;
pub mod withdrawals;
