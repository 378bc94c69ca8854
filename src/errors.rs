use crate::models::{status::RequestStatus, tiers::Tier};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Rejections raised by the economy rules before any state is changed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EconomyError {
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("User is banned: {0}")]
    UserBanned(String),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },
    #[error("Amount {amount} is below the minimum withdrawal of {minimum}")]
    BelowMinimum { amount: u64, minimum: u64 },
    #[error("Daily withdrawal limit of {limit} reached")]
    DailyQuotaExceeded { limit: u32 },
    #[error("Daily reward available again in {remaining_ms} ms")]
    CooldownActive { remaining_ms: i64 },
    #[error("Day {requested} cannot be claimed before day {expected}")]
    OutOfOrderClaim { expected: u8, requested: u8 },
    #[error("Invalid reward day: {0}")]
    InvalidDay(u8),
    #[error("Farming session already active on device {0}")]
    SessionAlreadyActive(String),
    #[error("No active farming session on device {0}")]
    SessionNotActive(String),
    #[error("Earnings of the last session on device {0} are not synced yet")]
    PendingSync(String),
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("Tier {0} cannot be purchased")]
    InvalidTier(Tier),
    #[error("Task {0} must be verified before it can be claimed")]
    TaskNotVerified(String),
    #[error("Task {0} already completed")]
    TaskAlreadyCompleted(String),
    #[error("Task {0} is not active")]
    TaskInactive(String),
}

impl EconomyError {
    pub fn severity(&self) -> Severity {
        match self {
            EconomyError::CooldownActive { .. }
            | EconomyError::OutOfOrderClaim { .. }
            | EconomyError::SessionAlreadyActive(_)
            | EconomyError::SessionNotActive(_)
            | EconomyError::PendingSync(_)
            | EconomyError::TaskNotVerified(_)
            | EconomyError::TaskAlreadyCompleted(_) => Severity::Low,
            EconomyError::UserBanned(_) | EconomyError::InvalidTransition { .. } => Severity::High,
            _ => Severity::Medium,
        }
    }

    /// Whether the same request can succeed later without any change on the caller side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EconomyError::CooldownActive { .. }
                | EconomyError::DailyQuotaExceeded { .. }
                | EconomyError::PendingSync(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EconomyError::UserNotFound(_) | EconomyError::NotFound(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_is_retryable() {
        let error = EconomyError::CooldownActive { remaining_ms: 10 };
        assert!(error.is_retryable());
        assert_eq!(error.severity(), Severity::Low);
    }

    #[test]
    fn test_invalid_transition_message() {
        let error = EconomyError::InvalidTransition {
            from: RequestStatus::Approved,
            to: RequestStatus::Rejected,
        };
        assert_eq!(
            error.to_string(),
            "Invalid status transition: approved -> rejected"
        );
        assert!(!error.is_retryable());
        assert_eq!(error.severity(), Severity::High);
    }
}
