use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::EconomyError;

/// Lifecycle shared by withdrawal and VIP requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    /// Only `pending -> approved` and `pending -> rejected` are valid.
    pub fn transition(self, to: RequestStatus) -> Result<RequestStatus, EconomyError> {
        match (self, to) {
            (RequestStatus::Pending, RequestStatus::Approved)
            | (RequestStatus::Pending, RequestStatus::Rejected) => Ok(to),
            (from, to) => Err(EconomyError::InvalidTransition { from, to }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_can_be_decided() {
        assert_eq!(
            RequestStatus::Pending.transition(RequestStatus::Approved),
            Ok(RequestStatus::Approved)
        );
        assert_eq!(
            RequestStatus::Pending.transition(RequestStatus::Rejected),
            Ok(RequestStatus::Rejected)
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [RequestStatus::Approved, RequestStatus::Rejected] {
            for to in [
                RequestStatus::Pending,
                RequestStatus::Approved,
                RequestStatus::Rejected,
            ] {
                assert!(from.transition(to).is_err());
            }
        }
        assert!(RequestStatus::Pending
            .transition(RequestStatus::Pending)
            .is_err());
    }
}
