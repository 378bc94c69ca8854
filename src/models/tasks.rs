use serde::{Deserialize, Serialize};

use crate::errors::EconomyError;
use crate::models::users::User;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Daily,
    Weekly,
    Special,
    Youtube,
    ChannelJoin,
    GroupJoin,
    Link,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    #[default]
    Auto,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub kind: TaskKind,
    pub reward: u64,
    #[serde(default)]
    pub verification: Verification,
    pub url: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: i64,
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub kind: TaskKind,
    pub reward: u64,
    #[serde(default)]
    pub verification: Verification,
    pub url: Option<String>,
}

/// Per-user flags at `userTasks/{user_id}/{task_id}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserTaskState {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub completed: bool,
    pub verified: bool,
}

impl Task {
    pub fn new(task: NewTask, id: String, now: i64) -> Self {
        Task {
            id,
            title: task.title,
            kind: task.kind,
            reward: task.reward,
            verification: task.verification,
            url: task.url,
            active: true,
            created_at: now,
        }
    }

    /// Recorded once the user has opened the task's link.
    pub fn verify(&self, state: UserTaskState) -> Result<UserTaskState, EconomyError> {
        if !self.active {
            return Err(EconomyError::TaskInactive(self.id.clone()));
        }
        Ok(UserTaskState {
            verified: true,
            ..state
        })
    }

    pub fn claim(
        &self,
        user: User,
        state: UserTaskState,
        now: i64,
    ) -> Result<(User, UserTaskState), EconomyError> {
        user.ensure_active()?;
        if !self.active {
            return Err(EconomyError::TaskInactive(self.id.clone()));
        }
        if state.completed {
            return Err(EconomyError::TaskAlreadyCompleted(self.id.clone()));
        }
        if self.verification == Verification::Manual && !state.verified {
            return Err(EconomyError::TaskNotVerified(self.id.clone()));
        }

        let user = user.credit_earnings(self.reward, now);
        Ok((
            user,
            UserTaskState {
                completed: true,
                ..state
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::NewUser;

    fn user() -> User {
        let identity = NewUser {
            id: "u1".to_string(),
            username: None,
            first_name: None,
            last_name: None,
            referral_code: None,
        };
        User::new(&identity, 1.0, 0)
    }

    fn task(verification: Verification) -> Task {
        Task::new(
            NewTask {
                title: "Join channel".to_string(),
                kind: TaskKind::ChannelJoin,
                reward: 250,
                verification,
                url: Some("https://t.me/example".to_string()),
            },
            "t1".to_string(),
            0,
        )
    }

    #[test]
    fn test_auto_task_claims_directly() {
        let (user, state) = task(Verification::Auto)
            .claim(user(), UserTaskState::default(), 1)
            .unwrap();
        assert_eq!(user.coins, 250);
        assert_eq!(user.total_earnings, 250);
        assert!(state.completed);
    }

    #[test]
    fn test_manual_task_requires_verification() {
        let task = task(Verification::Manual);
        let error = task
            .claim(user(), UserTaskState::default(), 1)
            .unwrap_err();
        assert_eq!(error, EconomyError::TaskNotVerified("t1".to_string()));

        let state = task.verify(UserTaskState::default()).unwrap();
        let (user, state) = task.claim(user(), state, 1).unwrap();
        assert_eq!(user.coins, 250);
        assert!(state.completed && state.verified);
    }

    #[test]
    fn test_task_claimed_once() {
        let task = task(Verification::Auto);
        let (user, state) = task.claim(user(), UserTaskState::default(), 1).unwrap();
        let error = task.claim(user, state, 2).unwrap_err();
        assert_eq!(error, EconomyError::TaskAlreadyCompleted("t1".to_string()));
    }

    #[test]
    fn test_inactive_task_rejected() {
        let mut task = task(Verification::Auto);
        task.active = false;
        assert!(matches!(
            task.claim(user(), UserTaskState::default(), 1),
            Err(EconomyError::TaskInactive(_))
        ));
    }
}
