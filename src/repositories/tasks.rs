use std::sync::Arc;

use serde_json::{Map, Value};

use crate::models::tasks::{Task, UserTaskState};
use crate::repositories::store::{get_as, list_as, set_as, RemoteStore};

#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn RemoteStore>,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn save_task(&self, task: &Task) -> Result<(), anyhow::Error> {
        set_as(self.store.as_ref(), &format!("tasks/{}", task.id), task).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, anyhow::Error> {
        get_as(self.store.as_ref(), &format!("tasks/{}", id)).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, anyhow::Error> {
        let mut tasks: Vec<Task> = list_as(self.store.as_ref(), "tasks").await?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    pub async fn get_user_task(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<UserTaskState, anyhow::Error> {
        let state = get_as(
            self.store.as_ref(),
            &format!("userTasks/{}/{}", user_id, task_id),
        )
        .await?;
        Ok(state.unwrap_or_default())
    }

    pub async fn get_user_tasks(
        &self,
        user_id: &str,
    ) -> Result<Map<String, Value>, anyhow::Error> {
        match self.store.get(&format!("userTasks/{}", user_id)).await? {
            Some(Value::Object(states)) => Ok(states),
            _ => Ok(Map::new()),
        }
    }

    /// Merges the two flags so concurrent verify/claim writes do not clobber other fields.
    pub async fn save_user_task(
        &self,
        user_id: &str,
        task_id: &str,
        state: UserTaskState,
    ) -> Result<(), anyhow::Error> {
        let mut fields = Map::new();
        fields.insert("completed".to_string(), Value::Bool(state.completed));
        fields.insert("verified".to_string(), Value::Bool(state.verified));

        self.store
            .update(&format!("userTasks/{}/{}", user_id, task_id), fields)
            .await
    }
}
