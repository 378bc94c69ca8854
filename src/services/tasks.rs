use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::referrals::ReferralRequest;
use super::{load_user, RequestHandler, Service, ServiceError};
use crate::errors::EconomyError;
use crate::models::tasks::{NewTask, Task, TaskView, UserTaskState};
use crate::models::users::UserProfile;
use crate::repositories::store::{RemoteStore, StoreEvent, Subscription};
use crate::repositories::tasks::TaskRepository;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::utils::locks::KeyLocks;
use crate::utils::time::TimeProvider;

pub enum TaskRequest {
    List {
        user_id: Option<String>,
        response: oneshot::Sender<Result<Vec<TaskView>, ServiceError>>,
    },
    Create {
        task: NewTask,
        response: oneshot::Sender<Result<Task, ServiceError>>,
    },
    Verify {
        user_id: String,
        task_id: String,
        response: oneshot::Sender<Result<UserTaskState, ServiceError>>,
    },
    Claim {
        user_id: String,
        task_id: String,
        response: oneshot::Sender<Result<UserProfile, ServiceError>>,
    },
}

/// Cached task list. Any write under `tasks/`, from this process or another,
/// bumps `generation` and drops the cached list.
#[derive(Default)]
struct Catalog {
    generation: u64,
    tasks: Option<Vec<Task>>,
}

impl Catalog {
    fn invalidate(&mut self) {
        self.generation += 1;
        self.tasks = None;
    }
}

#[derive(Clone)]
pub struct TaskRequestHandler {
    repository: TaskRepository,
    users: UserRepository,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
    referral_tx: mpsc::Sender<ReferralRequest>,
    catalog: Arc<Mutex<Catalog>>,
    _catalog_watch: Arc<Subscription>,
}

impl TaskRequestHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        locks: KeyLocks,
        clock: Arc<dyn TimeProvider>,
        referral_tx: mpsc::Sender<ReferralRequest>,
    ) -> Self {
        let catalog = Arc::new(Mutex::new(Catalog::default()));
        let watched = catalog.clone();
        let watch = store.subscribe(
            "tasks",
            Arc::new(move |_: StoreEvent| {
                if let Ok(mut catalog) = watched.lock() {
                    catalog.invalidate();
                }
            }),
        );

        Self {
            repository: TaskRepository::new(store.clone()),
            users: UserRepository::new(store),
            locks,
            clock,
            referral_tx,
            catalog,
            _catalog_watch: Arc::new(watch),
        }
    }

    async fn all_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        let generation = match self.catalog.lock() {
            Ok(catalog) => {
                if let Some(tasks) = &catalog.tasks {
                    return Ok(tasks.clone());
                }
                catalog.generation
            }
            Err(_) => u64::MAX,
        };

        let tasks = self
            .repository
            .list_tasks()
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;

        if let Ok(mut catalog) = self.catalog.lock() {
            // A write that landed while loading makes this list stale.
            if catalog.generation == generation {
                catalog.tasks = Some(tasks.clone());
            }
        }
        Ok(tasks)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, ServiceError> {
        self.repository
            .get_task(task_id)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?
            .ok_or_else(|| EconomyError::NotFound("task", task_id.to_string()).into())
    }

    /// Active tasks, with the caller's progress when a user is given.
    async fn list_tasks(&self, user_id: Option<&str>) -> Result<Vec<TaskView>, ServiceError> {
        let tasks = self.all_tasks().await?;

        let states = match user_id {
            Some(user_id) => self
                .repository
                .get_user_tasks(user_id)
                .await
                .map_err(|e| ServiceError::repository("Tasks", e))?,
            None => Default::default(),
        };

        Ok(tasks
            .into_iter()
            .filter(|task| task.active)
            .map(|task| {
                let state: UserTaskState = states
                    .get(&task.id)
                    .and_then(|state| serde_json::from_value(state.clone()).ok())
                    .unwrap_or_default();
                TaskView {
                    task,
                    completed: state.completed,
                    verified: state.verified,
                }
            })
            .collect())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, ServiceError> {
        let task = Task::new(
            task,
            Uuid::new_v4().hyphenated().to_string(),
            self.clock.now_millis(),
        );
        self.repository
            .save_task(&task)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;
        if let Ok(mut catalog) = self.catalog.lock() {
            catalog.invalidate();
        }

        log::info!("Created task {} ({:?}, {} coins)", task.id, task.kind, task.reward);
        Ok(task)
    }

    async fn verify_task(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<UserTaskState, ServiceError> {
        let _user = self.locks.lock_user(user_id).await;
        let task = self.get_task(task_id).await?;
        load_user(&self.users, "Tasks", user_id)
            .await?
            .ensure_active()?;

        let current = self
            .repository
            .get_user_task(user_id, task_id)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;
        let state = task.verify(current)?;

        self.repository
            .save_user_task(user_id, task_id, state)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;
        Ok(state)
    }

    async fn claim_task(&self, user_id: &str, task_id: &str) -> Result<UserProfile, ServiceError> {
        // Guards the per-user task flags too.
        let _user = self.locks.lock_user(user_id).await;
        let now = self.clock.now_millis();
        let task = self.get_task(task_id).await?;
        let user = load_user(&self.users, "Tasks", user_id).await?;
        let current = self
            .repository
            .get_user_task(user_id, task_id)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;

        let (user, state) = task.claim(user, current, now)?;

        // Flag first so a failed balance write cannot be claimed twice.
        self.repository
            .save_user_task(user_id, task_id, state)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;
        self.users
            .save_user(&user, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("Tasks", e))?;

        if task.reward > 0 {
            let request = ReferralRequest::CreditEarnings {
                referred_id: user_id.to_string(),
                earnings: task.reward,
            };
            if let Err(e) = self.referral_tx.send(request).await {
                log::error!("Failed to queue referral commission: {}", e);
            }
        }

        log::info!("User {} completed task {} (+{})", user_id, task_id, task.reward);
        Ok(UserProfile::new(user, now))
    }
}

#[async_trait]
impl RequestHandler<TaskRequest> for TaskRequestHandler {
    async fn handle_request(&self, request: TaskRequest) {
        match request {
            TaskRequest::List { user_id, response } => {
                let result = self.list_tasks(user_id.as_deref()).await;
                let _ = response.send(result);
            }
            TaskRequest::Create { task, response } => {
                let result = self.create_task(task).await;
                let _ = response.send(result);
            }
            TaskRequest::Verify {
                user_id,
                task_id,
                response,
            } => {
                let result = self.verify_task(&user_id, &task_id).await;
                let _ = response.send(result);
            }
            TaskRequest::Claim {
                user_id,
                task_id,
                response,
            } => {
                let result = self.claim_task(&user_id, &task_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct TaskService;

impl TaskService {
    pub fn new() -> Self {
        TaskService {}
    }
}

#[async_trait]
impl Service<TaskRequest, TaskRequestHandler> for TaskService {}
