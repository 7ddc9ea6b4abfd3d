//! Contract between the pipeline stages and the task scheduler running them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::DBError;

/// Identifier of a task, allocated by the scheduler.
pub type TaskId = u64;

/// Ownership probe handed to a running task. Returns `false` once another
/// machine took the task over.
pub type StillOwned<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Creates a new task and lets the caller bind it to a unit of work.
///
/// The closure receives the id of the new task and returns whether the task
/// should be kept. When it returns `false` the scheduler discards the task and
/// `None` is returned.
pub type AddTaskFn = Arc<
    dyn Fn(&mut dyn FnMut(TaskId) -> Result<bool, DBError>) -> Result<Option<TaskId>, DBError>
        + Send
        + Sync,
>;

/// Resources a task claims on the machine running it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resources {
    pub cpu: u32,
    pub gpu: f64,
    /// RAM in bytes.
    pub ram: u64,
    /// Sealing storage in bytes.
    pub storage: u64,
}

/// Static description of a task type.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTypeDetails {
    /// Maximum number of concurrent tasks on a machine, 0 means no limit.
    pub max: usize,
    pub name: &'static str,
    pub cost: Resources,
    /// Failed attempts after which the task is abandoned.
    pub max_failures: u32,
    /// Task types whose completion creates tasks of this type.
    pub follows: Vec<&'static str>,
}

#[async_trait]
pub trait TaskInterface: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the task to completion. `Ok(true)` means the task is done and
    /// its results are committed.
    async fn do_task(&self, task_id: TaskId, still_owned: StillOwned<'_>)
        -> Result<bool, Self::Error>;

    /// Picks the task to run among the ones offered by the scheduler.
    fn can_accept(&self, ids: &[TaskId]) -> Option<TaskId>;

    fn type_details(&self) -> TaskTypeDetails;

    /// Hands over the function creating tasks of this type.
    fn adder(&self, add_task: AddTaskFn);
}
