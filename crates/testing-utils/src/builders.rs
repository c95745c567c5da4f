//! Builders for executions and configurable test tasks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use taskloop_domain::entities::{Execution, TaskInstance};
use taskloop_domain::task::handlers::{OnFailureRetryLater, ReviveDeadExecution};
use taskloop_domain::task::{
    CompletionHandler, DeadExecutionHandler, ExecutableTask, ExecutionComplete, ExecutionContext,
    ExecutionOperations, FailureHandler,
};
use taskloop_errors::{SchedulerError, SchedulerResult};

/// Builder for execution records in arbitrary states
pub struct ExecutionBuilder {
    task_name: String,
    instance_id: String,
    data: Option<Vec<u8>>,
    execution_time: DateTime<Utc>,
    picked: bool,
    picked_by: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    consecutive_failures: i32,
    version: i64,
}

impl ExecutionBuilder {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            instance_id: Uuid::new_v4().to_string(),
            data: None,
            execution_time: Utc::now(),
            picked: false,
            picked_by: None,
            last_heartbeat: None,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            version: 1,
        }
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn execution_time(mut self, execution_time: DateTime<Utc>) -> Self {
        self.execution_time = execution_time;
        self
    }

    /// Mark the execution as held by `node` with the given heartbeat.
    pub fn picked_by(mut self, node: impl Into<String>, last_heartbeat: DateTime<Utc>) -> Self {
        self.picked = true;
        self.picked_by = Some(node.into());
        self.last_heartbeat = Some(last_heartbeat);
        self
    }

    pub fn consecutive_failures(mut self, failures: i32) -> Self {
        self.consecutive_failures = failures;
        self
    }

    pub fn last_failure(mut self, at: DateTime<Utc>) -> Self {
        self.last_failure = Some(at);
        self
    }

    pub fn version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn build(self) -> Execution {
        Execution {
            task_instance: TaskInstance {
                task_name: self.task_name,
                instance_id: self.instance_id,
                data: self.data,
            },
            execution_time: self.execution_time,
            picked: self.picked,
            picked_by: self.picked_by,
            last_heartbeat: self.last_heartbeat,
            last_success: self.last_success,
            last_failure: self.last_failure,
            consecutive_failures: self.consecutive_failures,
            version: self.version,
        }
    }
}

/// Completion handler that removes the execution, counting invocations
struct CountingRemoveHandler {
    completions: Arc<AtomicU64>,
}

#[async_trait]
impl CompletionHandler for CountingRemoveHandler {
    async fn complete(
        &self,
        _completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()> {
        ops.remove().await?;
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Configurable one-shot task for scheduler tests
///
/// Records every instance it executed, optionally sleeps to simulate slow
/// work and optionally fails. Completion removes the execution.
pub struct TestTask {
    name: String,
    executed: Arc<Mutex<Vec<TaskInstance>>>,
    completions: Arc<AtomicU64>,
    sleep: Option<Duration>,
    fail_with: Option<String>,
    failure_handler: Box<dyn FailureHandler>,
    dead_execution_handler: Box<dyn DeadExecutionHandler>,
}

impl TestTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executed: Arc::new(Mutex::new(Vec::new())),
            completions: Arc::new(AtomicU64::new(0)),
            sleep: None,
            fail_with: None,
            failure_handler: Box::new(OnFailureRetryLater::new(Duration::from_secs(300))),
            dead_execution_handler: Box::new(ReviveDeadExecution),
        }
    }

    /// Simulate slow work by sleeping inside the task body.
    pub fn sleeping(mut self, duration: Duration) -> Self {
        self.sleep = Some(duration);
        self
    }

    /// Make every execution fail with the given message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn with_failure_handler(mut self, handler: Box<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn with_dead_execution_handler(mut self, handler: Box<dyn DeadExecutionHandler>) -> Self {
        self.dead_execution_handler = handler;
        self
    }

    /// Instances executed so far, in execution order.
    pub fn executed_instances(&self) -> Vec<TaskInstance> {
        self.executed.lock().unwrap().clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    /// Number of executions whose completion handler ran to the end.
    pub fn completion_count(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutableTask for TestTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        instance: TaskInstance,
        _ctx: ExecutionContext,
    ) -> SchedulerResult<Box<dyn CompletionHandler>> {
        if let Some(sleep) = self.sleep {
            tokio::time::sleep(sleep).await;
        }
        self.executed.lock().unwrap().push(instance);
        if let Some(message) = &self.fail_with {
            return Err(SchedulerError::task_execution_error(message.clone()));
        }
        Ok(Box::new(CountingRemoveHandler {
            completions: self.completions.clone(),
        }))
    }

    fn failure_handler(&self) -> &dyn FailureHandler {
        self.failure_handler.as_ref()
    }

    fn dead_execution_handler(&self) -> &dyn DeadExecutionHandler {
        self.dead_execution_handler.as_ref()
    }
}
