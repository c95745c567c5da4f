//! 任务模型
//!
//! `ExecutableTask` 是用户代码的入口：任务体返回的 `CompletionHandler`
//! 决定执行完成后的处置，任务体失败路由到 `FailureHandler`，心跳超时的
//! 执行交由 `DeadExecutionHandler` 恢复。处理器通过 `ExecutionOperations`
//! 访问限定在单条执行上的存储能力，而不是整个仓储。

pub mod handlers;
pub mod schedule;
pub mod stock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::entities::{Execution, TaskInstance};
use crate::repositories::ExecutionRepository;
use crate::services::SchedulerStateView;
use taskloop_errors::SchedulerResult;

/// 执行上下文，随任务体传入
#[derive(Clone)]
pub struct ExecutionContext {
    execution: Execution,
    scheduler_name: String,
    state: Arc<dyn SchedulerStateView>,
}

impl ExecutionContext {
    pub fn new(
        execution: Execution,
        scheduler_name: String,
        state: Arc<dyn SchedulerStateView>,
    ) -> Self {
        Self {
            execution,
            scheduler_name,
            state,
        }
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    /// 长任务应周期性检查该标志，在优雅关闭时尽快让出
    pub fn is_shutting_down(&self) -> bool {
        self.state.is_shutting_down()
    }
}

/// 执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Ok,
    Failure(String),
}

/// 一次执行的完成事件，带起止时间
#[derive(Debug, Clone)]
pub struct ExecutionComplete {
    pub execution: Execution,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: ExecutionResult,
}

impl ExecutionComplete {
    pub fn success(
        execution: Execution,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution,
            started_at,
            finished_at,
            result: ExecutionResult::Ok,
        }
    }

    pub fn failure(
        execution: Execution,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            execution,
            started_at,
            finished_at,
            result: ExecutionResult::Failure(cause.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ExecutionResult::Ok)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// 限定在单条执行上的存储操作能力
///
/// 处理器拿到的是该执行被锁定时的快照，版本检查保证不会覆盖并发变更。
pub struct ExecutionOperations {
    repository: Arc<dyn ExecutionRepository>,
    execution: Execution,
}

impl ExecutionOperations {
    pub fn new(repository: Arc<dyn ExecutionRepository>, execution: Execution) -> Self {
        Self {
            repository,
            execution,
        }
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// 删除执行记录并释放锁
    pub async fn remove(&self) -> SchedulerResult<()> {
        self.repository.remove(&self.execution).await
    }

    /// 按本次结果重排下一次执行
    ///
    /// 成功时清零连续失败计数并记录成功时间，失败时递增计数并记录失败时间。
    pub async fn reschedule(
        &self,
        completed: &ExecutionComplete,
        next_execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        match completed.result {
            ExecutionResult::Ok => {
                self.repository
                    .reschedule(
                        &self.execution,
                        next_execution_time,
                        Some(completed.finished_at),
                        self.execution.last_failure,
                        0,
                    )
                    .await
            }
            ExecutionResult::Failure(_) => {
                self.repository
                    .reschedule(
                        &self.execution,
                        next_execution_time,
                        self.execution.last_success,
                        Some(completed.finished_at),
                        self.execution.consecutive_failures + 1,
                    )
                    .await
            }
        }
    }
}

#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn complete(
        &self,
        completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()>;
}

#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn on_failure(
        &self,
        completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()>;
}

#[async_trait]
pub trait DeadExecutionHandler: Send + Sync {
    async fn dead_execution(
        &self,
        execution: Execution,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()>;
}

/// 可执行任务，按名称从注册表解析
#[async_trait]
pub trait ExecutableTask: Send + Sync {
    fn name(&self) -> &str;

    /// 任务体。返回的 `CompletionHandler` 决定执行完成后的处置
    async fn execute(
        &self,
        instance: TaskInstance,
        ctx: ExecutionContext,
    ) -> SchedulerResult<Box<dyn CompletionHandler>>;

    fn failure_handler(&self) -> &dyn FailureHandler;

    fn dead_execution_handler(&self) -> &dyn DeadExecutionHandler;
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingRepository;
    use super::*;
    use chrono::Duration;

    fn execution_with_history() -> Execution {
        let mut execution = Execution::new(TaskInstance::new("billing", "customer-1"), Utc::now());
        execution.consecutive_failures = 2;
        execution.last_success = Some(Utc::now() - Duration::hours(1));
        execution.last_failure = Some(Utc::now() - Duration::minutes(5));
        execution
    }

    #[tokio::test]
    async fn test_reschedule_on_success_resets_failure_counter() {
        let repository = Arc::new(RecordingRepository::default());
        let execution = execution_with_history();
        let ops = ExecutionOperations::new(repository.clone(), execution.clone());

        let started = Utc::now();
        let finished = started + Duration::seconds(3);
        let completed = ExecutionComplete::success(execution.clone(), started, finished);
        let next = finished + Duration::hours(1);
        ops.reschedule(&completed, next).await.unwrap();

        let calls = repository.rescheduled.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].next_execution_time, next);
        assert_eq!(calls[0].last_success, Some(finished));
        assert_eq!(calls[0].last_failure, execution.last_failure);
        assert_eq!(calls[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_reschedule_on_failure_increments_failure_counter() {
        let repository = Arc::new(RecordingRepository::default());
        let execution = execution_with_history();
        let ops = ExecutionOperations::new(repository.clone(), execution.clone());

        let started = Utc::now();
        let finished = started + Duration::seconds(3);
        let completed =
            ExecutionComplete::failure(execution.clone(), started, finished, "connection refused");
        ops.reschedule(&completed, finished + Duration::minutes(5))
            .await
            .unwrap();

        let calls = repository.rescheduled.lock().unwrap();
        assert_eq!(calls[0].last_success, execution.last_success);
        assert_eq!(calls[0].last_failure, Some(finished));
        assert_eq!(calls[0].consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_remove_releases_execution() {
        let repository = Arc::new(RecordingRepository::default());
        let execution = execution_with_history();
        let ops = ExecutionOperations::new(repository.clone(), execution.clone());

        ops.remove().await.unwrap();

        assert_eq!(*repository.removed.lock().unwrap(), vec![execution.id()]);
    }

    #[test]
    fn test_execution_complete_duration() {
        let execution = execution_with_history();
        let started = Utc::now();
        let finished = started + Duration::milliseconds(1500);
        let completed = ExecutionComplete::success(execution, started, finished);
        assert!(completed.is_success());
        assert_eq!(completed.duration(), Duration::milliseconds(1500));
    }
}
