//! 常用的完成、失败与死亡执行处理器

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::schedule::Schedule;
use super::{
    CompletionHandler, DeadExecutionHandler, ExecutionComplete, ExecutionOperations, FailureHandler,
};
use crate::entities::Execution;
use taskloop_errors::SchedulerResult;

/// 完成后删除执行记录，适用于一次性任务
pub struct OnCompleteRemove;

#[async_trait]
impl CompletionHandler for OnCompleteRemove {
    async fn complete(
        &self,
        _completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()> {
        ops.remove().await
    }
}

/// 完成后按排期策略重排下一次执行
pub struct OnCompleteReschedule {
    schedule: Arc<dyn Schedule>,
}

impl OnCompleteReschedule {
    pub fn new(schedule: Arc<dyn Schedule>) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl CompletionHandler for OnCompleteReschedule {
    async fn complete(
        &self,
        completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()> {
        let next = self.schedule.next_execution_time(completed.finished_at);
        debug!("重排执行 {} 到 {}", completed.execution.id(), next);
        ops.reschedule(completed, next).await
    }
}

/// 失败后固定延迟重试
pub struct OnFailureRetryLater {
    sleep_duration: Duration,
}

impl OnFailureRetryLater {
    pub fn new(sleep_duration: Duration) -> Self {
        Self { sleep_duration }
    }

    fn retry_at(&self, finished_at: DateTime<Utc>) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(self.sleep_duration)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        finished_at
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl FailureHandler for OnFailureRetryLater {
    async fn on_failure(
        &self,
        completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()> {
        let next = self.retry_at(completed.finished_at);
        debug!("执行 {} 失败，{} 重试", completed.execution.id(), next);
        ops.reschedule(completed, next).await
    }
}

/// 失败后按排期策略顺延，适用于周期任务
pub struct OnFailureReschedule {
    schedule: Arc<dyn Schedule>,
}

impl OnFailureReschedule {
    pub fn new(schedule: Arc<dyn Schedule>) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl FailureHandler for OnFailureReschedule {
    async fn on_failure(
        &self,
        completed: &ExecutionComplete,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()> {
        let next = self.schedule.next_execution_time(completed.finished_at);
        debug!("执行 {} 失败，顺延到 {}", completed.execution.id(), next);
        ops.reschedule(completed, next).await
    }
}

/// 立即复活死亡执行，并计一次失败
pub struct ReviveDeadExecution;

#[async_trait]
impl DeadExecutionHandler for ReviveDeadExecution {
    async fn dead_execution(
        &self,
        execution: Execution,
        ops: &ExecutionOperations,
    ) -> SchedulerResult<()> {
        info!("复活死亡执行: {}", execution);
        let now = Utc::now();
        let completed =
            ExecutionComplete::failure(execution, now, now, "execution presumed dead");
        ops.reschedule(&completed, now).await
    }
}
