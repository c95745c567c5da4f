//! 开箱即用的任务形态
//!
//! `OneTimeTask` 执行一次后删除记录；`RecurringTask` 按排期策略循环执行，
//! 并在调度器启动时确保首条执行记录存在。

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use super::handlers::{
    OnCompleteRemove, OnCompleteReschedule, OnFailureReschedule, OnFailureRetryLater,
    ReviveDeadExecution,
};
use super::schedule::Schedule;
use super::{
    CompletionHandler, DeadExecutionHandler, ExecutableTask, ExecutionContext, FailureHandler,
};
use crate::clock::Clock;
use crate::entities::TaskInstance;
use crate::services::{OnStartup, SchedulerClient};
use taskloop_errors::SchedulerResult;

/// 周期任务使用的固定实例标识
pub const RECURRING_INSTANCE: &str = "recurring";

const DEFAULT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5 * 60);

type ExecutionHandlerFn = Arc<
    dyn Fn(TaskInstance, ExecutionContext) -> Pin<Box<dyn Future<Output = SchedulerResult<()>> + Send>>
        + Send
        + Sync,
>;

/// 一次性任务，完成后删除执行记录
pub struct OneTimeTask {
    name: String,
    run: ExecutionHandlerFn,
    failure_handler: Box<dyn FailureHandler>,
    dead_execution_handler: Box<dyn DeadExecutionHandler>,
}

impl OneTimeTask {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(TaskInstance, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |instance, ctx| Box::pin(run(instance, ctx))),
            failure_handler: Box::new(OnFailureRetryLater::new(DEFAULT_RETRY_DELAY)),
            dead_execution_handler: Box::new(ReviveDeadExecution),
        }
    }

    pub fn with_failure_handler(mut self, handler: Box<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn with_dead_execution_handler(mut self, handler: Box<dyn DeadExecutionHandler>) -> Self {
        self.dead_execution_handler = handler;
        self
    }
}

#[async_trait]
impl ExecutableTask for OneTimeTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        instance: TaskInstance,
        ctx: ExecutionContext,
    ) -> SchedulerResult<Box<dyn CompletionHandler>> {
        (self.run)(instance, ctx).await?;
        Ok(Box::new(OnCompleteRemove))
    }

    fn failure_handler(&self) -> &dyn FailureHandler {
        self.failure_handler.as_ref()
    }

    fn dead_execution_handler(&self) -> &dyn DeadExecutionHandler {
        self.dead_execution_handler.as_ref()
    }
}

/// 周期任务
///
/// 每个任务名只有一条固定实例，完成或失败后都按排期策略顺延。
pub struct RecurringTask {
    name: String,
    schedule: Arc<dyn Schedule>,
    run: ExecutionHandlerFn,
    failure_handler: Box<dyn FailureHandler>,
    dead_execution_handler: Box<dyn DeadExecutionHandler>,
}

impl RecurringTask {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: Arc<dyn Schedule>, run: F) -> Self
    where
        F: Fn(TaskInstance, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            failure_handler: Box::new(OnFailureReschedule::new(schedule.clone())),
            dead_execution_handler: Box::new(ReviveDeadExecution),
            schedule,
            run: Arc::new(move |instance, ctx| Box::pin(run(instance, ctx))),
        }
    }

    pub fn instance(&self) -> TaskInstance {
        TaskInstance::new(self.name.clone(), RECURRING_INSTANCE)
    }
}

#[async_trait]
impl ExecutableTask for RecurringTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        instance: TaskInstance,
        ctx: ExecutionContext,
    ) -> SchedulerResult<Box<dyn CompletionHandler>> {
        (self.run)(instance, ctx).await?;
        Ok(Box::new(OnCompleteReschedule::new(self.schedule.clone())))
    }

    fn failure_handler(&self) -> &dyn FailureHandler {
        self.failure_handler.as_ref()
    }

    fn dead_execution_handler(&self) -> &dyn DeadExecutionHandler {
        self.dead_execution_handler.as_ref()
    }
}

#[async_trait]
impl OnStartup for RecurringTask {
    /// 确保周期任务的首条执行记录存在
    async fn on_startup(
        &self,
        client: &dyn SchedulerClient,
        clock: &dyn Clock,
    ) -> SchedulerResult<()> {
        let first = self.schedule.next_execution_time(clock.now());
        debug!("注册周期任务 {} 的首次执行: {}", self.name, first);
        client.schedule(self.instance(), first).await
    }
}
