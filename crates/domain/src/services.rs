//! 领域服务抽象

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::entities::{Execution, ExecutionId, TaskInstance};
use taskloop_errors::SchedulerResult;

/// 面向应用代码的调度客户端
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// 安排一次执行。标识已存在时静默忽略
    async fn schedule(
        &self,
        task_instance: TaskInstance,
        execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 调整未锁定执行的时间，版本检查
    async fn reschedule(
        &self,
        id: &ExecutionId,
        new_execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 取消未锁定的执行，版本检查
    async fn cancel(&self, id: &ExecutionId) -> SchedulerResult<()>;

    async fn get_scheduled_executions(&self) -> SchedulerResult<Vec<Execution>>;

    async fn get_scheduled_execution(&self, id: &ExecutionId)
        -> SchedulerResult<Option<Execution>>;
}

/// 调度器生命周期的只读视图，供任务体和钩子感知关闭
pub trait SchedulerStateView: Send + Sync {
    fn is_started(&self) -> bool;

    fn is_shutting_down(&self) -> bool;
}

/// 调度器启动时执行的钩子
///
/// 钩子失败会被记录但不会阻塞启动。
#[async_trait]
pub trait OnStartup: Send + Sync {
    async fn on_startup(
        &self,
        client: &dyn SchedulerClient,
        clock: &dyn Clock,
    ) -> SchedulerResult<()>;
}
