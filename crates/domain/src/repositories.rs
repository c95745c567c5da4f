//! 执行记录仓储抽象
//!
//! 存储层是多个调度器节点之间唯一的协调点。节点间不存在任何进程内锁，
//! 竞争完全由 `pick` 的条件更新语义裁决，因此 `pick` 必须映射为存储上的
//! 单次原子操作（带版本检查的条件更新），不允许读后写。
//!
//! 瞬时存储错误直接向调用方传播，由调度循环记录日志并在下一个周期重试，
//! 仓储实现内部不做重试。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::entities::{Execution, ExecutionId};
use taskloop_errors::SchedulerResult;

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// 插入新执行记录，标识已存在时返回 false
    async fn create_if_not_exists(&self, execution: &Execution) -> SchedulerResult<bool>;

    /// 返回最多 `limit` 条到期且未锁定的执行，按 `execution_time` 升序。不加锁
    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<Execution>>;

    /// 竞争的原子裁决点
    ///
    /// 仅当持久化行仍匹配 candidate 的（标识, version, picked=false）时，
    /// 设置 picked/picked_by/last_heartbeat 并递增 version，返回更新后的
    /// 执行记录。竞争失败（已被其他节点锁定、已被重排或删除）返回 None。
    async fn pick(
        &self,
        candidate: &Execution,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Execution>>;

    /// 按标识无条件更新心跳。心跳是建议性的，版本冲突不影响调用方
    async fn update_heartbeat(
        &self,
        execution: &Execution,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 返回 picked=true 且 last_heartbeat 早于 `older_than` 的执行
    async fn get_old_executions(
        &self,
        older_than: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Execution>>;

    /// 删除执行记录，版本检查
    async fn remove(&self, execution: &Execution) -> SchedulerResult<()>;

    /// 释放锁并持久化本次结果，版本检查
    async fn reschedule(
        &self,
        execution: &Execution,
        next_execution_time: DateTime<Utc>,
        last_success: Option<DateTime<Utc>>,
        last_failure: Option<DateTime<Utc>>,
        consecutive_failures: i32,
    ) -> SchedulerResult<()>;

    async fn get_execution(&self, id: &ExecutionId) -> SchedulerResult<Option<Execution>>;

    /// 所有未锁定的执行记录，按 `execution_time` 升序
    async fn get_scheduled_executions(&self) -> SchedulerResult<Vec<Execution>>;

    /// 只读诊断：最近一次失败后再未成功、且持续时间超过 `duration` 的执行
    async fn get_executions_failing_longer_than(
        &self,
        duration: Duration,
    ) -> SchedulerResult<Vec<Execution>>;
}
