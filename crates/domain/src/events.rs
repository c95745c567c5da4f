//! 调度器运行时事件
//!
//! 统计事件按来源分为三类：调度循环本身、到期候选的处置、执行结果。
//! `StatsRegistry` 是事件的汇聚点，输出端（日志、metrics、测试计数器）
//! 由实现决定。

use crate::task::ExecutionComplete;

/// 调度循环事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerStatsEvent {
    RanExecuteDue,
    RanDetectDead,
    RanUpdateHeartbeats,
    DeadExecution,
    CompletionHandlerError,
    FailureHandlerError,
    UnexpectedError,
}

impl SchedulerStatsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RanExecuteDue => "ran_execute_due",
            Self::RanDetectDead => "ran_detect_dead",
            Self::RanUpdateHeartbeats => "ran_update_heartbeats",
            Self::DeadExecution => "dead_execution",
            Self::CompletionHandlerError => "completionhandler_error",
            Self::FailureHandlerError => "failurehandler_error",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

/// 到期候选的处置事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateStatsEvent {
    Stale,
    AlreadyPicked,
    Executed,
}

impl CandidateStatsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::AlreadyPicked => "already_picked",
            Self::Executed => "executed",
        }
    }
}

/// 执行结果事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatsEvent {
    Completed,
    Failed,
}

impl ExecutionStatsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

pub trait StatsRegistry: Send + Sync {
    fn register_scheduler_event(&self, event: SchedulerStatsEvent);

    fn register_candidate_event(&self, event: CandidateStatsEvent);

    fn register_execution_event(&self, event: ExecutionStatsEvent);

    /// 单次执行完成的明细记录，带起止时间
    fn register_completed_execution(&self, _completed: &ExecutionComplete) {}
}

/// 丢弃所有事件的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatsRegistry;

impl StatsRegistry for NoopStatsRegistry {
    fn register_scheduler_event(&self, _event: SchedulerStatsEvent) {}

    fn register_candidate_event(&self, _event: CandidateStatsEvent) {}

    fn register_execution_event(&self, _event: ExecutionStatsEvent) {}
}
