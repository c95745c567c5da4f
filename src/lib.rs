//! 持久化任务调度器
//!
//! 以关系型数据库同时充当任务队列和多实例之间的协调点：到期轮询读取
//! 到期执行，工作池里的任务通过带版本检查的条件更新竞争锁定，心跳循环
//! 证明本节点仍在处理，死亡检测循环回收心跳超时的执行。投递语义是
//! 至少一次，任务实现必须幂等。

pub mod batch;
pub mod builder;
pub mod client;
pub mod config;
pub mod logging;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod task_resolver;
pub mod waiter;
pub mod worker_pool;

pub use builder::SchedulerBuilder;
pub use client::{ExecutionScheduledListener, StandardSchedulerClient};
pub use config::{DatabaseConfig, SchedulerConfig};
pub use scheduler::{CurrentlyExecuting, Scheduler, SHUTDOWN_WAIT};
pub use state::{SchedulerState, SchedulerStateHolder};
pub use stats::MetricsStatsRegistry;
pub use task_resolver::TaskResolver;
pub use waiter::Waiter;
pub use worker_pool::WorkerPool;

pub use taskloop_domain as domain;
pub use taskloop_domain::clock::{Clock, SystemClock};
pub use taskloop_domain::entities::{Execution, ExecutionId, TaskInstance};
pub use taskloop_domain::events::{
    CandidateStatsEvent, ExecutionStatsEvent, NoopStatsRegistry, SchedulerStatsEvent, StatsRegistry,
};
pub use taskloop_domain::repositories::ExecutionRepository;
pub use taskloop_domain::services::{OnStartup, SchedulerClient};
pub use taskloop_domain::task::{
    CompletionHandler, DeadExecutionHandler, ExecutableTask, ExecutionComplete, ExecutionContext,
    ExecutionOperations, ExecutionResult, FailureHandler,
};
pub use taskloop_errors::{SchedulerError, SchedulerResult};
