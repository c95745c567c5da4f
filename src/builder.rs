//! 调度器装配
//!
//! 缺省值面向常规部署：十个工作线程、十秒轮询、五分钟心跳。测试和低
//! 延迟场景按需调小。`polling_limit` 缺省是工作池容量的十倍，保证一轮
//! 轮询足够喂饱整个池子。

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::scheduler::{assemble, Scheduler, SHUTDOWN_WAIT};
use crate::task_resolver::TaskResolver;
use taskloop_domain::clock::{Clock, SystemClock};
use taskloop_domain::events::{NoopStatsRegistry, StatsRegistry};
use taskloop_domain::repositories::ExecutionRepository;
use taskloop_domain::services::OnStartup;
use taskloop_domain::task::stock::RecurringTask;
use taskloop_domain::task::ExecutableTask;
use taskloop_errors::{SchedulerError, SchedulerResult};

const DEFAULT_THREADPOOL_SIZE: usize = 10;
const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const POLLING_LIMIT_MULTIPLIER: usize = 10;

pub struct SchedulerBuilder {
    repository: Arc<dyn ExecutionRepository>,
    known_tasks: Vec<Arc<dyn ExecutableTask>>,
    startup_tasks: Vec<Arc<dyn OnStartup>>,
    clock: Arc<dyn Clock>,
    scheduler_name: Option<String>,
    threadpool_size: usize,
    polling_interval: Duration,
    polling_limit: Option<usize>,
    heartbeat_interval: Duration,
    shutdown_wait: Duration,
    enable_immediate_execution: bool,
    stats_registry: Arc<dyn StatsRegistry>,
}

impl SchedulerBuilder {
    pub fn new(repository: Arc<dyn ExecutionRepository>) -> Self {
        Self {
            repository,
            known_tasks: Vec::new(),
            startup_tasks: Vec::new(),
            clock: Arc::new(SystemClock),
            scheduler_name: None,
            threadpool_size: DEFAULT_THREADPOOL_SIZE,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            polling_limit: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            shutdown_wait: SHUTDOWN_WAIT,
            enable_immediate_execution: false,
            stats_registry: Arc::new(NoopStatsRegistry),
        }
    }

    pub fn task(mut self, task: Arc<dyn ExecutableTask>) -> Self {
        self.known_tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: Vec<Arc<dyn ExecutableTask>>) -> Self {
        self.known_tasks.extend(tasks);
        self
    }

    /// 注册周期任务，同时挂上保证首条执行记录存在的启动钩子
    pub fn recurring_task(mut self, task: Arc<RecurringTask>) -> Self {
        self.startup_tasks.push(task.clone());
        self.known_tasks.push(task);
        self
    }

    pub fn on_startup(mut self, hook: Arc<dyn OnStartup>) -> Self {
        self.startup_tasks.push(hook);
        self
    }

    pub fn scheduler_name(mut self, name: impl Into<String>) -> Self {
        self.scheduler_name = Some(name.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn threadpool_size(mut self, size: usize) -> Self {
        self.threadpool_size = size;
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn polling_limit(mut self, limit: usize) -> Self {
        self.polling_limit = Some(limit);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }

    pub fn enable_immediate_execution(mut self) -> Self {
        self.enable_immediate_execution = true;
        self
    }

    pub fn stats_registry(mut self, stats_registry: Arc<dyn StatsRegistry>) -> Self {
        self.stats_registry = stats_registry;
        self
    }

    /// 用配置文件的值覆盖对应字段
    pub fn apply_config(mut self, config: &SchedulerConfig) -> Self {
        if let Some(name) = &config.scheduler_name {
            self.scheduler_name = Some(name.clone());
        }
        self.threadpool_size = config.threadpool_size;
        self.polling_interval = Duration::from_secs(config.polling_interval_seconds);
        self.polling_limit = config.polling_limit;
        self.heartbeat_interval = Duration::from_secs(config.heartbeat_interval_seconds);
        self.shutdown_wait = Duration::from_secs(config.shutdown_wait_seconds);
        self.enable_immediate_execution = config.enable_immediate_execution;
        self
    }

    /// 装配调度器。工作池在这里创建，必须在 tokio 运行时内调用
    pub fn build(self) -> SchedulerResult<Scheduler> {
        if self.threadpool_size == 0 {
            return Err(SchedulerError::config_error("threadpool_size 必须大于 0"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(SchedulerError::config_error("heartbeat_interval 必须大于 0"));
        }
        let polling_limit = self
            .polling_limit
            .unwrap_or(self.threadpool_size * POLLING_LIMIT_MULTIPLIER);
        if polling_limit < self.threadpool_size {
            return Err(SchedulerError::config_error(
                "polling_limit 不能小于 threadpool_size",
            ));
        }

        let scheduler_name = self.scheduler_name.unwrap_or_else(default_scheduler_name);
        let task_resolver = TaskResolver::new(self.known_tasks);

        Ok(assemble(
            self.clock,
            self.repository,
            task_resolver,
            scheduler_name,
            self.threadpool_size,
            self.polling_interval,
            polling_limit,
            self.heartbeat_interval,
            self.shutdown_wait,
            self.enable_immediate_execution,
            self.stats_registry,
            self.startup_tasks,
        ))
    }
}

fn default_scheduler_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("taskloop-{}", Uuid::new_v4()))
}
