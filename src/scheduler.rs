//! 调度器编排
//!
//! 每个节点固定四类长期活动：到期轮询、死亡检测、心跳更新三个单线程
//! 循环，外加一个有界工作池执行 `pick_and_execute`。节点之间没有任何
//! 进程内协调，锁定竞争完全交给存储层的条件更新裁决。
//!
//! 到期轮询把一批到期执行连同代际号投入工作池，随后才发布新代际。
//! 于是排队中的任务出队时只要发现自己的代际落后于当前代际，就说明
//! 已经有更新一轮轮询重新读过这些记录，直接丢弃即可。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::batch::DueExecutionsBatch;
use crate::builder::SchedulerBuilder;
use crate::client::StandardSchedulerClient;
use crate::state::{SchedulerState, SchedulerStateHolder};
use crate::task_resolver::TaskResolver;
use crate::waiter::Waiter;
use crate::worker_pool::WorkerPool;
use taskloop_domain::clock::Clock;
use taskloop_domain::entities::{Execution, ExecutionId, TaskInstance};
use taskloop_domain::events::{
    CandidateStatsEvent, ExecutionStatsEvent, SchedulerStatsEvent, StatsRegistry,
};
use taskloop_domain::repositories::ExecutionRepository;
use taskloop_domain::services::{OnStartup, SchedulerClient, SchedulerStateView};
use taskloop_domain::task::{
    CompletionHandler, DeadExecutionHandler, ExecutableTask, ExecutionComplete, ExecutionContext,
    ExecutionOperations, FailureHandler,
};
use taskloop_errors::SchedulerResult;

/// 优雅关闭时等待在途任务完成的上限
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(30 * 60);

/// 关闭时等待每个循环退出的上限
const LOOP_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// 本节点正在处理的执行，心跳循环的数据来源
#[derive(Debug, Clone)]
pub struct CurrentlyExecuting {
    execution: Execution,
    start_time: DateTime<Utc>,
}

impl CurrentlyExecuting {
    fn new(execution: Execution, start_time: DateTime<Utc>) -> Self {
        Self {
            execution,
            start_time,
        }
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.start_time
    }
}

struct SchedulerContext {
    clock: Arc<dyn Clock>,
    repository: Arc<dyn ExecutionRepository>,
    task_resolver: Arc<TaskResolver>,
    scheduler_name: String,
    threadpool_size: usize,
    polling_limit: usize,
    heartbeat_interval: Duration,
    execute_due_waiter: Arc<Waiter>,
    detect_dead_waiter: Arc<Waiter>,
    heartbeat_waiter: Arc<Waiter>,
    worker_pool: Arc<WorkerPool>,
    stats: Arc<dyn StatsRegistry>,
    currently_processing: Mutex<HashMap<ExecutionId, CurrentlyExecuting>>,
    state: Arc<SchedulerStateHolder>,
    current_generation_number: AtomicI64,
}

impl SchedulerContext {
    fn max_age_before_considered_dead(&self) -> Duration {
        self.heartbeat_interval * 4
    }
}

pub struct Scheduler {
    inner: Arc<SchedulerContext>,
    delegate: Arc<StandardSchedulerClient>,
    on_startup: Vec<Arc<dyn OnStartup>>,
    shutdown_wait: Duration,
    loop_handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn assemble(
    clock: Arc<dyn Clock>,
    repository: Arc<dyn ExecutionRepository>,
    task_resolver: TaskResolver,
    scheduler_name: String,
    threadpool_size: usize,
    polling_interval: Duration,
    polling_limit: usize,
    heartbeat_interval: Duration,
    shutdown_wait: Duration,
    enable_immediate_execution: bool,
    stats: Arc<dyn StatsRegistry>,
    on_startup: Vec<Arc<dyn OnStartup>>,
) -> Scheduler {
    let state = Arc::new(SchedulerStateHolder::new());
    let execute_due_waiter = Arc::new(Waiter::new(polling_interval));
    let detect_dead_waiter = Arc::new(Waiter::new(heartbeat_interval * 2));
    let heartbeat_waiter = Arc::new(Waiter::new(heartbeat_interval));
    let worker_pool = Arc::new(WorkerPool::new(threadpool_size));

    let delegate = if enable_immediate_execution {
        let listener = crate::client::TriggerCheckForDueExecutions::new(
            state.clone(),
            clock.clone(),
            execute_due_waiter.clone(),
        );
        Arc::new(StandardSchedulerClient::with_listener(
            repository.clone(),
            clock.clone(),
            Arc::new(listener),
        ))
    } else {
        Arc::new(StandardSchedulerClient::new(
            repository.clone(),
            clock.clone(),
        ))
    };

    let inner = Arc::new(SchedulerContext {
        clock,
        repository,
        task_resolver: Arc::new(task_resolver),
        scheduler_name,
        threadpool_size,
        polling_limit,
        heartbeat_interval,
        execute_due_waiter,
        detect_dead_waiter,
        heartbeat_waiter,
        worker_pool,
        stats,
        currently_processing: Mutex::new(HashMap::new()),
        state,
        current_generation_number: AtomicI64::new(0),
    });

    Scheduler {
        inner,
        delegate,
        on_startup,
        shutdown_wait,
        loop_handles: Mutex::new(Vec::new()),
    }
}

impl Scheduler {
    pub fn create(repository: Arc<dyn ExecutionRepository>) -> SchedulerBuilder {
        SchedulerBuilder::new(repository)
    }

    /// 运行启动钩子并拉起三个周期循环
    pub async fn start(&self) {
        if self.inner.state.current() != SchedulerState::Created {
            warn!("start() 已被调用过，忽略");
            return;
        }
        info!("启动调度器 {}", self.inner.scheduler_name);

        self.execute_on_startup().await;

        {
            let mut handles = self.loop_handles.lock().unwrap();
            let ctx = self.inner.clone();
            handles.push((
                "execute-due",
                tokio::spawn(run_until_shutdown(
                    "execute-due",
                    ctx.execute_due_waiter.clone(),
                    ctx.clone(),
                    execute_due,
                )),
            ));
            handles.push((
                "detect-dead",
                tokio::spawn(run_until_shutdown(
                    "detect-dead",
                    ctx.detect_dead_waiter.clone(),
                    ctx.clone(),
                    detect_dead_executions,
                )),
            ));
            handles.push((
                "update-heartbeat",
                tokio::spawn(run_until_shutdown(
                    "update-heartbeat",
                    ctx.heartbeat_waiter.clone(),
                    ctx.clone(),
                    update_heartbeats,
                )),
            ));
        }

        self.inner.state.set_started();
    }

    async fn execute_on_startup(&self) {
        for hook in &self.on_startup {
            if let Err(e) = hook
                .on_startup(self.delegate.as_ref(), self.inner.clock.as_ref())
                .await
            {
                error!("启动钩子执行失败，继续启动: {e}");
                self.inner
                    .stats
                    .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
            }
        }
    }

    /// 幂等的优雅关闭
    ///
    /// 先停三个周期循环（每个最多等 5 秒），再把工作池排空，最长等待
    /// `shutdown_wait`。超时后中止残余任务并列出尚在执行的记录。
    pub async fn stop(&self) {
        if self.inner.state.is_shutting_down() {
            warn!("stop() 被重复调用，调度器已在关闭中");
            return;
        }
        self.inner.state.set_shutting_down();
        info!("正在关闭调度器 {}", self.inner.scheduler_name);

        // 唤醒循环让它们观察到关闭状态
        self.inner.execute_due_waiter.wake();
        self.inner.detect_dead_waiter.wake();
        self.inner.heartbeat_waiter.wake();

        let handles = {
            let mut guard = self.loop_handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (label, handle) in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(LOOP_SHUTDOWN_WAIT, handle)
                .await
                .is_err()
            {
                warn!("{label} 循环未能按时退出，强制中止");
                abort.abort();
            }
        }

        info!("等待在途任务完成，最长 {:?}", self.shutdown_wait);
        if self.inner.worker_pool.shutdown(self.shutdown_wait).await {
            info!("调度器已停止");
        } else {
            let still_running: Vec<String> = self
                .inner
                .currently_processing
                .lock()
                .map(|map| map.keys().map(ToString::to_string).collect())
                .unwrap_or_default();
            warn!(
                "调度器已停止，但以下执行未在期限内完成:\n{}",
                still_running.join("\n")
            );
        }
    }

    pub fn scheduler_name(&self) -> &str {
        &self.inner.scheduler_name
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.state.current()
    }

    /// 手动唤醒到期轮询
    pub fn trigger_check_for_due_executions(&self) {
        self.inner.execute_due_waiter.wake();
    }

    pub fn get_currently_executing(&self) -> Vec<CurrentlyExecuting> {
        self.inner
            .currently_processing
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 只读诊断：持续失败超过给定时长的执行
    pub async fn get_failing_executions(
        &self,
        failing_at_least_for: Duration,
    ) -> SchedulerResult<Vec<Execution>> {
        self.inner
            .repository
            .get_executions_failing_longer_than(failing_at_least_for)
            .await
    }
}

#[async_trait::async_trait]
impl SchedulerClient for Scheduler {
    async fn schedule(
        &self,
        task_instance: TaskInstance,
        execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.delegate.schedule(task_instance, execution_time).await
    }

    async fn reschedule(
        &self,
        id: &ExecutionId,
        new_execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.delegate.reschedule(id, new_execution_time).await
    }

    async fn cancel(&self, id: &ExecutionId) -> SchedulerResult<()> {
        self.delegate.cancel(id).await
    }

    async fn get_scheduled_executions(&self) -> SchedulerResult<Vec<Execution>> {
        self.delegate.get_scheduled_executions().await
    }

    async fn get_scheduled_execution(
        &self,
        id: &ExecutionId,
    ) -> SchedulerResult<Option<Execution>> {
        self.delegate.get_scheduled_execution(id).await
    }
}

/// 周期循环骨架：等待、检查关闭、执行一轮，单轮失败只记录并等下一轮
async fn run_until_shutdown<F, Fut>(
    label: &'static str,
    waiter: Arc<Waiter>,
    ctx: Arc<SchedulerContext>,
    tick: F,
) where
    F: Fn(Arc<SchedulerContext>) -> Fut,
    Fut: std::future::Future<Output = SchedulerResult<()>>,
{
    loop {
        waiter.wait().await;
        if ctx.state.is_shutting_down() {
            debug!("{label} 循环退出");
            break;
        }
        if let Err(e) = tick(ctx.clone()).await {
            error!("{label} 执行失败，等待下一周期重试: {e}");
            ctx.stats
                .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
        }
    }
}

/// 到期轮询：读取到期执行并连同新批次投入工作池
///
/// 新代际号在全部任务提交之后才发布，保证排队任务比较代际时不会误判。
async fn execute_due(ctx: Arc<SchedulerContext>) -> SchedulerResult<()> {
    let now = ctx.clock.now();
    let due_executions = ctx.repository.get_due(now, ctx.polling_limit).await?;
    trace!("发现 {} 条到期执行", due_executions.len());

    let this_generation = ctx.current_generation_number.load(Ordering::SeqCst) + 1;
    let batch = Arc::new(DueExecutionsBatch::new(
        ctx.threadpool_size,
        this_generation,
        due_executions.len(),
        due_executions.len() == ctx.polling_limit,
    ));

    for execution in due_executions {
        let job = pick_and_execute(ctx.clone(), execution, batch.clone());
        if !ctx.worker_pool.submit(job) {
            debug!("工作池已停止接收，丢弃到期执行");
        }
    }
    ctx.current_generation_number
        .store(this_generation, Ordering::SeqCst);
    ctx.stats
        .register_scheduler_event(SchedulerStatsEvent::RanExecuteDue);
    Ok(())
}

/// 死亡检测：回收心跳超时的执行，处置策略由任务自己的处理器决定
async fn detect_dead_executions(ctx: Arc<SchedulerContext>) -> SchedulerResult<()> {
    debug!("检查死亡执行");
    let now = ctx.clock.now();
    let max_age = ctx.max_age_before_considered_dead();
    let old_age_limit = chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let old_executions = ctx.repository.get_old_executions(old_age_limit).await?;
    if old_executions.is_empty() {
        trace!("没有发现死亡执行");
    }

    for execution in old_executions {
        info!("发现死亡执行，交由任务处理: {execution}");
        match ctx.task_resolver.resolve(execution.task_name()) {
            Some(task) => {
                ctx.stats
                    .register_scheduler_event(SchedulerStatsEvent::DeadExecution);
                let ops = ExecutionOperations::new(ctx.repository.clone(), execution.clone());
                if let Err(e) = task
                    .dead_execution_handler()
                    .dead_execution(execution.clone(), &ops)
                    .await
                {
                    error!("处理死亡执行 {execution} 失败，下一周期重试: {e}");
                    ctx.stats
                        .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
                }
            }
            None => {
                error!(
                    "找不到任务 '{}' 的实现，无法处理死亡执行。请删除该执行记录或部署对应实现",
                    execution.task_name()
                );
            }
        }
    }
    ctx.stats
        .register_scheduler_event(SchedulerStatsEvent::RanDetectDead);
    Ok(())
}

/// 心跳更新：为本节点正在处理的每条执行续期，单条失败不影响其余
async fn update_heartbeats(ctx: Arc<SchedulerContext>) -> SchedulerResult<()> {
    let executions: Vec<Execution> = {
        let guard = ctx.currently_processing.lock().unwrap();
        guard.values().map(|c| c.execution().clone()).collect()
    };
    if executions.is_empty() {
        trace!("没有需要心跳的执行，跳过");
        return Ok(());
    }

    debug!("为 {} 条执行更新心跳", executions.len());
    let now = ctx.clock.now();
    for execution in executions {
        trace!("更新心跳: {execution}");
        if let Err(e) = ctx.repository.update_heartbeat(&execution, now).await {
            error!("更新执行 {execution} 的心跳失败，下一周期重试: {e}");
            ctx.stats
                .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
        }
    }
    ctx.stats
        .register_scheduler_event(SchedulerStatsEvent::RanUpdateHeartbeats);
    Ok(())
}

/// 批次记账守卫，任何退出路径（包括 panic 展开）都恰好结账一次
struct BatchDoneGuard {
    ctx: Arc<SchedulerContext>,
    batch: Arc<DueExecutionsBatch>,
}

impl Drop for BatchDoneGuard {
    fn drop(&mut self) {
        let waiter = &self.ctx.execute_due_waiter;
        self.batch.one_execution_done(|| waiter.wake());
    }
}

/// 锁定记录守卫，保证成功锁定后一定会从本地处理表中摘除
struct ProcessingGuard {
    ctx: Arc<SchedulerContext>,
    id: ExecutionId,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.ctx.currently_processing.lock() {
            if map.remove(&self.id).is_none() {
                error!("释放的执行不在本地处理表中，不应该发生: {}", self.id);
                self.ctx
                    .stats
                    .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
            }
        }
    }
}

/// 工作池任务：竞争锁定一条到期执行并运行任务体
async fn pick_and_execute(
    ctx: Arc<SchedulerContext>,
    candidate: Execution,
    batch: Arc<DueExecutionsBatch>,
) {
    let _batch_guard = BatchDoneGuard {
        ctx: ctx.clone(),
        batch: batch.clone(),
    };

    if ctx.state.is_shutting_down() {
        info!("调度器正在关闭，跳过到期执行: {}", candidate.id());
        return;
    }

    let current_generation = ctx.current_generation_number.load(Ordering::SeqCst);
    if batch.is_older_generation_than(current_generation) {
        batch.mark_stale();
        ctx.stats
            .register_candidate_event(CandidateStatsEvent::Stale);
        trace!(
            "跳过过期批次中的任务 (current generation: {current_generation}, batch generation: {})",
            batch.generation_number()
        );
        return;
    }

    let picked = match ctx.repository.pick(&candidate, ctx.clock.now()).await {
        Ok(Some(picked)) => picked,
        Ok(None) => {
            debug!("执行已被其他调度器锁定，继续处理下一条");
            ctx.stats
                .register_candidate_event(CandidateStatsEvent::AlreadyPicked);
            return;
        }
        Err(e) => {
            error!("锁定执行 {} 失败: {e}", candidate.id());
            ctx.stats
                .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
            return;
        }
    };

    let _processing_guard = ProcessingGuard {
        ctx: ctx.clone(),
        id: picked.id(),
    };
    if let Ok(mut map) = ctx.currently_processing.lock() {
        map.insert(
            picked.id(),
            CurrentlyExecuting::new(picked.clone(), ctx.clock.now()),
        );
    }

    ctx.stats
        .register_candidate_event(CandidateStatsEvent::Executed);
    execute_picked(ctx.clone(), picked).await;
}

async fn execute_picked(ctx: Arc<SchedulerContext>, execution: Execution) {
    let Some(task) = ctx.task_resolver.resolve(execution.task_name()) else {
        // 记录保持锁定状态，最终由死亡检测按任务的恢复策略处理
        error!(
            "找不到任务 '{}' 的实现。大量此类执行会占满工作池，必须尽快修复",
            execution.task_name()
        );
        return;
    };

    let execution_started = ctx.clock.now();
    let state_view: Arc<dyn SchedulerStateView> = ctx.state.clone();
    let exec_ctx = ExecutionContext::new(
        execution.clone(),
        ctx.scheduler_name.clone(),
        state_view,
    );
    let instance = execution.task_instance.clone();

    debug!("开始执行 {execution}");
    let task_for_body = task.clone();
    let joined =
        tokio::spawn(async move { task_for_body.execute(instance, exec_ctx).await }).await;

    match joined {
        Ok(Ok(completion)) => {
            let completed =
                ExecutionComplete::success(execution.clone(), execution_started, ctx.clock.now());
            let ops = ExecutionOperations::new(ctx.repository.clone(), execution.clone());
            match completion.complete(&completed, &ops).await {
                Ok(()) => ctx.stats.register_completed_execution(&completed),
                Err(e) => {
                    ctx.stats
                        .register_scheduler_event(SchedulerStatsEvent::CompletionHandlerError);
                    ctx.stats
                        .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
                    error!(
                        "完成处理器执行失败，执行 {execution} 将保持锁定，预计 {:?} 后被判定为死亡执行并按任务的恢复策略处理: {e}",
                        ctx.max_age_before_considered_dead()
                    );
                }
            }
            ctx.stats
                .register_execution_event(ExecutionStatsEvent::Completed);
        }
        Ok(Err(task_error)) => {
            error!("任务体执行失败，按失败处理: {task_error}");
            run_failure_handler(
                &ctx,
                task.failure_handler(),
                &execution,
                execution_started,
                task_error.to_string(),
            )
            .await;
            ctx.stats
                .register_execution_event(ExecutionStatsEvent::Failed);
        }
        Err(join_error) => {
            // 任务体 panic 属于致命错误，同样走失败路径
            error!("任务体异常中止，按失败处理: {join_error}");
            run_failure_handler(
                &ctx,
                task.failure_handler(),
                &execution,
                execution_started,
                format!("task body aborted: {join_error}"),
            )
            .await;
            ctx.stats
                .register_execution_event(ExecutionStatsEvent::Failed);
        }
    }
}

async fn run_failure_handler(
    ctx: &Arc<SchedulerContext>,
    failure_handler: &dyn FailureHandler,
    execution: &Execution,
    execution_started: DateTime<Utc>,
    cause: String,
) {
    let completed = ExecutionComplete::failure(
        execution.clone(),
        execution_started,
        ctx.clock.now(),
        cause,
    );
    let ops = ExecutionOperations::new(ctx.repository.clone(), execution.clone());
    match failure_handler.on_failure(&completed, &ops).await {
        Ok(()) => ctx.stats.register_completed_execution(&completed),
        Err(e) => {
            ctx.stats
                .register_scheduler_event(SchedulerStatsEvent::FailureHandlerError);
            ctx.stats
                .register_scheduler_event(SchedulerStatsEvent::UnexpectedError);
            error!(
                "失败处理器执行失败，执行 {execution} 将保持锁定，预计 {:?} 后被判定为死亡执行并按任务的恢复策略处理: {e}",
                ctx.max_age_before_considered_dead()
            );
        }
    }
}
