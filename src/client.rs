//! 调度客户端
//!
//! `StandardSchedulerClient` 在仓储之上实现面向应用的调度 API。
//! 即时执行通过单向注入的监听器实现：调度器把到期轮询的唤醒能力交给
//! 客户端层，客户端层不反向持有调度器。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::state::SchedulerStateHolder;
use crate::waiter::Waiter;
use taskloop_domain::clock::Clock;
use taskloop_domain::entities::{Execution, ExecutionId, TaskInstance};
use taskloop_domain::repositories::ExecutionRepository;
use taskloop_domain::services::{SchedulerClient, SchedulerStateView};
use taskloop_errors::{SchedulerError, SchedulerResult};

/// 新执行入库后的通知回调
pub trait ExecutionScheduledListener: Send + Sync {
    fn execution_scheduled(&self, id: &ExecutionId, execution_time: DateTime<Utc>);
}

pub struct NoopListener;

impl ExecutionScheduledListener for NoopListener {
    fn execution_scheduled(&self, _id: &ExecutionId, _execution_time: DateTime<Utc>) {}
}

/// 到期时间已到时立即唤醒到期轮询
///
/// 未来时间的排期不唤醒，留给正常的轮询节奏处理。
pub struct TriggerCheckForDueExecutions {
    state: Arc<SchedulerStateHolder>,
    clock: Arc<dyn Clock>,
    due_waiter: Arc<Waiter>,
}

impl TriggerCheckForDueExecutions {
    pub fn new(
        state: Arc<SchedulerStateHolder>,
        clock: Arc<dyn Clock>,
        due_waiter: Arc<Waiter>,
    ) -> Self {
        Self {
            state,
            clock,
            due_waiter,
        }
    }
}

impl ExecutionScheduledListener for TriggerCheckForDueExecutions {
    fn execution_scheduled(&self, id: &ExecutionId, execution_time: DateTime<Utc>) {
        if !self.state.is_started() {
            return;
        }
        if execution_time <= self.clock.now() {
            debug!("执行 {id} 已到期，提前唤醒到期轮询");
            self.due_waiter.wake();
        }
    }
}

pub struct StandardSchedulerClient {
    repository: Arc<dyn ExecutionRepository>,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn ExecutionScheduledListener>,
}

impl StandardSchedulerClient {
    pub fn new(repository: Arc<dyn ExecutionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self::with_listener(repository, clock, Arc::new(NoopListener))
    }

    pub fn with_listener(
        repository: Arc<dyn ExecutionRepository>,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn ExecutionScheduledListener>,
    ) -> Self {
        Self {
            repository,
            clock,
            listener,
        }
    }

    async fn fetch_unpicked(&self, id: &ExecutionId) -> SchedulerResult<Execution> {
        let execution = self.repository.get_execution(id).await?.ok_or_else(|| {
            SchedulerError::execution_not_found(id.task_name.clone(), id.instance_id.clone())
        })?;
        if execution.picked {
            return Err(SchedulerError::ExecutionPicked {
                task_name: id.task_name.clone(),
                instance_id: id.instance_id.clone(),
                picked_by: execution.picked_by.clone().unwrap_or_default(),
            });
        }
        Ok(execution)
    }
}

#[async_trait]
impl SchedulerClient for StandardSchedulerClient {
    async fn schedule(
        &self,
        task_instance: TaskInstance,
        execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let execution = Execution::new(task_instance, execution_time);
        let id = execution.id();
        if self.repository.create_if_not_exists(&execution).await? {
            debug!("已安排执行 {id} 于 {execution_time}");
            self.listener.execution_scheduled(&id, execution_time);
        } else {
            debug!("执行 {id} 已存在，忽略本次安排");
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &ExecutionId,
        new_execution_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let execution = self.fetch_unpicked(id).await?;
        self.repository
            .reschedule(
                &execution,
                new_execution_time,
                execution.last_success,
                execution.last_failure,
                execution.consecutive_failures,
            )
            .await?;
        debug!("执行 {id} 已调整到 {new_execution_time}");
        self.listener.execution_scheduled(id, new_execution_time);
        Ok(())
    }

    async fn cancel(&self, id: &ExecutionId) -> SchedulerResult<()> {
        let execution = self.fetch_unpicked(id).await?;
        self.repository.remove(&execution).await?;
        debug!("执行 {id} 已取消");
        Ok(())
    }

    async fn get_scheduled_executions(&self) -> SchedulerResult<Vec<Execution>> {
        self.repository.get_scheduled_executions().await
    }

    async fn get_scheduled_execution(
        &self,
        id: &ExecutionId,
    ) -> SchedulerResult<Option<Execution>> {
        self.repository.get_execution(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use taskloop_infrastructure::InMemoryExecutionRepository;
    use taskloop_testing_utils::mocks::SettableClock;

    fn client_fixture() -> (
        StandardSchedulerClient,
        Arc<InMemoryExecutionRepository>,
        Arc<SettableClock>,
    ) {
        let clock = Arc::new(SettableClock::new(Utc::now()));
        let repository = Arc::new(InMemoryExecutionRepository::new("node-1", clock.clone()));
        let client = StandardSchedulerClient::new(repository.clone(), clock.clone());
        (client, repository, clock)
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent_on_duplicate_identity() {
        let (client, repository, clock) = client_fixture();
        let instance = TaskInstance::new("billing", "customer-1");

        client
            .schedule(instance.clone(), clock.now())
            .await
            .unwrap();
        // 重复安排静默忽略，不报错也不覆盖
        client
            .schedule(instance, clock.now() + ChronoDuration::hours(1))
            .await
            .unwrap();

        assert_eq!(repository.len(), 1);
        let stored = repository
            .get(&ExecutionId::new("billing", "customer-1"))
            .unwrap();
        assert_eq!(stored.execution_time, clock.now());
    }

    #[tokio::test]
    async fn test_reschedule_moves_unpicked_execution() {
        let (client, repository, clock) = client_fixture();
        let instance = TaskInstance::new("billing", "customer-1");
        let id = instance.id();
        client
            .schedule(instance, clock.now())
            .await
            .unwrap();

        let new_time = clock.now() + ChronoDuration::hours(2);
        client.reschedule(&id, new_time).await.unwrap();

        let stored = repository.get(&id).unwrap();
        assert_eq!(stored.execution_time, new_time);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_reschedule_and_cancel_refuse_picked_executions() {
        let (client, repository, clock) = client_fixture();
        let instance = TaskInstance::new("billing", "customer-1");
        let id = instance.id();
        client.schedule(instance, clock.now()).await.unwrap();

        let stored = repository.get(&id).unwrap();
        repository.pick(&stored, clock.now()).await.unwrap().unwrap();

        assert!(matches!(
            client.reschedule(&id, clock.now()).await,
            Err(SchedulerError::ExecutionPicked { .. })
        ));
        assert!(matches!(
            client.cancel(&id).await,
            Err(SchedulerError::ExecutionPicked { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_removes_execution() {
        let (client, repository, clock) = client_fixture();
        let instance = TaskInstance::new("billing", "customer-1");
        let id = instance.id();
        client.schedule(instance, clock.now()).await.unwrap();

        client.cancel(&id).await.unwrap();
        assert!(repository.is_empty());

        assert!(matches!(
            client.cancel(&id).await,
            Err(SchedulerError::ExecutionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_immediate_execution_listener_wakes_only_for_due_times() {
        let clock = Arc::new(SettableClock::new(Utc::now()));
        let repository = Arc::new(InMemoryExecutionRepository::new("node-1", clock.clone()));
        let state = Arc::new(SchedulerStateHolder::new());
        let due_waiter = Arc::new(Waiter::new(Duration::from_secs(3600)));
        let listener = Arc::new(TriggerCheckForDueExecutions::new(
            state.clone(),
            clock.clone(),
            due_waiter.clone(),
        ));
        let client =
            StandardSchedulerClient::with_listener(repository, clock.clone(), listener);

        state.set_started();

        // 未来的排期不唤醒
        client
            .schedule(
                TaskInstance::new("billing", "future"),
                clock.now() + ChronoDuration::hours(1),
            )
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), due_waiter.wait())
                .await
                .is_err()
        );

        // 已到期的排期立即唤醒
        client
            .schedule(TaskInstance::new("billing", "due"), clock.now())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_millis(100), due_waiter.wait())
            .await
            .expect("due schedule should wake the poller");
    }
}
