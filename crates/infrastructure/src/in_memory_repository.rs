//! In-memory execution repository
//!
//! Reference implementation of the repository contract with the same
//! conditional-update semantics as the PostgreSQL backend. Used as the test
//! backend and as an executable specification of the locking protocol; it is
//! not a production storage mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use taskloop_domain::clock::Clock;
use taskloop_domain::entities::{Execution, ExecutionId};
use taskloop_domain::repositories::ExecutionRepository;
use taskloop_errors::{SchedulerError, SchedulerResult};

pub struct InMemoryExecutionRepository {
    executions: Mutex<HashMap<ExecutionId, Execution>>,
    scheduler_name: String,
    clock: Arc<dyn Clock>,
}

impl InMemoryExecutionRepository {
    pub fn new(scheduler_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executions: Mutex::new(HashMap::new()),
            scheduler_name: scheduler_name.into(),
            clock,
        }
    }

    /// Seed the repository with pre-existing executions, picked or not.
    pub fn with_executions(
        scheduler_name: impl Into<String>,
        clock: Arc<dyn Clock>,
        executions: Vec<Execution>,
    ) -> Self {
        let map = executions.into_iter().map(|e| (e.id(), e)).collect();
        Self {
            executions: Mutex::new(map),
            scheduler_name: scheduler_name.into(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.lock().unwrap().is_empty()
    }

    pub fn get(&self, id: &ExecutionId) -> Option<Execution> {
        self.executions.lock().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Execution> {
        self.executions.lock().unwrap().values().cloned().collect()
    }

    fn version_conflict(execution: &Execution) -> SchedulerError {
        SchedulerError::VersionConflict {
            task_name: execution.task_instance.task_name.clone(),
            instance_id: execution.task_instance.instance_id.clone(),
            version: execution.version,
        }
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_if_not_exists(&self, execution: &Execution) -> SchedulerResult<bool> {
        let mut executions = self.executions.lock().unwrap();
        if executions.contains_key(&execution.id()) {
            debug!("execution already exists, skipping create: {}", execution.id());
            return Ok(false);
        }
        executions.insert(execution.id(), execution.clone());
        Ok(true)
    }

    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<Execution>> {
        let executions = self.executions.lock().unwrap();
        let mut due: Vec<Execution> = executions
            .values()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.execution_time);
        due.truncate(limit);
        Ok(due)
    }

    async fn pick(
        &self,
        candidate: &Execution,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Execution>> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get_mut(&candidate.id()) {
            Some(stored) if !stored.picked && stored.version == candidate.version => {
                stored.picked = true;
                stored.picked_by = Some(self.scheduler_name.clone());
                stored.last_heartbeat = Some(now);
                stored.version += 1;
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_heartbeat(
        &self,
        execution: &Execution,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(stored) = executions.get_mut(&execution.id()) {
            stored.last_heartbeat = Some(now);
        } else {
            debug!("heartbeat target no longer exists: {}", execution.id());
        }
        Ok(())
    }

    async fn get_old_executions(
        &self,
        older_than: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Execution>> {
        let executions = self.executions.lock().unwrap();
        let mut old: Vec<Execution> = executions
            .values()
            .filter(|e| e.picked && e.last_heartbeat.is_some_and(|hb| hb < older_than))
            .cloned()
            .collect();
        old.sort_by_key(|e| e.last_heartbeat);
        Ok(old)
    }

    async fn remove(&self, execution: &Execution) -> SchedulerResult<()> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get(&execution.id()) {
            Some(stored) if stored.version == execution.version => {
                executions.remove(&execution.id());
                Ok(())
            }
            _ => Err(Self::version_conflict(execution)),
        }
    }

    async fn reschedule(
        &self,
        execution: &Execution,
        next_execution_time: DateTime<Utc>,
        last_success: Option<DateTime<Utc>>,
        last_failure: Option<DateTime<Utc>>,
        consecutive_failures: i32,
    ) -> SchedulerResult<()> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get_mut(&execution.id()) {
            Some(stored) if stored.version == execution.version => {
                stored.picked = false;
                stored.picked_by = None;
                stored.last_heartbeat = None;
                stored.execution_time = next_execution_time;
                stored.last_success = last_success;
                stored.last_failure = last_failure;
                stored.consecutive_failures = consecutive_failures;
                stored.version += 1;
                Ok(())
            }
            _ => Err(Self::version_conflict(execution)),
        }
    }

    async fn get_execution(&self, id: &ExecutionId) -> SchedulerResult<Option<Execution>> {
        Ok(self.executions.lock().unwrap().get(id).cloned())
    }

    async fn get_scheduled_executions(&self) -> SchedulerResult<Vec<Execution>> {
        let executions = self.executions.lock().unwrap();
        let mut scheduled: Vec<Execution> =
            executions.values().filter(|e| !e.picked).cloned().collect();
        scheduled.sort_by_key(|e| e.execution_time);
        Ok(scheduled)
    }

    async fn get_executions_failing_longer_than(
        &self,
        duration: Duration,
    ) -> SchedulerResult<Vec<Execution>> {
        let boundary = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.clock.now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let executions = self.executions.lock().unwrap();
        Ok(executions
            .values()
            .filter(|e| {
                e.last_failure.is_some()
                    && e.last_success.map_or(true, |success| success < boundary)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use taskloop_domain::entities::TaskInstance;
    use taskloop_testing_utils::mocks::SettableClock;

    fn repository() -> (InMemoryExecutionRepository, Arc<SettableClock>) {
        let clock = Arc::new(SettableClock::new(Utc::now()));
        (
            InMemoryExecutionRepository::new("node-1", clock.clone()),
            clock,
        )
    }

    fn due_execution(instance_id: &str, now: DateTime<Utc>) -> Execution {
        Execution::new(
            TaskInstance::new("reporting", instance_id),
            now - ChronoDuration::seconds(1),
        )
    }

    #[tokio::test]
    async fn test_create_if_not_exists_rejects_duplicate_identity() {
        let (repo, clock) = repository();
        let execution = due_execution("daily", clock.now());

        assert!(repo.create_if_not_exists(&execution).await.unwrap());
        assert!(!repo.create_if_not_exists(&execution).await.unwrap());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_get_due_orders_limits_and_skips_picked() {
        let (repo, clock) = repository();
        let now = clock.now();

        for i in 0..5 {
            let execution = Execution::new(
                TaskInstance::new("reporting", format!("r-{i}")),
                now - ChronoDuration::seconds(10 - i),
            );
            repo.create_if_not_exists(&execution).await.unwrap();
        }
        let future = Execution::new(
            TaskInstance::new("reporting", "future"),
            now + ChronoDuration::hours(1),
        );
        repo.create_if_not_exists(&future).await.unwrap();

        let due = repo.get_due(now, 3).await.unwrap();
        assert_eq!(due.len(), 3);
        // 按 execution_time 升序
        assert_eq!(due[0].task_instance.instance_id, "r-0");
        assert_eq!(due[2].task_instance.instance_id, "r-2");

        repo.pick(&due[0], now).await.unwrap().unwrap();
        let due_after_pick = repo.get_due(now, 10).await.unwrap();
        assert_eq!(due_after_pick.len(), 4);
        assert!(due_after_pick
            .iter()
            .all(|e| e.task_instance.instance_id != "r-0"));
    }

    #[tokio::test]
    async fn test_pick_wins_once_and_bumps_version() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();

        let picked = repo.pick(&execution, now).await.unwrap().unwrap();
        assert!(picked.picked);
        assert_eq!(picked.picked_by.as_deref(), Some("node-1"));
        assert_eq!(picked.last_heartbeat, Some(now));
        assert_eq!(picked.version, execution.version + 1);

        // 同一候选快照第二次锁定必须失败
        assert!(repo.pick(&execution, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pick_with_stale_version_loses() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();

        let picked = repo.pick(&execution, now).await.unwrap().unwrap();
        let completed = picked.clone();
        repo.reschedule(
            &completed,
            now + ChronoDuration::hours(1),
            Some(now),
            None,
            0,
        )
        .await
        .unwrap();

        // 旧快照的版本已落后两次变更
        assert!(repo.pick(&execution, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reschedule_releases_lock_and_persists_outcome() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();
        let picked = repo.pick(&execution, now).await.unwrap().unwrap();

        let next = now + ChronoDuration::hours(1);
        repo.reschedule(&picked, next, Some(now), None, 0)
            .await
            .unwrap();

        let stored = repo.get(&execution.id()).unwrap();
        assert!(!stored.picked);
        assert!(stored.picked_by.is_none());
        assert!(stored.last_heartbeat.is_none());
        assert_eq!(stored.execution_time, next);
        assert_eq!(stored.last_success, Some(now));
        assert_eq!(stored.consecutive_failures, 0);
        assert_eq!(stored.version, picked.version + 1);
    }

    #[tokio::test]
    async fn test_reschedule_with_stale_version_fails() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();
        repo.pick(&execution, now).await.unwrap().unwrap();

        let result = repo
            .reschedule(&execution, now + ChronoDuration::hours(1), None, None, 0)
            .await;
        assert!(matches!(
            result,
            Err(SchedulerError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_is_version_checked() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();
        let picked = repo.pick(&execution, now).await.unwrap().unwrap();

        assert!(matches!(
            repo.remove(&execution).await,
            Err(SchedulerError::VersionConflict { .. })
        ));
        repo.remove(&picked).await.unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_is_advisory() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();
        let picked = repo.pick(&execution, now).await.unwrap().unwrap();

        let later = now + ChronoDuration::seconds(30);
        repo.update_heartbeat(&picked, later).await.unwrap();

        let stored = repo.get(&execution.id()).unwrap();
        assert_eq!(stored.last_heartbeat, Some(later));
        // 心跳不触碰版本
        assert_eq!(stored.version, picked.version);

        // 目标不存在时心跳静默成功
        repo.remove(&stored).await.unwrap();
        repo.update_heartbeat(&picked, later).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_old_executions_finds_stale_heartbeats() {
        let (repo, clock) = repository();
        let now = clock.now();
        let execution = due_execution("daily", now);
        repo.create_if_not_exists(&execution).await.unwrap();
        let picked = repo.pick(&execution, now).await.unwrap().unwrap();

        let boundary = now + ChronoDuration::seconds(1);
        let old = repo.get_old_executions(boundary).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].id(), picked.id());

        // 心跳追上来之后不再视为死亡
        repo.update_heartbeat(&picked, boundary).await.unwrap();
        assert!(repo.get_old_executions(boundary).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_executions_failing_longer_than() {
        let (repo, clock) = repository();
        let now = clock.now();

        let mut failing = due_execution("failing", now);
        failing.last_failure = Some(now - ChronoDuration::minutes(5));
        let mut recovered = due_execution("recovered", now);
        recovered.last_failure = Some(now - ChronoDuration::minutes(5));
        recovered.last_success = Some(now - ChronoDuration::minutes(1));
        let healthy = due_execution("healthy", now);

        for e in [&failing, &recovered, &healthy] {
            repo.create_if_not_exists(e).await.unwrap();
        }

        let failing_list = repo
            .get_executions_failing_longer_than(Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(failing_list.len(), 1);
        assert_eq!(failing_list[0].task_instance.instance_id, "failing");
    }
}
