use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use taskloop_domain::clock::{Clock, SystemClock};
use taskloop_domain::entities::{Execution, ExecutionId, TaskInstance};
use taskloop_domain::repositories::ExecutionRepository;
use taskloop_errors::{SchedulerError, SchedulerResult};

const ALL_COLUMNS: &str = "task_name, instance_id, task_data, execution_time, picked, picked_by, \
                           last_heartbeat, last_success, last_failure, consecutive_failures, version";

/// 基于 PostgreSQL 的执行记录仓储
///
/// `pick` 的条件更新依赖单条 UPDATE 语句的原子性，版本检查写在 WHERE
/// 子句里，不做读后写。
pub struct PostgresExecutionRepository {
    pool: PgPool,
    scheduler_name: String,
    clock: Arc<dyn Clock>,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool, scheduler_name: impl Into<String>) -> Self {
        Self {
            pool,
            scheduler_name: scheduler_name.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 执行内嵌的数据库迁移
    pub async fn migrate(pool: &PgPool) -> SchedulerResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| SchedulerError::DatabaseOperation(e.to_string()))
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> SchedulerResult<Execution> {
        Ok(Execution {
            task_instance: TaskInstance {
                task_name: row.try_get("task_name")?,
                instance_id: row.try_get("instance_id")?,
                data: row.try_get("task_data")?,
            },
            execution_time: row.try_get("execution_time")?,
            picked: row.try_get("picked")?,
            picked_by: row.try_get("picked_by")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            last_success: row.try_get("last_success")?,
            last_failure: row.try_get("last_failure")?,
            consecutive_failures: row.try_get("consecutive_failures")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    #[instrument(skip(self, execution), fields(execution = %execution.id()))]
    async fn create_if_not_exists(&self, execution: &Execution) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_executions (task_name, instance_id, task_data, execution_time,
                picked, picked_by, last_heartbeat, last_success, last_failure,
                consecutive_failures, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (task_name, instance_id) DO NOTHING
            "#,
        )
        .bind(&execution.task_instance.task_name)
        .bind(&execution.task_instance.instance_id)
        .bind(&execution.task_instance.data)
        .bind(execution.execution_time)
        .bind(execution.picked)
        .bind(&execution.picked_by)
        .bind(execution.last_heartbeat)
        .bind(execution.last_success)
        .bind(execution.last_failure)
        .bind(execution.consecutive_failures)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("执行记录已存在，跳过创建: {}", execution.id());
            return Ok(false);
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM scheduled_executions \
             WHERE picked = FALSE AND execution_time <= $1 \
             ORDER BY execution_time ASC LIMIT $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self, candidate), fields(execution = %candidate.id(), version = candidate.version))]
    async fn pick(
        &self,
        candidate: &Execution,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Execution>> {
        let row = sqlx::query(&format!(
            "UPDATE scheduled_executions \
             SET picked = TRUE, picked_by = $1, last_heartbeat = $2, version = version + 1 \
             WHERE task_name = $3 AND instance_id = $4 AND version = $5 AND picked = FALSE \
             RETURNING {ALL_COLUMNS}"
        ))
        .bind(&self.scheduler_name)
        .bind(now)
        .bind(&candidate.task_instance.task_name)
        .bind(&candidate.task_instance.instance_id)
        .bind(candidate.version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_execution(&row)?)),
            None => {
                debug!("锁定失败，执行已被占用或已变更: {}", candidate.id());
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, execution), fields(execution = %execution.id()))]
    async fn update_heartbeat(
        &self,
        execution: &Execution,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_executions SET last_heartbeat = $1 \
             WHERE task_name = $2 AND instance_id = $3",
        )
        .bind(now)
        .bind(&execution.task_instance.task_name)
        .bind(&execution.task_instance.instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // 执行可能已在心跳间隙内完成并删除
            debug!("心跳目标不存在: {}", execution.id());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_old_executions(
        &self,
        older_than: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM scheduled_executions \
             WHERE picked = TRUE AND last_heartbeat < $1 \
             ORDER BY last_heartbeat ASC"
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self, execution), fields(execution = %execution.id(), version = execution.version))]
    async fn remove(&self, execution: &Execution) -> SchedulerResult<()> {
        let result = sqlx::query(
            "DELETE FROM scheduled_executions \
             WHERE task_name = $1 AND instance_id = $2 AND version = $3",
        )
        .bind(&execution.task_instance.task_name)
        .bind(&execution.task_instance.instance_id)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("删除失败，版本已变更: {}", execution.id());
            return Err(SchedulerError::VersionConflict {
                task_name: execution.task_instance.task_name.clone(),
                instance_id: execution.task_instance.instance_id.clone(),
                version: execution.version,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, execution), fields(execution = %execution.id(), version = execution.version))]
    async fn reschedule(
        &self,
        execution: &Execution,
        next_execution_time: DateTime<Utc>,
        last_success: Option<DateTime<Utc>>,
        last_failure: Option<DateTime<Utc>>,
        consecutive_failures: i32,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_executions
            SET picked = FALSE, picked_by = NULL, last_heartbeat = NULL,
                execution_time = $1, last_success = $2, last_failure = $3,
                consecutive_failures = $4, version = version + 1
            WHERE task_name = $5 AND instance_id = $6 AND version = $7
            "#,
        )
        .bind(next_execution_time)
        .bind(last_success)
        .bind(last_failure)
        .bind(consecutive_failures)
        .bind(&execution.task_instance.task_name)
        .bind(&execution.task_instance.instance_id)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("重排失败，版本已变更: {}", execution.id());
            return Err(SchedulerError::VersionConflict {
                task_name: execution.task_instance.task_name.clone(),
                instance_id: execution.task_instance.instance_id.clone(),
                version: execution.version,
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(execution = %id))]
    async fn get_execution(&self, id: &ExecutionId) -> SchedulerResult<Option<Execution>> {
        let row = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM scheduled_executions \
             WHERE task_name = $1 AND instance_id = $2"
        ))
        .bind(&id.task_name)
        .bind(&id.instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self))]
    async fn get_scheduled_executions(&self) -> SchedulerResult<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM scheduled_executions \
             WHERE picked = FALSE ORDER BY execution_time ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self))]
    async fn get_executions_failing_longer_than(
        &self,
        duration: Duration,
    ) -> SchedulerResult<Vec<Execution>> {
        let boundary = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.clock.now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let rows = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM scheduled_executions \
             WHERE last_failure IS NOT NULL \
               AND (last_success IS NULL OR last_success < $1)"
        ))
        .bind(boundary)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }
}
