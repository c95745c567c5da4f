use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("执行记录未找到: {task_name}/{instance_id}")]
    ExecutionNotFound {
        task_name: String,
        instance_id: String,
    },
    #[error("执行记录版本冲突: {task_name}/{instance_id} (version {version})")]
    VersionConflict {
        task_name: String,
        instance_id: String,
        version: i64,
    },
    #[error("执行记录已被节点 {picked_by} 锁定: {task_name}/{instance_id}")]
    ExecutionPicked {
        task_name: String,
        instance_id: String,
        picked_by: String,
    },
    #[error("任务未注册: {name}")]
    UnresolvedTask { name: String },
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn execution_not_found<S: Into<String>>(task_name: S, instance_id: S) -> Self {
        Self::ExecutionNotFound {
            task_name: task_name.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn task_execution_error<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    /// 可以在下一个周期重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_) | SchedulerError::DatabaseOperation(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
