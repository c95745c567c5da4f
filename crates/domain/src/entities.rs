//! 核心领域实体
//!
//! 调度器操作的持久化执行记录及其标识类型。实体不依赖具体存储实现，
//! 数据负载对调度器完全不透明。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行记录标识
///
/// `(task_name, instance_id)` 在整个存储中唯一，是执行记录的稳定身份。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId {
    pub task_name: String,
    pub instance_id: String,
}

impl ExecutionId {
    pub fn new(task_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.task_name, self.instance_id)
    }
}

/// 任务实例
///
/// 待执行的任务及其不透明数据负载。负载的序列化方式由应用方决定。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_name: String,
    pub instance_id: String,
    pub data: Option<Vec<u8>>,
}

impl TaskInstance {
    pub fn new(task_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            instance_id: instance_id.into(),
            data: None,
        }
    }

    pub fn with_data(
        task_name: impl Into<String>,
        instance_id: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            instance_id: instance_id.into(),
            data: Some(data),
        }
    }

    pub fn id(&self) -> ExecutionId {
        ExecutionId::new(self.task_name.clone(), self.instance_id.clone())
    }
}

/// 执行记录
///
/// 调度器操作的基本单元。`picked = true` 表示某个调度器节点当前持有锁，
/// 此时 `picked_by` 与 `last_heartbeat` 必定非空。`version` 是乐观并发
/// 控制令牌，每次成功变更递增一次，携带过期版本的变更必须失败。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub task_instance: TaskInstance,
    pub execution_time: DateTime<Utc>,
    pub picked: bool,
    pub picked_by: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub version: i64,
}

impl Execution {
    /// 创建一条新的未锁定执行记录
    pub fn new(task_instance: TaskInstance, execution_time: DateTime<Utc>) -> Self {
        Self {
            task_instance,
            execution_time,
            picked: false,
            picked_by: None,
            last_heartbeat: None,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            version: 1,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.task_instance.id()
    }

    pub fn task_name(&self) -> &str {
        &self.task_instance.task_name
    }

    /// 检查执行是否到期且可被锁定
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.picked && self.execution_time <= now
    }
}

impl std::fmt::Display for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Execution[{}, execution_time={}, picked={}, version={}]",
            self.id(),
            self.execution_time,
            self.picked,
            self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_execution_is_unpicked_at_version_one() {
        let execution = Execution::new(TaskInstance::new("billing", "customer-1"), Utc::now());
        assert!(!execution.picked);
        assert!(execution.picked_by.is_none());
        assert!(execution.last_heartbeat.is_none());
        assert_eq!(execution.consecutive_failures, 0);
        assert_eq!(execution.version, 1);
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut execution =
            Execution::new(TaskInstance::new("billing", "customer-1"), now - Duration::seconds(1));
        assert!(execution.is_due(now));

        execution.execution_time = now + Duration::seconds(10);
        assert!(!execution.is_due(now));

        execution.execution_time = now - Duration::seconds(1);
        execution.picked = true;
        assert!(!execution.is_due(now));
    }

    #[test]
    fn test_id_display() {
        let id = ExecutionId::new("billing", "customer-1");
        assert_eq!(id.to_string(), "billing/customer-1");
    }
}
