//! 任务注册表
//!
//! 名称到任务实现的只读查找表，在构造调度器时一次性建立。解析失败是
//! 预期的运行时状态（滚动发布窗口内，数据库里可能已有新任务的执行记录
//! 而本节点还没有对应实现），调用方记录日志后跳过，执行记录保留在库中。

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use taskloop_domain::task::ExecutableTask;

pub struct TaskResolver {
    tasks: HashMap<String, Arc<dyn ExecutableTask>>,
}

impl TaskResolver {
    pub fn new(tasks: Vec<Arc<dyn ExecutableTask>>) -> Self {
        let mut map: HashMap<String, Arc<dyn ExecutableTask>> = HashMap::new();
        for task in tasks {
            let name = task.name().to_string();
            if map.insert(name.clone(), task).is_some() {
                warn!("任务 {name} 注册了多次，保留最后一个实现");
            }
        }
        Self { tasks: map }
    }

    pub fn resolve(&self, task_name: &str) -> Option<Arc<dyn ExecutableTask>> {
        self.tasks.get(task_name).cloned()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloop_testing_utils::builders::TestTask;

    #[test]
    fn test_resolve_known_and_unknown_names() {
        let resolver = TaskResolver::new(vec![
            Arc::new(TestTask::new("billing")),
            Arc::new(TestTask::new("reporting")),
        ]);

        assert!(resolver.resolve("billing").is_some());
        assert!(resolver.resolve("reporting").is_some());
        assert!(resolver.resolve("unknown").is_none());
        assert_eq!(resolver.task_names().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_keeps_last() {
        let resolver = TaskResolver::new(vec![
            Arc::new(TestTask::new("billing")),
            Arc::new(TestTask::new("billing")),
        ]);
        assert_eq!(resolver.task_names(), vec!["billing".to_string()]);
    }
}
