//! 基于 metrics 计数器的统计落地
//!
//! 事件枚举与汇聚接口在领域层，这里只负责把事件发布为 metrics 体系里的
//! 计数器和直方图，由应用方安装 exporter。

use metrics::{counter, histogram};

use taskloop_domain::events::{
    CandidateStatsEvent, ExecutionStatsEvent, SchedulerStatsEvent, StatsRegistry,
};
use taskloop_domain::task::ExecutionComplete;

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsStatsRegistry;

impl StatsRegistry for MetricsStatsRegistry {
    fn register_scheduler_event(&self, event: SchedulerStatsEvent) {
        counter!("taskloop_scheduler_events_total", "event" => event.as_str()).increment(1);
    }

    fn register_candidate_event(&self, event: CandidateStatsEvent) {
        counter!("taskloop_candidate_events_total", "event" => event.as_str()).increment(1);
    }

    fn register_execution_event(&self, event: ExecutionStatsEvent) {
        counter!("taskloop_execution_events_total", "event" => event.as_str()).increment(1);
    }

    fn register_completed_execution(&self, completed: &ExecutionComplete) {
        let seconds = completed.duration().num_milliseconds() as f64 / 1000.0;
        histogram!(
            "taskloop_execution_duration_seconds",
            "task" => completed.execution.task_name().to_string()
        )
        .record(seconds);
    }
}
