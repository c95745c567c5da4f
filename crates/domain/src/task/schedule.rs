//! 周期任务的排期策略
//!
//! 只提供基于固定间隔的策略，不解析 cron 表达式。

use chrono::{DateTime, Utc};
use std::time::Duration;

pub trait Schedule: Send + Sync {
    /// 给定参考时间，返回下一次执行时间
    fn next_execution_time(&self, after: DateTime<Utc>) -> DateTime<Utc>;
}

/// 固定间隔
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn of(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn of_seconds(seconds: u64) -> Self {
        Self {
            delay: Duration::from_secs(seconds),
        }
    }
}

impl Schedule for FixedDelay {
    fn next_execution_time(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let delta =
            chrono::Duration::from_std(self.delay).unwrap_or_else(|_| chrono::Duration::max_value());
        after
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
