//! 到期执行批次的代际记账
//!
//! 每轮到期轮询产生一个批次，携带单调递增的代际号。工作池里排队的任务
//! 在出队时发现自己的批次已被更新一轮轮询取代，就直接丢弃，不再浪费
//! 数据库锁定和线程时间。代际只是节省资源的优化，去重的正确性始终由
//! 存储层的条件更新保证。

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::debug;

/// 剩余在跑的批内任务降到工作池容量的这一比例时，提前触发下一轮轮询
pub const TRIGGER_NEXT_BATCH_WHEN_AVAILABLE_THREADS_RATIO: f64 = 0.5;

pub struct DueExecutionsBatch {
    generation_number: i64,
    executions_left: AtomicI32,
    trigger_threshold: i32,
    poll_was_full: bool,
    stale: AtomicBool,
    triggered_execute_due: AtomicBool,
}

impl DueExecutionsBatch {
    pub fn new(
        threadpool_size: usize,
        generation_number: i64,
        executions_added: usize,
        poll_was_full: bool,
    ) -> Self {
        let trigger_threshold = (threadpool_size as f64
            * (1.0 - TRIGGER_NEXT_BATCH_WHEN_AVAILABLE_THREADS_RATIO))
            .ceil() as i32;
        Self {
            generation_number,
            executions_left: AtomicI32::new(executions_added as i32),
            trigger_threshold,
            poll_was_full,
            stale: AtomicBool::new(false),
            triggered_execute_due: AtomicBool::new(false),
        }
    }

    pub fn generation_number(&self) -> i64 {
        self.generation_number
    }

    /// 批次是否已被更新一轮轮询取代
    pub fn is_older_generation_than(&self, current_generation: i64) -> bool {
        self.generation_number < current_generation
    }

    /// 记录本批次中有任务因过期被丢弃
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn executions_left(&self) -> i32 {
        self.executions_left.load(Ordering::SeqCst)
    }

    /// 每个提交进工作池的任务结束时调用，且只调用一次
    ///
    /// 当上一轮轮询打满、批次未过期且剩余任务数跌到阈值以下时调用
    /// `early_trigger`，整个批次至多触发一次。
    pub fn one_execution_done(&self, early_trigger: impl FnOnce()) {
        let left = self.executions_left.fetch_sub(1, Ordering::SeqCst) - 1;
        if self.poll_was_full
            && left <= self.trigger_threshold
            && !self.stale.load(Ordering::SeqCst)
            && self
                .triggered_execute_due
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            debug!(
                "工作池已有半数空闲，提前触发下一轮到期轮询 (generation {})",
                self.generation_number
            );
            early_trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn test_trigger_threshold_is_half_the_pool_rounded_up() {
        assert_eq!(DueExecutionsBatch::new(4, 1, 4, true).trigger_threshold, 2);
        assert_eq!(DueExecutionsBatch::new(5, 1, 5, true).trigger_threshold, 3);
        assert_eq!(DueExecutionsBatch::new(10, 1, 10, true).trigger_threshold, 5);
        assert_eq!(DueExecutionsBatch::new(1, 1, 1, true).trigger_threshold, 1);
    }

    #[test]
    fn test_generation_comparison() {
        let batch = DueExecutionsBatch::new(4, 7, 4, false);
        assert!(batch.is_older_generation_than(8));
        assert!(!batch.is_older_generation_than(7));
        assert!(!batch.is_older_generation_than(6));
    }

    #[test]
    fn test_early_trigger_fires_exactly_once_when_poll_was_full() {
        let batch = DueExecutionsBatch::new(4, 1, 4, true);
        let triggers = AtomicU32::new(0);

        // 4 个任务全部结束，阈值为 2，只有一次触发
        for _ in 0..4 {
            batch.one_execution_done(|| {
                triggers.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_early_trigger_fires_when_half_the_pool_is_free() {
        let batch = DueExecutionsBatch::new(4, 1, 4, true);
        let triggers = AtomicU32::new(0);

        batch.one_execution_done(|| {
            triggers.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(triggers.load(Ordering::SeqCst), 0);

        batch.one_execution_done(|| {
            triggers.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_trigger_when_poll_was_not_full() {
        let batch = DueExecutionsBatch::new(4, 1, 2, false);
        let triggers = AtomicU32::new(0);
        for _ in 0..2 {
            batch.one_execution_done(|| {
                triggers.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(triggers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_trigger_on_stale_batch() {
        let batch = DueExecutionsBatch::new(4, 1, 4, true);
        batch.mark_stale();
        let triggers = AtomicU32::new(0);
        for _ in 0..4 {
            batch.one_execution_done(|| {
                triggers.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(triggers.load(Ordering::SeqCst), 0);
        assert!(batch.is_stale());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_once_under_concurrency() {
        let batch = Arc::new(DueExecutionsBatch::new(8, 1, 8, true));
        let triggers = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let batch = batch.clone();
            let triggers = triggers.clone();
            handles.push(tokio::spawn(async move {
                batch.one_execution_done(|| {
                    triggers.fetch_add(1, Ordering::SeqCst);
                });
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(triggers.load(Ordering::SeqCst), 1);
        assert_eq!(batch.executions_left(), 0);
    }
}
