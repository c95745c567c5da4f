//! 可提前唤醒的等待原语
//!
//! 周期循环在两次执行之间停在 `wait` 上。`wake` 幂等，同一等待窗口内的
//! 多次唤醒合并为一次释放；没有等待者时会留下一个许可，让下一次 `wait`
//! 立即返回，唤醒不会丢失。

use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

pub struct Waiter {
    duration: Duration,
    notify: Notify,
}

impl Waiter {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            notify: Notify::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// 睡眠至多一个周期，任意一次 `wake` 会提前结束等待
    pub async fn wait(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {}
            _ = self.notify.notified() => {
                trace!("等待被提前唤醒");
            }
        }
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
