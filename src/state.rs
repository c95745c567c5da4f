//! 调度器生命周期状态
//!
//! CREATED → STARTED → SHUTTING_DOWN 的单向状态机。转移一次性生效，
//! 读取方只需要最终一致的视图。

use std::sync::atomic::{AtomicU8, Ordering};

use taskloop_domain::services::SchedulerStateView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Started,
    ShuttingDown,
}

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const SHUTTING_DOWN: u8 = 2;

#[derive(Debug)]
pub struct SchedulerStateHolder {
    state: AtomicU8,
}

impl SchedulerStateHolder {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CREATED),
        }
    }

    pub fn current(&self) -> SchedulerState {
        match self.state.load(Ordering::SeqCst) {
            CREATED => SchedulerState::Created,
            STARTED => SchedulerState::Started,
            _ => SchedulerState::ShuttingDown,
        }
    }

    /// CREATED → STARTED。已进入其他状态时不生效，返回 false
    pub fn set_started(&self) -> bool {
        self.state
            .compare_exchange(CREATED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 单向进入关闭状态
    pub fn set_shutting_down(&self) {
        self.state.store(SHUTTING_DOWN, Ordering::SeqCst);
    }
}

impl Default for SchedulerStateHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerStateView for SchedulerStateHolder {
    fn is_started(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STARTED
    }

    fn is_shutting_down(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SHUTTING_DOWN
    }
}
