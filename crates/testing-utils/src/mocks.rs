//! Mock implementations of the clock and the stats registry

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use taskloop_domain::clock::Clock;
use taskloop_domain::events::{
    CandidateStatsEvent, ExecutionStatsEvent, SchedulerStatsEvent, StatsRegistry,
};
use taskloop_domain::task::ExecutionComplete;

/// Clock that only moves when told to
pub struct SettableClock {
    now: Mutex<DateTime<Utc>>,
}

impl SettableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for SettableClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Stats registry that counts every event, for assertions in tests
#[derive(Default)]
pub struct CountingStatsRegistry {
    scheduler_events: Mutex<HashMap<SchedulerStatsEvent, u64>>,
    candidate_events: Mutex<HashMap<CandidateStatsEvent, u64>>,
    execution_events: Mutex<HashMap<ExecutionStatsEvent, u64>>,
    completed: Mutex<Vec<ExecutionComplete>>,
}

impl CountingStatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduler_count(&self, event: SchedulerStatsEvent) -> u64 {
        *self
            .scheduler_events
            .lock()
            .unwrap()
            .get(&event)
            .unwrap_or(&0)
    }

    pub fn candidate_count(&self, event: CandidateStatsEvent) -> u64 {
        *self
            .candidate_events
            .lock()
            .unwrap()
            .get(&event)
            .unwrap_or(&0)
    }

    pub fn execution_count(&self, event: ExecutionStatsEvent) -> u64 {
        *self
            .execution_events
            .lock()
            .unwrap()
            .get(&event)
            .unwrap_or(&0)
    }

    pub fn completed_executions(&self) -> Vec<ExecutionComplete> {
        self.completed.lock().unwrap().clone()
    }
}

impl StatsRegistry for CountingStatsRegistry {
    fn register_scheduler_event(&self, event: SchedulerStatsEvent) {
        *self
            .scheduler_events
            .lock()
            .unwrap()
            .entry(event)
            .or_insert(0) += 1;
    }

    fn register_candidate_event(&self, event: CandidateStatsEvent) {
        *self
            .candidate_events
            .lock()
            .unwrap()
            .entry(event)
            .or_insert(0) += 1;
    }

    fn register_execution_event(&self, event: ExecutionStatsEvent) {
        *self
            .execution_events
            .lock()
            .unwrap()
            .entry(event)
            .or_insert(0) += 1;
    }

    fn register_completed_execution(&self, completed: &ExecutionComplete) {
        self.completed.lock().unwrap().push(completed.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settable_clock_advances_only_when_told() {
        let start = Utc::now();
        let clock = SettableClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));

        let fixed = start + chrono::Duration::hours(1);
        clock.set(fixed);
        assert_eq!(clock.now(), fixed);
    }

    #[test]
    fn test_counting_stats_registry() {
        let stats = CountingStatsRegistry::new();
        stats.register_scheduler_event(SchedulerStatsEvent::RanExecuteDue);
        stats.register_scheduler_event(SchedulerStatsEvent::RanExecuteDue);
        stats.register_candidate_event(CandidateStatsEvent::Executed);

        assert_eq!(stats.scheduler_count(SchedulerStatsEvent::RanExecuteDue), 2);
        assert_eq!(stats.candidate_count(CandidateStatsEvent::Executed), 1);
        assert_eq!(stats.execution_count(ExecutionStatsEvent::Failed), 0);
    }
}
