//! Small async helpers for tests

use std::time::Duration;

/// Poll `condition` every 10ms until it returns true or `timeout` elapses.
/// Panics on timeout so failing tests point at the unmet condition.
pub async fn wait_until(timeout: Duration, description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out after {timeout:?} waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
