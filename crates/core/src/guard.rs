//! Send-path guard
//!
//! An emit issued while the connection is still connecting waits for the
//! state to change, up to `interval * attempts`.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::state::ConnectionState;

/// Default wait step
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Default number of steps
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// What to do with an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Connection is open, transmit
    Send,
    /// Connection is closing or closed, drop silently
    Drop,
}

/// Bounded wait-for-open policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendGuard {
    interval: Duration,
    attempts: u32,
}

impl Default for SendGuard {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl SendGuard {
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// Total time an emit may wait for the connection to open
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }

    /// Decide whether a message can be sent now, waiting if still connecting
    pub async fn ready(&self, state: &mut watch::Receiver<ConnectionState>) -> Result<Readiness> {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Open => return Ok(Readiness::Send),
            ConnectionState::Closing | ConnectionState::Closed => return Ok(Readiness::Drop),
            ConnectionState::Connecting => {}
        }

        let budget = self.budget();
        tracing::debug!(budget_ms = budget.as_millis() as u64, "Waiting for connection to open");

        let waited = tokio::time::timeout(
            budget,
            state.wait_for(|s| *s != ConnectionState::Connecting),
        )
        .await;

        match waited {
            Ok(Ok(s)) if s.is_open() => Ok(Readiness::Send),
            // Closed during the wait, or the state owner went away
            Ok(_) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::ConnectionTimeout { waited: budget }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateMachine;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_sends_immediately() {
        let sm = StateMachine::new();
        sm.open();
        let result = SendGuard::default().ready(&mut sm.watch()).await.unwrap();
        assert_eq!(result, Readiness::Send);
    }

    #[tokio::test]
    async fn test_closed_drops() {
        let sm = StateMachine::new();
        sm.closed();
        let result = SendGuard::default().ready(&mut sm.watch()).await.unwrap();
        assert_eq!(result, Readiness::Drop);
    }

    #[tokio::test]
    async fn test_closing_drops() {
        let sm = StateMachine::new();
        sm.open();
        sm.closing();
        let result = SendGuard::default().ready(&mut sm.watch()).await.unwrap();
        assert_eq!(result, Readiness::Drop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_within_budget() {
        let sm = Arc::new(StateMachine::new());
        let opener = sm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            opener.open();
        });

        let result = SendGuard::default().ready(&mut sm.watch()).await.unwrap();
        assert_eq!(result, Readiness::Send);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_never_opens() {
        let sm = StateMachine::new();
        let started = tokio::time::Instant::now();

        let result = SendGuard::default().ready(&mut sm.watch()).await;

        assert!(matches!(result, Err(Error::ConnectionTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_wait_fails_fast() {
        let sm = Arc::new(StateMachine::new());
        let closer = sm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            closer.closed();
        });

        let started = tokio::time::Instant::now();
        let result = SendGuard::default().ready(&mut sm.watch()).await;

        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[test]
    fn test_budget() {
        let guard = SendGuard::new(Duration::from_millis(50), 4);
        assert_eq!(guard.budget(), Duration::from_millis(200));
        assert_eq!(SendGuard::default().budget(), Duration::from_secs(2));
    }
}
