use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{CuratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Reported state of one breaker, for status surfaces.
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub seconds_since_last_failure: Option<u64>,
}

/// Per-dependency circuit breaker.
///
/// Closed counts consecutive failures up to a threshold, Open rejects calls
/// until the reset window elapses, HalfOpen admits exactly one probe: a
/// success closes the breaker and clears the count, a failure reopens it.
/// Concurrent calls while the probe is in flight are rejected immediately.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Run `op` under the breaker. Rejects without invoking `op` when the
    /// breaker is open or a half-open probe is already in flight.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_call()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.reset_timeout {
                    info!(breaker = %self.name, "entering half-open state");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(CuratorError::BreakerOpen(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CuratorError::BreakerOpen(format!("{} (probing)", self.name)))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::HalfOpen {
            info!(breaker = %self.name, "probe succeeded, closing");
            inner.state = BreakerState::Closed;
            inner.probe_in_flight = false;
        }
        inner.failure_count = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.probe_in_flight = false;
            }
            BreakerState::Closed if inner.failure_count >= self.failure_threshold => {
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "failure threshold reached, opening"
                );
                inner.state = BreakerState::Open;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            seconds_since_last_failure: inner.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> Result<()> {
        Err(CuratorError::Internal("boom".into()))
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects() {
        let breaker = CircuitBreaker::new("filmdb", 5, Duration::from_secs(300));

        for _ in 0..5 {
            let _ = breaker.call(|| async { failing() }).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // sixth call rejected without running the closure
        let mut invoked = false;
        let result = breaker
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(CuratorError::BreakerOpen(_))));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new("filmdb", 1, Duration::from_millis(20));
        let _ = breaker.call(|| async { failing() }).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        // first call after the reset window becomes the probe; a concurrent
        // call while it is in flight is rejected
        assert!(breaker.before_call().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(matches!(
            breaker.before_call(),
            Err(CuratorError::BreakerOpen(_))
        ));

        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("identify", 1, Duration::from_millis(20));
        let _ = breaker.call(|| async { failing() }).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let _ = breaker.call(|| async { failing() }).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("identify", 3, Duration::from_secs(300));
        let _ = breaker.call(|| async { failing() }).await;
        let _ = breaker.call(|| async { failing() }).await;
        assert_eq!(breaker.status().failure_count, 2);

        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.status().failure_count, 0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
