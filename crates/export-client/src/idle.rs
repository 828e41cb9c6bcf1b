use std::time::Duration;

use tokio::time::Instant;

/// Per-session inactivity timer with an explicit lifecycle.
///
/// Nothing runs in the background: callers `touch` on activity and check
/// `expired`, or await [`IdleTimer::wait`].
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Pushes the deadline out. No effect unless started.
    pub fn touch(&mut self) {
        if self.deadline.is_some() {
            self.start();
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves when the deadline passes; never resolves while cancelled.
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
