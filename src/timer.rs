use std::{
    future::pending,
    time::Duration,
};
use tokio::time::{
    Instant,
    sleep_until,
};

/// A single cancelable deadline. Arming replaces any previous deadline, so there is
/// never more than one pending expiry per timer.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the deadline passes and disarms the timer. Never resolves while
    /// disarmed. Cancel safe: dropping the future leaves the timer armed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}
