//! Cancellation and deadlines for collection calls
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{MetricsError, Result};

/// Carries cancellation and an optional deadline into [`collect`].
///
/// Clones share the cancellation flag, so a clone handed to another thread
/// can cancel a collection in progress.
///
/// [`collect`]: crate::controller::PullController::collect
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail if the context was cancelled or its deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(MetricsError::Cancelled("context cancelled".to_string()));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(MetricsError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_fails() {
        assert!(Context::background().check().is_ok());
    }

    #[test]
    fn test_cancel_is_shared() {
        let ctx = Context::background();
        let other = ctx.clone();
        other.cancel();
        assert!(matches!(ctx.check(), Err(MetricsError::Cancelled(_))));
    }

    #[test]
    fn test_deadline() {
        let ctx = Context::with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(MetricsError::DeadlineExceeded)));
        assert!(Context::with_timeout(Duration::from_secs(60)).check().is_ok());
    }
}
