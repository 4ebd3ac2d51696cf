use crate::error::{ReaderError, ReaderResult};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Cooperative stop flag for long-running jobs such as chapter export.
///
/// Clones share the flag; the job polls it between units of work.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self, stage: &'static str) -> ReaderResult<()> {
        if self.is_cancelled() {
            return Err(ReaderError::Cancelled(stage));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_cancellation() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(worker.check_cancelled("export").is_ok());

        token.cancel();
        let err = worker.check_cancelled("export").expect_err("cancelled");
        assert_eq!(err.to_string(), "operation cancelled at stage=export");
    }
}
