use crate::error::EngineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between the caller and a running
/// pipeline. Stages poll it between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` naming `stage` once cancellation was requested.
    pub fn check(&self, stage: &'static str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check("partition").is_ok());
        other.cancel();
        assert!(matches!(
            token.check("partition"),
            Err(EngineError::Cancelled { stage: "partition" })
        ));
    }
}
