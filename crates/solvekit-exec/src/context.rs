use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::ExecError;

/// Running and interrupt flags shared between an executor and its callers.
///
/// Clones share the same flags, so a clone handed to another thread can
/// request an interrupt while actions run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    running: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Create a context that is neither running nor interrupted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Is an execution in progress?
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the running execution to stop before its next action.
    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Has an interrupt been requested?
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Mark the context as running until the returned guard is dropped.
    ///
    /// A pending interrupt is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::AlreadyRunning`] if another guard is alive.
    pub fn start(&self) -> Result<RunningGuard, ExecError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExecError::AlreadyRunning);
        }
        self.interrupt.store(false, Ordering::SeqCst);
        Ok(RunningGuard {
            running: self.running.clone(),
        })
    }
}

/// Clears the running flag of an [`ExecutionContext`] when dropped.
#[derive(Debug)]
pub struct RunningGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_clears_running() -> Result<(), ExecError> {
        let ctx = ExecutionContext::new();
        let other = ctx.clone();
        {
            let _guard = ctx.start()?;
            assert!(other.is_running());
            assert!(matches!(other.start(), Err(ExecError::AlreadyRunning)));
            other.request_interrupt();
            assert!(ctx.is_interrupted());
        }
        assert!(!ctx.is_running());

        let _guard = ctx.start()?;
        assert!(!ctx.is_interrupted());
        Ok(())
    }
}
