//! Time and memory budgets for one execution context.
//!
//! The budget is checked at cooperative checkpoints only: unit boundaries and
//! the interpreter's instruction-count hook. Host calls made from script code
//! run to completion before the next checkpoint sees an exceeded limit.

use std::{
    cell::{Cell, RefCell},
    fmt,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use vext_core::format_duration_hms;

/// Executed-instruction interval between time-budget checkpoints.
pub const SANDBOX_INSTRUCTION_CHECKPOINT_INTERVAL: u32 = 32_768;
/// Bytes per megabyte for memory limits expressed in megabytes.
pub const SANDBOX_BYTES_PER_MEGABYTE: usize = 1_048_576;

pub const SANDBOX_TIME_EXCEEDED_REASON_CODE: &str = "sandbox_time_exceeded";
pub const SANDBOX_MEMORY_EXCEEDED_REASON_CODE: &str = "sandbox_memory_exceeded";
pub const SANDBOX_CONTEXT_CANCELLED_REASON_CODE: &str = "sandbox_context_cancelled";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Budget applied to one execution context. `None` means unlimited.
pub struct SandboxLimits {
    pub max_time: Option<Duration>,
    pub max_memory_bytes: Option<usize>,
}

impl SandboxLimits {
    /// Builds limits from whole seconds and megabytes, treating 0 as unlimited.
    pub fn from_seconds_and_megabytes(max_time_secs: u64, max_memory_mb: u64) -> Self {
        let max_memory_bytes = usize::try_from(max_memory_mb)
            .ok()
            .and_then(|mb| mb.checked_mul(SANDBOX_BYTES_PER_MEGABYTE))
            .unwrap_or(usize::MAX);
        Self {
            max_time: (max_time_secs > 0).then(|| Duration::from_secs(max_time_secs)),
            max_memory_bytes: (max_memory_mb > 0).then_some(max_memory_bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Failure caused by the sandbox rather than by the script it was running.
pub struct SandboxError {
    pub reason_code: String,
    pub message: String,
}

impl SandboxError {
    pub fn new(reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.to_string(),
            message: message.into(),
        }
    }

    pub fn time_exceeded(limit: Duration) -> Self {
        Self::new(
            SANDBOX_TIME_EXCEEDED_REASON_CODE,
            format!(
                "script ran over time limit of {}",
                format_duration_hms(limit)
            ),
        )
    }

    pub fn memory_exceeded(limit_bytes: usize) -> Self {
        Self::new(
            SANDBOX_MEMORY_EXCEEDED_REASON_CODE,
            format!("script ran over memory limit of {limit_bytes} bytes"),
        )
    }

    pub fn is_time_exceeded(&self) -> bool {
        self.reason_code == SANDBOX_TIME_EXCEEDED_REASON_CODE
    }

    pub fn is_memory_exceeded(&self) -> bool {
        self.reason_code == SANDBOX_MEMORY_EXCEEDED_REASON_CODE
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.reason_code)
    }
}

impl std::error::Error for SandboxError {}

/// Accumulated budget state shared between the host and interpreter hooks.
///
/// Holds the sandbox error slot. The slot is written once per cancellation and
/// drained by the host after each call into script code.
#[derive(Debug)]
pub struct SandboxBudget {
    limits: SandboxLimits,
    elapsed: Cell<Duration>,
    running_since: Cell<Option<Instant>>,
    cancelled: Cell<bool>,
    pending: RefCell<Option<SandboxError>>,
    cancellation: RefCell<Option<SandboxError>>,
}

impl SandboxBudget {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            limits,
            elapsed: Cell::new(Duration::ZERO),
            running_since: Cell::new(None),
            cancelled: Cell::new(false),
            pending: RefCell::new(None),
            cancellation: RefCell::new(None),
        }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Marks the start of a unit of work and checks the accumulated time.
    pub fn resume(&self) -> Result<(), SandboxError> {
        self.ensure_not_cancelled()?;
        self.running_since.set(Some(Instant::now()));
        self.check_time()
    }

    /// Folds the running interval into the accumulator and stops the clock.
    pub fn pause(&self) {
        self.accumulate();
        self.running_since.set(None);
    }

    /// Adds elapsed wall-clock time since the last measurement and cancels on overrun.
    pub fn check_time(&self) -> Result<(), SandboxError> {
        if self.is_cancelled() {
            return Err(self.current_error());
        }
        self.accumulate();
        match self.limits.max_time {
            Some(limit) if self.elapsed.get() > limit => {
                let error = SandboxError::time_exceeded(limit);
                self.cancel(error.clone());
                Err(error)
            }
            _ => Ok(()),
        }
    }

    /// Records an allocation refusal reported by the interpreter.
    pub fn record_memory_refusal(&self) -> SandboxError {
        let limit = self.limits.max_memory_bytes.unwrap_or(0);
        let error = SandboxError::memory_exceeded(limit);
        self.cancel(error.clone());
        self.current_error()
    }

    /// Sets the cancelled flag. The first cancellation reason wins.
    pub fn cancel(&self, error: SandboxError) {
        if !self.cancelled.replace(true) {
            tracing::debug!(
                reason_code = %error.reason_code,
                elapsed_ms = self.elapsed.get().as_millis() as u64,
                "sandbox cancelled execution context"
            );
            *self.cancellation.borrow_mut() = Some(error.clone());
            *self.pending.borrow_mut() = Some(error);
        }
    }

    /// Drains the pending sandbox error slot.
    pub fn take_error(&self) -> Option<SandboxError> {
        self.pending.borrow_mut().take()
    }

    /// Error reported for work attempted on an already-cancelled context.
    pub fn ensure_not_cancelled(&self) -> Result<(), SandboxError> {
        if !self.is_cancelled() {
            return Ok(());
        }
        Err(self.current_error())
    }

    fn current_error(&self) -> SandboxError {
        if let Some(pending) = self.pending.borrow().as_ref() {
            return pending.clone();
        }
        let reason = self
            .cancellation
            .borrow()
            .as_ref()
            .map(|error| error.message.clone())
            .unwrap_or_else(|| "unknown reason".to_string());
        SandboxError::new(
            SANDBOX_CONTEXT_CANCELLED_REASON_CODE,
            format!("execution context was cancelled earlier: {reason}"),
        )
    }

    fn accumulate(&self) {
        if let Some(since) = self.running_since.get() {
            let now = Instant::now();
            self.elapsed
                .set(self.elapsed.get().saturating_add(now.duration_since(since)));
            self.running_since.set(Some(now));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        SandboxBudget, SandboxError, SandboxLimits, SANDBOX_CONTEXT_CANCELLED_REASON_CODE,
        SANDBOX_TIME_EXCEEDED_REASON_CODE,
    };

    #[test]
    fn unit_limits_from_seconds_and_megabytes_treats_zero_as_unlimited() {
        let limits = SandboxLimits::from_seconds_and_megabytes(0, 0);
        assert_eq!(limits, SandboxLimits::default());

        let limits = SandboxLimits::from_seconds_and_megabytes(3, 2);
        assert_eq!(limits.max_time, Some(Duration::from_secs(3)));
        assert_eq!(limits.max_memory_bytes, Some(2 * 1_048_576));
    }

    #[test]
    fn unit_sandbox_error_messages_render_limits() {
        let time = SandboxError::time_exceeded(Duration::from_secs(65));
        assert_eq!(time.message, "script ran over time limit of 00:01:05");
        assert!(time.is_time_exceeded());
        let memory = SandboxError::memory_exceeded(1_024);
        assert_eq!(memory.message, "script ran over memory limit of 1024 bytes");
        assert!(memory.is_memory_exceeded());
        assert_eq!(
            memory.to_string(),
            "script ran over memory limit of 1024 bytes (sandbox_memory_exceeded)"
        );
    }

    #[test]
    fn functional_budget_cancels_after_time_limit_and_drains_slot_once() {
        let budget = SandboxBudget::new(SandboxLimits {
            max_time: Some(Duration::from_millis(5)),
            max_memory_bytes: None,
        });
        budget.resume().expect("fresh budget");
        std::thread::sleep(Duration::from_millis(20));
        let error = budget.check_time().expect_err("time limit exceeded");
        assert_eq!(error.reason_code, SANDBOX_TIME_EXCEEDED_REASON_CODE);
        assert!(budget.is_cancelled());

        let drained = budget.take_error().expect("pending sandbox error");
        assert_eq!(drained, error);
        assert!(budget.take_error().is_none());

        let again = budget.resume().expect_err("cancelled context refuses work");
        assert_eq!(again.reason_code, SANDBOX_CONTEXT_CANCELLED_REASON_CODE);
        assert!(again.message.contains("time limit"));
    }

    #[test]
    fn regression_budget_ignores_time_spent_between_units() {
        let budget = SandboxBudget::new(SandboxLimits {
            max_time: Some(Duration::from_millis(50)),
            max_memory_bytes: None,
        });
        budget.resume().expect("first unit");
        budget.pause();
        std::thread::sleep(Duration::from_millis(80));
        budget.resume().expect("idle host time is not charged");
        budget.pause();
        assert!(budget.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn regression_first_cancellation_reason_is_kept() {
        let budget = SandboxBudget::new(SandboxLimits {
            max_time: None,
            max_memory_bytes: Some(64),
        });
        let memory = budget.record_memory_refusal();
        budget.cancel(SandboxError::time_exceeded(Duration::from_secs(1)));
        let drained = budget.take_error().expect("pending");
        assert_eq!(drained, memory);
        assert!(drained.is_memory_exceeded());
    }
}
