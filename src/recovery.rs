//! Panic recovery utilities.
//!
//! A [`crate::agent::StageExecutor`] is supplied by the caller, not by this
//! crate — a panic inside one must not unwind through the executor loop and
//! abort an otherwise-healthy run. These utilities convert such panics into
//! ordinary [`Error::StageExecution`] values so the executors can route them
//! through the same "agent error" path as any other stage failure.

use crate::types::{Error, Result};
use futures::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a function with panic recovery.
///
/// If the function panics, the panic is captured, logged, and converted
/// to an error.
///
/// # Example
/// ```
/// use pipeline_runtime::recovery::with_recovery;
///
/// let result = with_recovery(|| {
///     // Potentially panicking code
///     Ok(())
/// }, "my_operation");
/// assert!(result.is_ok());
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(operation = operation_name, panic = %panic_msg, "panic_recovered");

            Err(Error::internal(format!(
                "panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Execute an async operation with panic recovery.
///
/// Unlike a naive `catch_unwind` around the future's construction — which
/// cannot observe a panic raised after the first `.await` — this polls the
/// future through [`futures::FutureExt::catch_unwind`], so a panic anywhere
/// in a stage executor's `process()` body is caught regardless of how many
/// suspension points it crosses first.
pub async fn with_recovery_async<F, Fut, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match AssertUnwindSafe(operation()).catch_unwind().await {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(operation = operation_name, panic = %panic_msg, "async_panic_recovered");

            Err(Error::stage_execution(format!(
                "panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_recovery_success() {
        let result = with_recovery(|| Ok(42), "test_operation");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn with_recovery_propagates_error() {
        let result: Result<()> =
            with_recovery(|| Err(Error::validation("test error")), "test_operation");
        assert!(result.is_err());
    }

    #[test]
    fn with_recovery_catches_str_panic() {
        let result: Result<()> = with_recovery(|| panic!("test panic"), "test_operation");
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("panic in test_operation"));
        assert!(err_msg.contains("test panic"));
    }

    #[test]
    fn with_recovery_catches_string_panic() {
        let result: Result<()> =
            with_recovery(|| panic!("{}", "dynamic panic message"), "test_operation");
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("dynamic panic message"));
    }

    #[test]
    fn extract_panic_message_from_str() {
        let payload = catch_unwind(|| panic!("test message")).unwrap_err();
        assert_eq!(extract_panic_message(&payload), "test message");
    }

    #[test]
    fn extract_panic_message_from_string() {
        let payload = catch_unwind(|| panic!("{}", "formatted message")).unwrap_err();
        assert!(extract_panic_message(&payload).contains("formatted message"));
    }

    #[tokio::test]
    async fn with_recovery_async_success() {
        let result = with_recovery_async(|| async { Ok(42) }, "async_test").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_recovery_async_propagates_error() {
        let result: Result<()> =
            with_recovery_async(|| async { Err(Error::validation("async error")) }, "async_test")
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn with_recovery_async_catches_panic_after_await_point() {
        let result: Result<()> = with_recovery_async(
            || async {
                tokio::task::yield_now().await;
                panic!("late panic");
            },
            "async_test",
        )
        .await;

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("late panic"));
    }

    #[test]
    fn with_recovery_preserves_error_details() {
        let result: Result<()> = with_recovery(
            || Err(Error::validation("specific validation error")),
            "test_operation",
        );
        assert!(result.unwrap_err().to_string().contains("specific validation error"));
    }
}
