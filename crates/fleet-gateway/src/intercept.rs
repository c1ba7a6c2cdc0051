//! Cross-cutting logging and timing for unary RPC calls.
//!
//! These wrappers record the start instant, await the real call, and log
//! the method name, elapsed duration and (on failure) the status code.
//! They never alter the result returned to the caller.

use std::future::Future;
use std::time::Instant;
use tonic::{Code, Status};
use tracing::{debug, error, info, warn};

/// Wrap an outbound unary call to a daemon.
///
/// `DeadlineExceeded` and `Unavailable` are expected, retryable conditions
/// on the client side and log at `warn`; anything else is a genuine fault.
pub async fn outbound<T, F>(method: &'static str, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    let start = Instant::now();
    let result = call.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => debug!("rpc {} ok in {:?}", method, elapsed),
        Err(status) => match status.code() {
            Code::DeadlineExceeded | Code::Unavailable => warn!(
                "rpc {} failed in {:?}: {:?} {}",
                method,
                elapsed,
                status.code(),
                status.message()
            ),
            code => error!(
                "rpc {} failed in {:?}: {:?} {}",
                method,
                elapsed,
                code,
                status.message()
            ),
        },
    }

    result
}

/// Wrap an inbound unary handler on the hub side.
///
/// `InvalidArgument` and `NotFound` are caller mistakes, not server
/// faults, and log at `info`; anything else is unexpected.
pub async fn inbound<T, F>(method: &'static str, handler: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    let start = Instant::now();
    let result = handler.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => debug!("rpc {} handled in {:?}", method, elapsed),
        Err(status) => match status.code() {
            Code::InvalidArgument | Code::NotFound => info!(
                "rpc {} rejected in {:?}: {:?} {}",
                method,
                elapsed,
                status.code(),
                status.message()
            ),
            code => error!(
                "rpc {} failed in {:?}: {:?} {}",
                method,
                elapsed,
                code,
                status.message()
            ),
        },
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_passes_through_ok() {
        let result = outbound("Test", async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_outbound_passes_through_error_unchanged() {
        let result: Result<(), Status> =
            outbound("Test", async { Err(Status::unavailable("down")) }).await;
        let status = result.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "down");
    }

    #[tokio::test]
    async fn test_inbound_passes_through_error_unchanged() {
        let result: Result<(), Status> =
            inbound("Test", async { Err(Status::invalid_argument("bad")) }).await;
        let status = result.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "bad");
    }
}
