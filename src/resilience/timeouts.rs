//! Timeout enforcement for socket I/O.
//!
//! Every client and backend read/write goes through [`io_deadline`], which
//! folds an elapsed deadline into an `io::Error` of kind `TimedOut` so callers
//! handle stalls exactly like any other I/O failure.

use std::future::Future;
use std::io;
use std::time::Duration;

/// Run an I/O future under a deadline.
pub async fn io_deadline<T, F>(limit: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("operation timed out after {:?}", limit),
        )),
    }
}
