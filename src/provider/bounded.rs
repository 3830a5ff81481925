//! Bounded wait around a single fetch attempt.

use crate::error::{ProviderError, SourceError};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fetch` as its own task and wait at most `timeout` for it.
///
/// The task is aborted on timeout and whenever the wait itself is dropped,
/// so a late result can never be observed.
pub(crate) async fn load_bounded<T, F>(timeout: Duration, fetch: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, SourceError>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(fetch));

    match tokio::time::timeout(timeout, &mut task.0).await {
        Ok(Ok(result)) => result.map_err(ProviderError::from),
        Ok(Err(join_err)) => Err(ProviderError::Task(join_err.to_string())),
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}
