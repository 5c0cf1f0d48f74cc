use std::future::Future;

use futures_util::future::{AbortHandle, Abortable};
use tokio::task::JoinHandle;

/// Handle to a spawned background task.
///
/// Dropping the handle cancels the task. Cancellation takes effect at the
/// task's next await point; a ledger update already in progress completes.
#[derive(Debug)]
pub struct PollTask {
    name: &'static str,
    abort_handle: AbortHandle,
    join_handle: Option<JoinHandle<()>>,
}

impl PollTask {
    /// Spawn `future` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let join_handle = tokio::spawn(async move {
            if Abortable::new(future, abort_registration).await.is_err() {
                tracing::debug!(task = name, "Task cancelled");
            }
        });
        tracing::debug!(task = name, "Task started");
        Self {
            name,
            abort_handle,
            join_handle: Some(join_handle),
        }
    }

    pub fn cancel(&self) {
        self.abort_handle.abort();
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.join_handle.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(task = self.name, "Task ended abnormally: {e}");
        }
    }

    /// Wait for the task to finish on its own.
    pub async fn finished(mut self) {
        if let Some(handle) = self.join_handle.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(task = self.name, "Task ended abnormally: {e}");
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}
