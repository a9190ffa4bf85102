use std::future::Future;

/// Spawn a task in the background to run a future.
///
/// Fire-and-forget: the task's output is discarded. Without a runtime to run it on (for example,
/// while a value is dropped outside of any async context), the future is dropped unpolled.
pub(crate) fn spawn<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(fut);
        return;
    }

    #[cfg(feature = "sync")]
    {
        crate::sync::TOKIO_RUNTIME.spawn(fut);
    }
}

/// Run a future in the foreground, blocking on it completing.
#[cfg(feature = "sync")]
pub(crate) fn block_on<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    crate::sync::TOKIO_RUNTIME.block_on(fut)
}
