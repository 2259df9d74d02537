//! A thin wrapper around an async runtime, currently only backed by
//! `tokio`. The runtime is stashed in a process-wide global, since a
//! single replica or client process only ever needs one.

#[cfg(feature = "async_runtime_tokio")]
mod tokio;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use once_cell::sync::OnceCell;

use crate::bft::error::*;

#[cfg(feature = "async_runtime_tokio")]
static RUNTIME: OnceCell<tokio::Runtime> = OnceCell::new();

/// A handle to a spawned task, yielding its result once it completes.
pub struct JoinHandle<T> {
    #[cfg(feature = "async_runtime_tokio")]
    inner: tokio::JoinHandle<T>,
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        #[cfg(feature = "async_runtime_tokio")]
        {
            Pin::new(&mut self.inner)
                .poll(cx)
                .map(|result| result.simple(ErrorKind::Communication))
        }
    }
}

/// Builds and installs the global runtime. Only the first call takes
/// effect; later calls are no-ops, mirroring `crate::bft::init`.
pub fn init(num_threads: usize) -> Result<()> {
    #[cfg(feature = "async_runtime_tokio")]
    {
        let rt = tokio::init(num_threads).simple(ErrorKind::Communication)?;
        // Already initialized: fine, someone raced us to it.
        let _ = RUNTIME.set(rt);
    }
    Ok(())
}

/// Tears down the global runtime, blocking until all of its spawned
/// tasks have been dropped.
pub fn drop_runtime() -> Result<()> {
    Ok(())
}

/// Spawns an asynchronous task onto the global runtime.
#[cfg(feature = "async_runtime_tokio")]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let inner = RUNTIME
        .get()
        .expect("async runtime not initialized")
        .spawn(future);
    JoinHandle { inner }
}

/// Blocks the current thread on a future, for use outside the runtime
/// (e.g. a synchronous `main`).
#[cfg(feature = "async_runtime_tokio")]
pub fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME
        .get()
        .expect("async runtime not initialized")
        .block_on(future)
}

/// Suspends the calling task for `duration`.
#[cfg(feature = "async_runtime_tokio")]
pub async fn async_sleep(duration: std::time::Duration) {
    ::tokio::time::sleep(duration).await;
}
