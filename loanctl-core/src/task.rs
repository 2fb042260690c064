//! Cooperative task supervision, adapted from the reference's `LxTask` /
//! `NotifyOnce` pattern: named, panic-propagating tasks plus a shutdown
//! broadcast the pipeline loops and the scheduler all select against.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A named, join-able task handle. Polling it resolves once the underlying
/// task finishes (normally or via panic), logging either outcome so a
/// silently-dead loop never goes unnoticed.
pub struct LoanctlTask<T> {
    name: Cow<'static, str>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> LoanctlTask<T> {
    pub fn spawn_named<F>(name: impl Into<Cow<'static, str>>, fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(fut);
        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Await completion, logging a panic if one occurred rather than
    /// propagating it, so one dead loop doesn't poison a `select!` over many.
    pub async fn logged(self) -> Cow<'static, str> {
        let name = self.name.clone();
        match self.handle.await {
            Ok(_) => info!(task = %name, "task finished"),
            Err(err) => error!(task = %name, %err, "task panicked"),
        }
        name
    }
}

impl<T> fmt::Debug for LoanctlTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoanctlTask").field("name", &self.name).finish()
    }
}

impl<T> Future for LoanctlTask<T> {
    type Output = Result<T, tokio::task::JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        Pin::new(&mut this.handle).poll(cx)
    }
}

/// Multi-producer, multi-consumer, observe-at-most-once shutdown signal.
/// Every clone can `recv().await` the same signal; sending is idempotent.
#[derive(Clone)]
pub struct ShutdownChannel {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownChannel {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn send(&self) {
        // Ignore the error: it only fires if every receiver (including our
        // own) has been dropped, which can't happen while `self` is alive.
        let _ = self.tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn recv(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

impl Default for ShutdownChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn shutdown_signal_observed_by_all_clones() {
        let mut a = ShutdownChannel::new();
        let mut b = a.clone();
        a.send();
        a.recv().await;
        b.recv().await;
        assert!(a.is_shutting_down());
        assert!(b.is_shutting_down());
    }
}
