//! Cancelation context passed to plugin lifecycle calls and manager
//! shutdown.
//!
//! A [`Context`] is cheap to clone. It becomes done when its
//! [`CancelHandle`] fires, when its deadline passes, or when its parent is
//! done.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    parent: Option<Arc<Context>>,
}

/// Fires cancelation for every context derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never done.
    pub fn background() -> Self {
        Self {
            cancel: None,
            deadline: None,
            parent: None,
        }
    }

    /// Child context canceled when the returned handle fires or is dropped.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
            parent: Some(Arc::new(self.clone())),
        };
        (ctx, CancelHandle { tx })
    }

    /// Child context that is done once `timeout` has elapsed.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancel: None,
            deadline: Some(Instant::now() + timeout),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.parent.as_ref().and_then(|p| p.deadline());
        match (self.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_done(&self) -> bool {
        if let Some(rx) = &self.cancel {
            if *rx.borrow() {
                return true;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.parent.as_ref().is_some_and(|p| p.is_done())
    }

    /// `Err(Canceled)` once the context is done.
    pub fn check(&self, source_id: &str) -> Result<(), ConfigError> {
        if self.is_done() {
            Err(ConfigError::canceled(source_id))
        } else {
            Ok(())
        }
    }

    /// Resolves when the context becomes done. Never resolves for
    /// [`Context::background`].
    pub async fn done(&self) {
        let mut receivers = Vec::new();
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(rx) = &ctx.cancel {
                receivers.push(rx.clone());
            }
            current = ctx.parent.as_deref();
        }

        let cancel = async move {
            if receivers.is_empty() {
                std::future::pending::<()>().await;
            }
            let waits = receivers.into_iter().map(|mut rx| {
                Box::pin(async move {
                    // A closed channel means the handle was dropped, which
                    // also cancels.
                    let _ = rx.wait_for(|canceled| *canceled).await;
                })
            });
            futures::future::select_all(waits).await;
        };

        match self.deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = cancel => {}
                }
            }
            None => cancel.await,
        }
    }

    /// Run `fut` until it completes or the context is done.
    pub async fn run<F, T>(&self, source_id: &str, fut: F) -> Result<T, ConfigError>
    where
        F: std::future::Future<Output = T>,
    {
        self.check(source_id)?;
        tokio::select! {
            out = fut => Ok(out),
            _ = self.done() => Err(ConfigError::canceled(source_id)),
        }
    }
}
