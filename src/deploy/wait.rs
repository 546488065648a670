//! Cancellable, deadline-bounded polling.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{HalldyllError, Result};

/// Cancellation token observed by every wait in a deployment.
///
/// A token is cancelled when its [`CancelHandle`] fires or when the optional
/// caller deadline passes. Dropping the handle without firing it leaves the
/// token live.
#[derive(Debug, Clone)]
pub struct Cancellation {
    signal: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Fires the [`Cancellation`] it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    signal: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels every clone of the paired token.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }
}

impl Cancellation {
    /// Creates a token and the handle that cancels it.
    #[must_use]
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { signal: tx },
            Self {
                signal: rx,
                deadline: None,
            },
        )
    }

    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self::new().1
    }

    /// Adds a caller deadline, keeping the earlier one if already set.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Adds a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns true if the token was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut signal = self.signal.clone();
        let fired = async move {
            loop {
                if *signal.borrow_and_update() {
                    return;
                }
                if signal.changed().await.is_err() {
                    // handle dropped without firing
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                () = fired => {}
                () = tokio::time::sleep_until(deadline) => {}
            },
            None => fired.await,
        }
    }

    /// Returns `Cancelled` for `stack` if the token has fired.
    ///
    /// # Errors
    ///
    /// Returns [`HalldyllError::Cancelled`] when cancelled.
    pub fn check(&self, stack: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(HalldyllError::Cancelled {
                stack: stack.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

/// Sleeps for `interval` unless the token fires first.
///
/// # Errors
///
/// Returns [`HalldyllError::Cancelled`] when the token fires.
pub async fn sleep(stack: &str, interval: Duration, cancel: &Cancellation) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HalldyllError::Cancelled {
            stack: stack.to_string(),
        }),
        () = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Runs `call` unless the token fires first. The call is dropped on
/// cancellation, including any retry backoff it is sleeping through.
///
/// # Errors
///
/// Returns the call's error, or [`HalldyllError::Cancelled`].
pub async fn cancellable<T, Fut>(stack: &str, cancel: &Cancellation, call: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HalldyllError::Cancelled {
            stack: stack.to_string(),
        }),
        result = call => result,
    }
}

/// A bounded polling loop.
#[derive(Debug, Clone, Copy)]
pub struct Poller<'a> {
    stack: &'a str,
    operation: &'a str,
    interval: Duration,
    timeout: Option<Duration>,
}

impl<'a> Poller<'a> {
    /// Creates a poller for one operation on `stack`.
    #[must_use]
    pub const fn new(stack: &'a str, operation: &'a str, interval: Duration) -> Self {
        Self {
            stack,
            operation,
            interval,
            timeout: None,
        }
    }

    /// Bounds the loop; exceeding it yields [`HalldyllError::Timeout`].
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Calls `check` every interval until it returns `Some`.
    ///
    /// # Errors
    ///
    /// Returns the first check error, [`HalldyllError::Timeout`] once the
    /// bound is exceeded, or [`HalldyllError::Cancelled`].
    pub async fn until<T, F, Fut>(&self, cancel: &Cancellation, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            cancel.check(self.stack)?;
            attempts += 1;

            if let Some(value) = cancellable(self.stack, cancel, check()).await? {
                return Ok(value);
            }

            let waited = started.elapsed();
            if self.timeout.is_some_and(|timeout| waited >= timeout) {
                return Err(HalldyllError::Timeout {
                    stack: self.stack.to_string(),
                    operation: self.operation.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }

            debug!(
                stack = self.stack,
                operation = self.operation,
                attempts,
                "Still waiting"
            );
            sleep(self.stack, self.interval, cancel).await?;
        }
    }
}
