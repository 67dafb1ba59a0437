//! Rotating pool of API tokens with per-token rate-limit windows.
//!
//! Each token sits behind its own `tokio::sync::Mutex`. Holding the owned
//! guard is the exclusive-access token: a [`CredentialLease`] is the only way
//! to use or update a credential, and dropping it releases the credential.
//! Selection logic lives in [`CredentialPool::try_acquire`] and never blocks;
//! [`CredentialPool::acquire`] polls it until a deadline.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pinmonl_common::{Error, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate-limit bookkeeping for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// Calls left in the current window.
    pub remaining: i64,
    /// When the provider resets the window.
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateWindow {
    fn exhausted_until(&self, now: DateTime<Utc>) -> bool {
        self.remaining <= 0 && self.reset_at.is_some_and(|reset| reset > now)
    }

    /// Optimistically refill a window whose reset time has passed.
    fn roll_over(&mut self, now: DateTime<Utc>, ceiling: i64) {
        if self.reset_at.is_some_and(|reset| reset <= now) || self.remaining <= 0 {
            self.remaining = ceiling;
            self.reset_at = None;
        }
    }
}

struct Slot {
    token: String,
    window: Arc<Mutex<RateWindow>>,
}

/// Exclusive hold on one credential, returned by [`CredentialPool::acquire`].
pub struct CredentialLease {
    index: usize,
    token: String,
    window: OwnedMutexGuard<RateWindow>,
}

impl CredentialLease {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Position of the credential in the pool, for logging.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn window(&self) -> RateWindow {
        *self.window
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("index", &self.index)
            .field("window", &*self.window)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialStatus {
    pub index: usize,
    pub in_use: bool,
    /// `None` while the credential is held.
    pub window: Option<RateWindow>,
}

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Value `remaining` is reset to when a window rolls over.
    pub ceiling: i64,
    /// Longest [`CredentialPool::acquire`] waits before giving up.
    pub acquire_timeout: Duration,
    /// Sleep between selection attempts while waiting.
    pub poll_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            ceiling: 5000,
            acquire_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct CredentialPool {
    slots: Vec<Slot>,
    cursor: AtomicUsize,
    options: PoolOptions,
}

impl CredentialPool {
    /// Provision one credential per token, each starting with a full window.
    pub fn new<I, S>(tokens: I, options: PoolOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = tokens
            .into_iter()
            .map(|token| Slot {
                token: token.into(),
                window: Arc::new(Mutex::new(RateWindow {
                    remaining: options.ceiling,
                    reset_at: None,
                })),
            })
            .collect();

        Self {
            slots,
            cursor: AtomicUsize::new(0),
            options,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wait for an eligible credential.
    ///
    /// Fails with [`Error::NoCredentialAvailable`] if none frees up within
    /// the configured timeout.
    pub async fn acquire(&self) -> Result<CredentialLease> {
        let deadline = Instant::now() + self.options.acquire_timeout;

        loop {
            if let Some(lease) = self.try_acquire() {
                debug!(credential = lease.index, remaining = lease.window.remaining, "Acquired credential");
                return Ok(lease);
            }

            let now = Instant::now();
            if now >= deadline || self.slots.is_empty() {
                warn!(credentials = self.slots.len(), "No credential available");
                return Err(Error::NoCredentialAvailable);
            }

            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    /// Pick an eligible credential without waiting.
    ///
    /// Candidates are scanned in round-robin order starting after the last
    /// pick. Held credentials and credentials exhausted until a future reset
    /// are skipped. Among the rest the one with the most remaining calls
    /// wins, the earliest in rotation order on a tie.
    pub fn try_acquire(&self) -> Option<CredentialLease> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        let now = Utc::now();
        let mut best: Option<(usize, OwnedMutexGuard<RateWindow>)> = None;

        for offset in 0..n {
            let index = (start + offset) % n;
            let Ok(mut window) = self.slots[index].window.clone().try_lock_owned() else {
                continue;
            };
            if window.exhausted_until(now) {
                continue;
            }
            window.roll_over(now, self.options.ceiling);

            let better = match &best {
                Some((_, current)) => window.remaining > current.remaining,
                None => true,
            };
            if better {
                best = Some((index, window));
            }
        }

        best.map(|(index, window)| CredentialLease {
            index,
            token: self.slots[index].token.clone(),
            window,
        })
    }

    /// Overwrite a held credential's window from provider response headers.
    ///
    /// `None` leaves the corresponding field unchanged.
    pub fn update_from_response(
        &self,
        lease: &mut CredentialLease,
        remaining: Option<i64>,
        reset_at: Option<DateTime<Utc>>,
    ) {
        if let Some(remaining) = remaining {
            lease.window.remaining = remaining;
        }
        if let Some(reset_at) = reset_at {
            lease.window.reset_at = Some(reset_at);
        }
        if lease.window.remaining <= 0 {
            debug!(
                credential = lease.index,
                reset_at = ?lease.window.reset_at,
                "Credential exhausted"
            );
        }
    }

    /// Give a credential back to the pool.
    pub fn release(&self, lease: CredentialLease) {
        debug!(credential = lease.index, remaining = lease.window.remaining, "Released credential");
        drop(lease);
    }

    pub fn status(&self) -> Vec<CredentialStatus> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match slot.window.try_lock() {
                Ok(window) => CredentialStatus {
                    index,
                    in_use: false,
                    window: Some(*window),
                },
                Err(_) => CredentialStatus {
                    index,
                    in_use: true,
                    window: None,
                },
            })
            .collect()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.slots.len())
            .field("options", &self.options)
            .finish()
    }
}
