#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Per-key asynchronous mutual exclusion.
//!
//! `KeyedMutex` hands out one exclusive lock per key without allocating a
//! lock for every possible key up front. Entries are reference counted:
//! a key is present in the registry only while somebody holds or waits on
//! its lock, and the last release evicts it synchronously.
//!
//! Two levels of locking are involved. A short-held registry mutex guards
//! the map and every entry's counter; it is never held across an `.await`
//! and no caller code runs under it. The per-key `tokio::sync::Mutex` is
//! held for as long as the caller keeps its [`KeyedGuard`].

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use turnstile_core::LockError;

static GLOBAL: Lazy<KeyedMutex> = Lazy::new(KeyedMutex::new);

struct LockEntry {
    lock: Arc<Mutex<()>>,
    ref_count: usize,
}

#[derive(Default)]
struct Registry {
    entries: std::sync::Mutex<HashMap<String, LockEntry>>,
    idle: Notify,
}

impl Registry {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        // The map is consistent after every statement, so a poisoned guard is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one more holder or waiter for `key`, creating the entry if needed.
    fn reserve(&self, key: &str) -> Result<Arc<Mutex<()>>, LockError> {
        let mut entries = self.entries();

        if let Some(entry) = entries.get_mut(key) {
            entry.ref_count += 1;
            return Ok(Arc::clone(&entry.lock));
        }

        entries
            .try_reserve(1)
            .map_err(|_| LockError::ResourceExhausted)?;

        let lock = Arc::new(Mutex::new(()));
        entries.insert(
            key.to_owned(),
            LockEntry {
                lock: Arc::clone(&lock),
                ref_count: 1,
            },
        );
        Ok(lock)
    }

    /// Drop one holder or waiter for `key`, evicting the entry at zero.
    fn release(&self, key: &str) {
        let mut entries = self.entries();

        let Some(entry) = entries.get_mut(key) else {
            warn!("Released lock for unknown key: {key}");
            return;
        };

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return;
        }

        entries.remove(key);
        let now_empty = entries.is_empty();
        drop(entries);

        if now_empty {
            self.idle.notify_waiters();
        }
    }
}

/// A counted claim on a registry entry, returned on drop.
///
/// Exists from the moment a caller starts waiting, so an abandoned wait
/// (cancelled or dropped future) gives its count back.
struct Reservation {
    registry: Arc<Registry>,
    key: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// Exclusive hold on one key. Dropping it releases the key.
pub struct KeyedGuard {
    // Declared before `_guard`: the count is returned under the registry
    // lock before the per-key lock is released.
    reservation: Reservation,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedGuard {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.reservation.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        debug!("Releasing lock: {}", self.reservation.key);
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard")
            .field("key", &self.reservation.key)
            .finish()
    }
}

/// Registry of per-key exclusive locks. Clones share the same registry.
#[derive(Clone, Default)]
pub struct KeyedMutex {
    registry: Arc<Registry>,
}

impl KeyedMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use and never torn down.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    fn reserve(&self, key: &str) -> Result<(Reservation, Arc<Mutex<()>>), LockError> {
        let lock = self.registry.reserve(key)?;
        let reservation = Reservation {
            registry: Arc::clone(&self.registry),
            key: key.to_owned(),
        };
        Ok((reservation, lock))
    }

    /// Wait until `key` is free and take it.
    ///
    /// Keys other than `key` are never blocked by this call.
    pub async fn lock(&self, key: &str) -> Result<KeyedGuard, LockError> {
        let (reservation, lock) = self.reserve(key)?;
        let guard = lock.lock_owned().await;
        debug!("Acquired lock: {key}");
        Ok(KeyedGuard {
            reservation,
            _guard: guard,
        })
    }

    /// Like [`Self::lock`], but gives up with [`LockError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn lock_with_cancel(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<KeyedGuard, LockError> {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let (reservation, lock) = self.reserve(key)?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Lock wait cancelled: {key}");
                Err(LockError::Cancelled)
            }
            guard = lock.lock_owned() => {
                debug!("Acquired lock: {key}");
                Ok(KeyedGuard {
                    reservation,
                    _guard: guard,
                })
            }
        }
    }

    /// Take `key` only if nobody currently holds it.
    ///
    /// Returns `Ok(None)` when the key is held.
    ///
    /// # Errors
    /// Returns `ResourceExhausted` if the registry cannot grow.
    pub fn try_lock(&self, key: &str) -> Result<Option<KeyedGuard>, LockError> {
        let (reservation, lock) = self.reserve(key)?;
        Ok(lock.try_lock_owned().ok().map(|guard| KeyedGuard {
            reservation,
            _guard: guard,
        }))
    }

    /// Number of keys with at least one holder or waiter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.entries().is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.registry.entries().contains_key(key)
    }

    /// Resolve once no key is held or awaited.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.registry.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for KeyedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("keys", &self.len())
            .finish()
    }
}
