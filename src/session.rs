//! Process-wide cache for authenticated backend sessions.
//!
//! Authentication is backend-global rather than per VM, so adapters share one
//! session through a [`SessionCache`]. First-time initialisation is
//! serialised under an async mutex: the first caller authenticates and every
//! concurrent caller waits and then receives the cached handle. Reads after
//! initialisation only take a short read lock.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

/// Lazily initialised, resettable session holder.
#[derive(Debug)]
pub struct SessionCache<T> {
    init: Mutex<()>,
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> SessionCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            init: Mutex::const_new(()),
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached session without initialising it.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the cached session, running `init` once if the cache is empty.
    ///
    /// Concurrent callers that find the cache empty queue on the init lock and
    /// re-check it before authenticating, so `init` runs at most once per
    /// reset.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `init`; the cache stays empty.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(existing) = self.get() {
            return Ok(existing);
        }

        let _guard = self.init.lock().await;
        if let Some(existing) = self.get() {
            return Ok(existing);
        }

        let session = Arc::new(init().await?);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Drops the cached session so the next caller re-authenticates.
    pub fn reset(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<T> Default for SessionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
