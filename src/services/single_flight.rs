//! Collapses concurrent calls for the same key into one execution.
//!
//! The first caller for a key spawns the work as its own task and stores a
//! shared handle to it; later callers clone that handle. The task removes
//! its map entry after it finishes, so a failure reaches every attached
//! waiter and the next caller starts fresh. Dropping a waiter never cancels
//! the work.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

pub type SharedCall<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Error produced when the spawned call itself panicked or was aborted.
pub trait FromJoinError {
    fn from_join_error(err: &tokio::task::JoinError) -> Self;
}

pub struct SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    calls: DashMap<K, SharedCall<T, E>>,
}

/// Handle returned to a caller of [`SingleFlight::join`].
pub struct Joined<T, E> {
    pub call: SharedCall<T, E>,
    /// True for the caller that started the call.
    pub owner: bool,
}

impl<K, T, E> Default for SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + FromJoinError + 'static,
{
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches to the in-flight call for `key`, or starts `make()` if none
    /// is running.
    pub fn join<F, Fut>(self: &Arc<Self>, key: K, make: F) -> Joined<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.calls.entry(key.clone()) {
            Entry::Occupied(existing) => Joined {
                call: existing.get().clone(),
                owner: false,
            },
            Entry::Vacant(slot) => {
                let this = Arc::clone(self);
                let work = make();
                // The removal below waits on this shard's lock, which `slot`
                // holds until the handle is inserted.
                let task = tokio::spawn(async move {
                    let result = work.await;
                    this.calls.remove(&key);
                    result
                });

                let call = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(E::from_join_error(&e)),
                    }
                }
                .boxed()
                .shared();

                slot.insert(call.clone());
                Joined { call, owner: true }
            }
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
