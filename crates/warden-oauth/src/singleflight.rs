//! In-process call coalescing
//!
//! Collapses concurrent calls for the same key into one execution whose
//! result every caller receives. The work runs on a spawned task, so it
//! completes for the benefit of the other waiters even when the caller that
//! started it goes away.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Group<T: Clone + Send + 'static> {
    calls: Arc<DashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Default for Group<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for Group<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

/// Removes the in-flight entry even when the work panics, so the key is
/// never wedged.
struct ClearOnDrop<T: Clone + Send + 'static> {
    calls: Arc<DashMap<String, broadcast::Sender<T>>>,
    key: String,
}

impl<T: Clone + Send + 'static> Drop for ClearOnDrop<T> {
    fn drop(&mut self) {
        self.calls.remove(&self.key);
    }
}

impl<T: Clone + Send + 'static> Group<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fut` for `key`, unless a call for the same key is already in
    /// flight, in which case its result is awaited instead. Returns `None`
    /// only when the executing task died without producing a value.
    pub async fn work<F>(&self, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut rx = match self.calls.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().subscribe(),
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                let guard = ClearOnDrop {
                    calls: Arc::clone(&self.calls),
                    key: key.to_string(),
                };
                tokio::spawn(async move {
                    let result = fut.await;
                    // Clear before broadcasting: a caller arriving after the
                    // result is out must start a fresh execution, not
                    // subscribe to a finished one.
                    drop(guard);
                    let _ = tx.send(result);
                });
                rx
            }
        };

        rx.recv().await.ok()
    }

    /// Number of keys currently executing.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
