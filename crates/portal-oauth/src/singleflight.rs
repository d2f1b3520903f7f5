//! Per-key single-flight coalescing: a per-key promise map where the
//! first caller installs a
//! pending future, subsequent callers await it, and the resolver clears the
//! entry on settle.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct SingleFlight<K, V> {
    inflight: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self { inflight: DashMap::new() }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `make` for `key`, coalescing concurrent callers onto the same
    /// in-flight future. Every caller (including concurrent ones) observes
    /// the same resolved `V`. The entry clears once the future settles, so
    /// the next call starts a fresh attempt.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_init(make).await.clone();
        // Best-effort cleanup: only remove if this is still the cell we used,
        // so a racing new attempt that already replaced it isn't clobbered.
        self.inflight.remove_if(&key, |_, v| Arc::ptr_eq(v, &cell));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let sf: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.run("token:alpha", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    42u32
                })
                .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert!(results.iter().all(|r| *r == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_each_get_a_fresh_attempt() {
        let sf: SingleFlight<&'static str, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            sf.run("token:beta", || async move {
                calls.fetch_add(1, Ordering::SeqCst)
            })
            .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
