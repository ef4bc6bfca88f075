//! Per-document debouncing of background work

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;

struct PendingTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// Keeps at most one pending timer per URI. Scheduling again aborts the
/// pending timer; a timer that fires spawns its work as a detached task, so
/// later edits never cancel work already running.
#[derive(Default)]
pub struct Debouncer {
    pending: Arc<DashMap<Url, PendingTimer>>,
    next_id: AtomicU64,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, uri: Url, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let key = uri.clone();

        // The entry stays locked until the timer is registered, so a timer
        // that fires immediately still finds and removes it
        let entry = self.pending.entry(uri);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove_if(&key, |_, timer| timer.id == id);
            tokio::spawn(work);
        });

        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(PendingTimer { id, handle }).handle.abort();
                tracing::trace!("Rescheduled pending work");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingTimer { id, handle });
            }
        }
    }

    pub fn cancel(&self, uri: &Url) {
        if let Some((_, timer)) = self.pending.remove(uri) {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, uri: &Url) -> bool {
        self.pending
            .get(uri)
            .is_some_and(|timer| !timer.handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        for timer in self.pending.iter() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///project/{}", name)).unwrap()
    }

    #[tokio::test]
    async fn test_bursts_coalesce_to_last() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(None));

        for edit in 0..5 {
            let runs = Arc::clone(&runs);
            let last = Arc::clone(&last);
            debouncer.schedule(uri("a.yml"), Duration::from_millis(50), async move {
                runs.fetch_add(1, Ordering::SeqCst);
                *last.lock().unwrap() = Some(edit);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(debouncer.is_pending(&uri("a.yml")));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), Some(4));
        assert!(!debouncer.is_pending(&uri("a.yml")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timer_firing_at_once_leaves_nothing_pending() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for name in ["a.yml", "b.yml", "c.yml"] {
            let runs = Arc::clone(&runs);
            debouncer.schedule(uri(name), Duration::ZERO, async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(debouncer.pending.is_empty());
    }

    #[tokio::test]
    async fn test_uris_are_independent() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for name in ["a.yml", "b.yml"] {
            let runs = Arc::clone(&runs);
            debouncer.schedule(uri(name), Duration::from_millis(20), async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        debouncer.schedule(uri("a.yml"), Duration::from_millis(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel(&uri("a.yml"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
