//! Viewer callback registry with cancellation handles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned when registering a viewer. Cancelling it stops further
/// updates; dropping it does not.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    token: CancellationToken,
}

impl ViewerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Set of callbacks interested in snapshots of type `T`.
pub struct ViewerRegistry<T> {
    viewers: Mutex<Vec<(CancellationToken, Callback<T>)>>,
}

impl<T> Default for ViewerRegistry<T> {
    fn default() -> Self {
        Self {
            viewers: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ViewerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, callback: F) -> ViewerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        self.viewers
            .lock()
            .push((token.clone(), Arc::new(callback)));
        ViewerHandle { token }
    }

    /// Whether any live viewer is registered, so callers can skip building
    /// a snapshot nobody will see.
    pub fn has_viewers(&self) -> bool {
        let mut viewers = self.viewers.lock();
        viewers.retain(|(token, _)| !token.is_cancelled());
        !viewers.is_empty()
    }

    /// Push a snapshot to every live viewer.
    ///
    /// Callbacks run outside the registry lock, so a viewer may cancel
    /// itself or register another from inside its callback.
    pub fn notify(&self, snapshot: &T) -> usize {
        let live: Vec<Callback<T>> = {
            let mut viewers = self.viewers.lock();
            viewers.retain(|(token, _)| !token.is_cancelled());
            viewers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in &live {
            callback(snapshot);
        }
        live.len()
    }

    /// Cancel every registered viewer.
    pub fn clear(&self) {
        for (token, _) in self.viewers.lock().drain(..) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancelled_viewer_stops_receiving() {
        let registry = ViewerRegistry::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = registry.register(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });

        assert_eq!(registry.notify(&2), 1);
        handle.cancel();
        assert_eq!(registry.notify(&5), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!registry.has_viewers());
    }

    #[test]
    fn test_clear_cancels_outstanding_handles() {
        let registry = ViewerRegistry::<()>::new();
        let handle = registry.register(|_| {});
        registry.clear();
        assert!(handle.is_cancelled());
    }
}
