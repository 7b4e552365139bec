//! Per-scope disposal hooks.

use std::future::Future;
use std::pin::Pin;

/// Future type for disposal operations.
pub(crate) type BoxFutureUnit = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Disposal hooks of one scope partition, executed in LIFO order.
///
/// Async hooks run first (newest first), then sync hooks (newest first).
#[derive(Default)]
pub(crate) struct DisposeBag {
    sync: Vec<Box<dyn FnOnce() + Send>>,
    asyncs: Vec<Box<dyn FnOnce() -> BoxFutureUnit + Send>>,
}

impl DisposeBag {
    pub(crate) fn push_sync(&mut self, f: Box<dyn FnOnce() + Send>) {
        self.sync.push(f);
    }

    pub(crate) fn push_async<Fut, F>(&mut self, f: F)
    where
        Fut: Future<Output = ()> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        self.asyncs.push(Box::new(move || Box::pin(f())));
    }

    /// Runs sync hooks only; async hooks are dropped unrun and counted.
    pub(crate) fn run_sync(mut self) -> usize {
        while let Some(f) = self.sync.pop() {
            (f)();
        }
        self.asyncs.len()
    }

    /// Runs async hooks, then sync hooks.
    pub(crate) async fn run_all(mut self) {
        while let Some(f) = self.asyncs.pop() {
            (f)().await;
        }
        while let Some(f) = self.sync.pop() {
            (f)();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sync.len() + self.asyncs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sync.is_empty() && self.asyncs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn async_hooks_run_before_sync_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bag = DisposeBag::default();

        for name in ["sync-1", "sync-2"] {
            let log = log.clone();
            bag.push_sync(Box::new(move || log.lock().unwrap().push(name)));
        }
        for name in ["async-1", "async-2"] {
            let log = log.clone();
            bag.push_async(move || async move { log.lock().unwrap().push(name) });
        }
        assert_eq!(bag.len(), 4);

        bag.run_all().await;
        assert_eq!(*log.lock().unwrap(), vec!["async-2", "async-1", "sync-2", "sync-1"]);
    }

    #[test]
    fn run_sync_reports_skipped_async_hooks() {
        let mut bag = DisposeBag::default();
        bag.push_async(|| async {});
        bag.push_sync(Box::new(|| {}));
        assert_eq!(bag.run_sync(), 1);
    }
}
