//! Per-path append locks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

/// Per-path async locks serializing appends within one transport.
#[derive(Default)]
pub(crate) struct PathLocks {
    locks: Mutex<LockMap>,
}

/// Held while appending to one path. The path's entry is dropped on release
/// when nobody else holds or waits on it.
pub(crate) struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PathLocks {
    pub(crate) async fn lock(&self, path: &Path) -> PathGuard<'_> {
        let lock = self.map().entry(path.to_path_buf()).or_default().clone();
        PathGuard {
            locks: self,
            path: path.to_path_buf(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map();
        let idle = map
            .get(&self.path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            map.remove(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_path_shares_lock() {
        let locks = PathLocks::default();
        let guard = locks.lock(Path::new("/a")).await;

        // A different path is independent.
        let _other = locks.lock(Path::new("/b")).await;

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.lock(Path::new("/a")),
        )
        .await;
        assert!(pending.is_err());

        drop(guard);
        let _again = locks.lock(Path::new("/a")).await;
    }

    #[tokio::test]
    async fn test_released_paths_are_forgotten() {
        let locks = PathLocks::default();
        for i in 0..8 {
            let _guard = locks.lock(&PathBuf::from(format!("/inbox-{i}"))).await;
        }
        assert_eq!(locks.len(), 0);

        let held = locks.lock(Path::new("/a")).await;
        let waiter = async {
            let _next = locks.lock(Path::new("/a")).await;
            locks.len()
        };
        let release = async {
            tokio::task::yield_now().await;
            drop(held);
        };
        let (len_while_waiter_holds, ()) = tokio::join!(waiter, release);
        assert_eq!(len_while_waiter_holds, 1);
        assert_eq!(locks.len(), 0);
    }
}
