//! Handle table
//!
//! Maps guest-visible integer handles to per-handle contexts. Each context
//! sits behind its own async mutex so operations on one handle are
//! serialized while different handles proceed independently.
//!
//! Allocation always advances a counter and skips values that are still
//! live, so a handle value is never handed out twice while its context is
//! in the table, whatever the table's occupancy history.

use crate::error::DriverError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// First handle value handed out. Zero is never a valid handle.
pub const FIRST_HANDLE: u32 = 1;

/// Largest handle value; guests see handles as non-negative `i32`
pub const MAX_HANDLE: u32 = i32::MAX as u32;

/// Shared, lockable context stored under a handle
pub type SharedContext<T> = Arc<Mutex<T>>;

/// Thread-safe registry of live handles
pub struct HandleTable<T> {
    inner: RwLock<TableInner<T>>,
    capacity: usize,
}

struct TableInner<T> {
    entries: HashMap<u32, SharedContext<T>>,
    next: u32,
}

impl<T> TableInner<T> {
    fn advance(&mut self) -> u32 {
        let candidate = self.next;
        self.next = if self.next >= MAX_HANDLE {
            FIRST_HANDLE
        } else {
            self.next + 1
        };
        candidate
    }
}

impl<T> HandleTable<T> {
    /// Create a table holding at most `capacity` live handles
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(TableInner {
                entries: HashMap::new(),
                next: FIRST_HANDLE,
            }),
            capacity: capacity.min(MAX_HANDLE as usize),
        }
    }

    /// Insert `context` under a fresh handle
    pub async fn allocate(&self, context: T) -> Result<u32, DriverError> {
        let mut inner = self.inner.write().await;
        if inner.entries.len() >= self.capacity {
            return Err(DriverError::TooManyHandles(self.capacity));
        }

        // capacity is below the handle range, so a free value always exists
        let handle = loop {
            let candidate = inner.advance();
            if !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.entries.insert(handle, Arc::new(Mutex::new(context)));
        Ok(handle)
    }

    /// Resolve a handle without removing it
    pub async fn lookup(&self, handle: u32) -> Result<SharedContext<T>, DriverError> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(&handle)
            .cloned()
            .ok_or(DriverError::BadHandle(handle))
    }

    /// Remove a handle, returning its context
    pub async fn release(&self, handle: u32) -> Result<SharedContext<T>, DriverError> {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .remove(&handle)
            .ok_or(DriverError::BadHandle(handle))
    }

    /// Number of live handles
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn contains(&self, handle: u32) -> bool {
        self.inner.read().await.entries.contains_key(&handle)
    }

    /// Remove and return every live context
    pub async fn drain(&self) -> Vec<(u32, SharedContext<T>)> {
        let mut inner = self.inner.write().await;
        inner.entries.drain().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_allocate_lookup_release() {
        let table = HandleTable::new(8);
        let h = table.allocate("ctx").await.unwrap();
        assert_eq!(h, FIRST_HANDLE);

        let ctx = table.lookup(h).await.unwrap();
        assert_eq!(*ctx.lock().await, "ctx");
        assert_eq!(table.len().await, 1);

        table.release(h).await.unwrap();
        assert!(table.is_empty().await);
        assert!(matches!(table.lookup(h).await, Err(DriverError::BadHandle(x)) if x == h));
        assert!(matches!(table.release(h).await, Err(DriverError::BadHandle(_))));
    }

    #[tokio::test]
    async fn test_handles_advance_after_table_empties() {
        let table = HandleTable::new(8);
        let a = table.allocate(()).await.unwrap();
        table.release(a).await.unwrap();
        let b = table.allocate(()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let table = HandleTable::new(2);
        table.allocate(1).await.unwrap();
        let h = table.allocate(2).await.unwrap();
        assert!(matches!(
            table.allocate(3).await,
            Err(DriverError::TooManyHandles(2))
        ));

        table.release(h).await.unwrap();
        assert!(table.allocate(3).await.is_ok());
    }

    #[tokio::test]
    async fn test_wraparound_skips_live_handles() {
        let table = HandleTable::new(4);
        let low = table.allocate("low").await.unwrap();
        table.inner.write().await.next = MAX_HANDLE;

        let top = table.allocate("top").await.unwrap();
        assert_eq!(top, MAX_HANDLE);

        // counter wraps to FIRST_HANDLE, which is still live
        let next = table.allocate("next").await.unwrap();
        assert_ne!(next, low);
        assert_eq!(next, FIRST_HANDLE + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocation_is_distinct() {
        let table = Arc::new(HandleTable::new(1024));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move { table.allocate(i).await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            assert!(seen.insert(task.await.unwrap()));
        }
        assert_eq!(table.len().await, 64);
    }

    #[tokio::test]
    async fn test_drain() {
        let table = HandleTable::new(4);
        table.allocate(1).await.unwrap();
        table.allocate(2).await.unwrap();
        assert_eq!(table.drain().await.len(), 2);
        assert!(table.is_empty().await);
    }
}
