//! Bucket allocation and recycling for bulk I/O and batched events.
//!
//! A bucket is the single owner of a contiguous region; handing one to a
//! downstream transfers ownership, and buckets cannot be copied. The
//! recycling source returns bucket storage to a free list when the bucket
//! drops, so the steady-state allocation rate is zero. Sources are shared
//! between producers and consumers and are internally thread-safe.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// A shared pool of reusable objects guarded by a mutex.
pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
}

impl<T: Default> ObjectPool<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
        })
    }

    /// Take an object from the pool, or a fresh default one.
    pub fn check_out(&self) -> T {
        self.free.lock().unwrap().pop().unwrap_or_default()
    }

    /// Return an object to the pool.
    pub fn check_in(&self, object: T) {
        self.free.lock().unwrap().push(object);
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/// A single-owner contiguous buffer of `T`, checked out of a
/// [`BucketSource`].
///
/// Dereferences to a slice. Dropping a recycled bucket returns its storage
/// to the owning source's free list. Buckets are movable but not clonable.
pub struct Bucket<T> {
    data: Vec<T>,
    pool: Option<Arc<ObjectPool<Vec<T>>>>,
}

impl<T> Bucket<T> {
    /// A bucket owning `data` outright, not attached to any pool.
    pub fn detached(data: Vec<T>) -> Self {
        Self { data, pool: None }
    }
}

impl<T> Deref for Bucket<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Bucket<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for Bucket<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut data = std::mem::take(&mut self.data);
            data.clear();
            pool.check_in(data);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq for Bucket<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// Hands out buckets of a requested size.
pub trait BucketSource<T>: Send + Sync {
    fn bucket_of_size(&self, size: usize) -> Bucket<T>;
}

/// A bucket source that recycles storage through a free list.
///
/// Checked-out buckets keep the source alive through their back reference,
/// so they must not be expected to recycle after the last external
/// reference to the source is gone; they simply free instead.
pub struct RecyclingBucketSource<T> {
    pool: Arc<ObjectPool<Vec<T>>>,
}

impl<T: Default + Clone> RecyclingBucketSource<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pool: ObjectPool::new(),
        })
    }
}

impl<T: Default + Clone + Send + Sync> BucketSource<T> for RecyclingBucketSource<T> {
    fn bucket_of_size(&self, size: usize) -> Bucket<T> {
        let mut data = self.pool.check_out();
        data.resize(size, T::default());
        Bucket {
            data,
            pool: Some(self.pool.clone()),
        }
    }
}
