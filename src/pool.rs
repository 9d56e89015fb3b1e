//! Bounded object pool with scoped checkout.
//!
//! Items are expensive to build (a deflate compressor carries a few hundred
//! KiB of state), so they are reused across requests. A checked-out item is
//! only reachable through its [`Pooled`] guard; dropping the guard resets the
//! item and returns it, so nothing can touch an item after it went back.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// A thread-safe pool of reusable `T`s.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    create: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
}

impl<T> Pool<T> {
    /// `create` builds a fresh item when the pool is empty; `reset` runs on
    /// every item as it is returned. At most `max_idle` items are kept;
    /// extras are dropped.
    pub fn new(
        max_idle: usize,
        create: impl Fn() -> T + Send + Sync + 'static,
        reset: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            create: Box::new(create),
            reset: Box::new(reset),
        }
    }

    /// Takes an idle item, or builds one.
    pub fn checkout(&self) -> Pooled<'_, T> {
        let item = self.idle.lock().pop().unwrap_or_else(|| (self.create)());
        Pooled { pool: self, item: Some(item) }
    }

    /// Number of items currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn give_back(&self, mut item: T) {
        (self.reset)(&mut item);
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

/// A checked-out item. Returns itself to the pool on drop.
pub struct Pooled<'p, T> {
    pool: &'p Pool<T>,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn reuses_and_resets_items() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = Pool::new(
            4,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Vec::<u8>::new()
            },
            |buf: &mut Vec<u8>| buf.clear(),
        );

        {
            let mut buf = pool.checkout();
            buf.extend_from_slice(b"dirty");
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.checkout();
        assert!(buf.is_empty());
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drops_items_beyond_max_idle() {
        let pool = Pool::new(1, Vec::<u8>::new, |_: &mut Vec<u8>| {});
        let a = pool.checkout();
        let b = pool.checkout();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn concurrent_checkouts_get_distinct_items() {
        let pool = Arc::new(Pool::new(8, Vec::<u8>::new, |buf: &mut Vec<u8>| buf.clear()));
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let mut buf = pool.checkout();
                    buf.push(i);
                    assert_eq!(buf.as_slice(), [i]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }
}
