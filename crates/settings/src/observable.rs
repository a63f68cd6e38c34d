//! Observable setting values.
//!
//! An [`Observable`] holds the current value of one setting. Subscribers are
//! called with the current value as soon as they register and again on every
//! change. Registration hands back a [`Subscription`] which deregisters the
//! callback when disposed or dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    next_id: u64,
    observers: Vec<(u64, Callback<T>)>,
}

pub struct Observable<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Observable<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    /// Point-read of the current value. Never blocks on producers.
    pub fn current(&self) -> T {
        lock(&self.inner).value.clone()
    }

    /// Replaces the value and notifies every subscriber.
    pub fn set(&self, value: T) {
        let observers: Vec<Callback<T>> = {
            let mut inner = lock(&self.inner);
            inner.value = value.clone();
            inner.observers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for observer in observers {
            observer(&value);
        }
    }

    /// Registers `callback`, invoking it immediately with the current value.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let (id, current) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, callback.clone()));
            (id, inner.value.clone())
        };
        callback(&current);

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).observers.retain(|(existing, _)| *existing != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).observers.len()
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("subscribers", &inner.observers.len())
            .finish()
    }
}

// A panicking observer must not wedge the setting for everyone else.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owned registration handle. Dropping it deregisters the callback.
#[must_use = "dropping a subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn dispose(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
