//! Typed attribute bag scoped to a connection's lifetime.
//!
//! Collaborating layers (the perpetual manager, the initialization layer) hang their own
//! per-connection state here instead of widening the connection type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Key for a value of type `T`. Two keys address the same slot only if both the name and the
/// value type match.
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

type Slot = (&'static str, TypeId);

#[derive(Default)]
pub struct Attributes {
    values: Mutex<HashMap<Slot, Box<dyn Any + Send + Sync>>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot<T: 'static>(key: &AttributeKey<T>) -> Slot {
        (key.name, TypeId::of::<T>())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Slot, Box<dyn Any + Send + Sync>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.lock()
            .get(&Self::slot(key))
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Store `value`, returning the previous one.
    pub fn insert<T>(&self, key: &AttributeKey<T>, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.lock()
            .insert(Self::slot(key), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Return the stored value, creating it with `init` when absent. `init` runs under the bag's
    /// lock and must not touch the same bag.
    pub fn get_or_insert_with<T, F>(&self, key: &AttributeKey<T>, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut values = self.lock();
        let slot = Self::slot(key);
        if let Some(value) = values.get(&slot).and_then(|value| value.downcast_ref::<T>()) {
            return value.clone();
        }
        let value = init();
        values.insert(slot, Box::new(value.clone()));
        value
    }

    pub fn remove<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.lock()
            .remove(&Self::slot(key))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn contains<T: 'static>(&self, key: &AttributeKey<T>) -> bool {
        self.lock().contains_key(&Self::slot(key))
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self.lock().keys().map(|(name, _)| *name).collect();
        f.debug_struct("Attributes").field("keys", &names).finish()
    }
}
