//! Singleton registry
//!
//! Maps a [`SingletonKey`] to the instance built for it. Every key owns a
//! `OnceCell` slot: the first caller runs the creation, concurrent callers for
//! the same key block on the cell and receive the same instance. Entries live
//! as long as the registry; there is no eviction.

use crate::value::{Fingerprint, ObjectRef};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Identity of a cached singleton
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SingletonKey {
    /// Concrete type that was constructed
    pub type_name: String,
    /// Qualifier of the original request
    pub qualifier: Option<String>,
    /// Fingerprint of the caller's explicit arguments
    pub fingerprint: Fingerprint,
}

impl SingletonKey {
    pub fn new(
        type_name: impl Into<String>,
        qualifier: Option<&str>,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            qualifier: qualifier.map(str::to_string),
            fingerprint,
        }
    }

    /// Key for an unqualified request without explicit arguments.
    pub fn plain(type_name: impl Into<String>) -> Self {
        Self::new(type_name, None, Fingerprint::empty())
    }
}

impl fmt::Display for SingletonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)?;
        if let Some(q) = &self.qualifier {
            write!(f, "#{q}")?;
        }
        if !self.fingerprint.as_str().is_empty() {
            write!(f, "({})", self.fingerprint)?;
        }
        Ok(())
    }
}

/// Result of a creation run under a registry slot
#[derive(Debug)]
pub enum Creation {
    /// Cache the instance under the key
    Store(ObjectRef),
    /// Hand the instance to this caller only (e.g. an intercepted result)
    Skip(ObjectRef),
}

impl Creation {
    #[inline]
    pub fn into_object(self) -> ObjectRef {
        match self {
            Creation::Store(o) | Creation::Skip(o) => o,
        }
    }
}

enum InitError {
    Failed(DiError),
    Skipped(ObjectRef),
}

type Slot = Arc<OnceCell<ObjectRef>>;

/// Keyed store of built singletons
pub struct SingletonRegistry {
    slots: DashMap<SingletonKey, Slot, RandomState>,
}

impl SingletonRegistry {
    /// Create an empty registry.
    ///
    /// A small shard count keeps creation cheap; resolution graphs rarely
    /// hold more than a few dozen singletons.
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    /// Create with pre-allocated capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self {
            slots: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
        }
    }

    fn slot(&self, key: &SingletonKey) -> Slot {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        // The shard guard must be released before the slot is initialized,
        // creation re-enters the registry for dependencies.
        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }

    /// Cached instance for `key`, if built.
    #[inline]
    pub fn get(&self, key: &SingletonKey) -> Option<ObjectRef> {
        self.slots.get(key).and_then(|slot| slot.value().get().cloned())
    }

    #[inline]
    pub fn contains(&self, key: &SingletonKey) -> bool {
        self.get(key).is_some()
    }

    /// Store a prebuilt instance. Returns `false` if the key was already set.
    pub fn insert(&self, key: SingletonKey, instance: ObjectRef) -> bool {
        let stored = self.slot(&key).set(instance).is_ok();

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            key = %key,
            stored,
            "Registering prebuilt singleton"
        );

        stored
    }

    /// Return the instance for `key`, running `create` if none is cached.
    ///
    /// At most one `create` runs per key at a time; callers racing on the same
    /// key wait for it. A failed or skipped creation leaves the slot empty.
    pub fn get_or_create<F>(&self, key: &SingletonKey, create: F) -> Result<ObjectRef>
    where
        F: FnOnce() -> Result<Creation>,
    {
        let slot = self.slot(key);
        if let Some(instance) = slot.get() {
            #[cfg(feature = "logging")]
            trace!(
                target: "dependency_weaver",
                key = %key,
                "Singleton cache hit"
            );
            return Ok(Arc::clone(instance));
        }

        let outcome = slot.get_or_try_init(|| match create() {
            Ok(Creation::Store(instance)) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "dependency_weaver",
                    key = %key,
                    "Singleton created and cached"
                );
                Ok(instance)
            }
            Ok(Creation::Skip(instance)) => Err(InitError::Skipped(instance)),
            Err(e) => Err(InitError::Failed(e)),
        });

        match outcome {
            Ok(instance) => Ok(Arc::clone(instance)),
            Err(InitError::Skipped(instance)) => Ok(instance),
            Err(InitError::Failed(e)) => Err(e),
        }
    }

    /// Number of built singletons
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value().get().is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of built singletons, sorted.
    pub fn keys(&self) -> Vec<SingletonKey> {
        let mut keys: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.value().get().is_some())
            .map(|s| s.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Args, Object};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_or_create_caches() {
        let registry = SingletonRegistry::new();
        let key = SingletonKey::plain("Fuel");
        let calls = AtomicUsize::new(0);

        let create = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Creation::Store(Object::new("Fuel")))
        };
        let a = registry.get_or_create(&key, create).unwrap();
        let b = registry
            .get_or_create(&key, || panic!("must not create twice"))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_keys_with_different_fingerprints_do_not_collide() {
        let registry = SingletonRegistry::new();
        let a = SingletonKey::new("Db", None, Args::new().with("dsn", "a").fingerprint());
        let b = SingletonKey::new("Db", None, Args::new().with("dsn", "b").fingerprint());

        let first = registry
            .get_or_create(&a, || Ok(Creation::Store(Object::new("Db"))))
            .unwrap();
        let second = registry
            .get_or_create(&b, || Ok(Creation::Store(Object::new("Db"))))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_skipped_and_failed_creations_are_not_cached() {
        let registry = SingletonRegistry::new();
        let key = SingletonKey::new("Repo", Some("cached"), Fingerprint::empty());

        let skipped = registry
            .get_or_create(&key, || Ok(Creation::Skip(Object::new("Repo"))))
            .unwrap();
        assert!(!registry.contains(&key));

        let err = registry
            .get_or_create(&key, || Err(DiError::type_not_found("Repo")))
            .unwrap_err();
        assert!(matches!(err, DiError::TypeNotFound { .. }));
        assert!(registry.is_empty());

        let stored = registry
            .get_or_create(&key, || Ok(Creation::Store(Object::new("Repo"))))
            .unwrap();
        assert!(!Arc::ptr_eq(&skipped, &stored));
        assert!(registry.contains(&key));
    }

    #[test]
    fn test_insert_prebuilt() {
        let registry = SingletonRegistry::new();
        let key = SingletonKey::plain("Resolver");
        assert!(registry.insert(key.clone(), Object::new("Resolver")));
        assert!(!registry.insert(key.clone(), Object::new("Resolver")));
        assert_eq!(registry.keys(), vec![key]);
    }

    #[test]
    fn test_concurrent_first_resolution_constructs_once() {
        let registry = SingletonRegistry::new();
        let key = SingletonKey::plain("Fuel");
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let results: Vec<ObjectRef> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry
                            .get_or_create(&key, || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(10));
                                Ok(Creation::Store(Object::new("Fuel")))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_key_display() {
        let key = SingletonKey::new("Logger", Some("audit"), Fingerprint::empty());
        assert_eq!(key.to_string(), "Logger#audit");
    }
}
