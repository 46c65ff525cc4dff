//! # IDs
//! Stable, process-unique identifiers namespaced by a marker type. Scene
//! entities carry these so that derived data (compute graphs, snapshots,
//! arrange write-backs) can refer to them without holding ownership.
//!
//! Use `Id<YourNamespaceTy>::next()` to allocate. Order of IDs within a
//! namespace is increasing, but gaps are allowed.

// Next available value per namespace. A namespace is created lazily the
// first time an ID of that type is requested.
static ID_SERVER: parking_lot::RwLock<
    std::collections::BTreeMap<std::any::TypeId, std::sync::atomic::AtomicU64>,
> = parking_lot::const_rwlock(std::collections::BTreeMap::new());

/// ID unique within this execution of the program.
/// IDs of different namespaces may share a numeric value but are distinct types.
pub struct Id<T: std::any::Any> {
    id: std::num::NonZeroU64,
    // Namespace marker
    _phantom: std::marker::PhantomData<T>,
}
impl<T: std::any::Any> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: std::any::Any> Copy for Id<T> {}
impl<T: std::any::Any> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        // Namespaces already match at compile time.
        self.id == other.id
    }
}
impl<T: std::any::Any> Eq for Id<T> {}
impl<T: std::any::Any> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: std::any::Any> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

// Safety - the marker type is never stored, so a !Send/!Sync T must not
// poison the ID itself.
unsafe impl<T: std::any::Any> Send for Id<T> {}
unsafe impl<T: std::any::Any> Sync for Id<T> {}

impl<T: std::any::Any> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: std::any::Any> Id<T> {
    /// Raw numeric value. Only meaningful when compared within one namespace.
    #[must_use]
    pub fn get(self) -> u64 {
        self.id.get()
    }
    /// Allocate the next ID in this namespace.
    #[must_use]
    pub fn next() -> Self {
        let ty = std::any::TypeId::of::<T>();
        let value = {
            let read = ID_SERVER.upgradable_read();
            if let Some(atomic) = read.get(&ty) {
                atomic.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            } else {
                // First allocation in this namespace - take the write lock.
                // Happens a handful of times over the program's life.
                let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
                write.insert(ty, 2.into());
                1
            }
        };
        // Exhausting u64::MAX IDs one-at-a-time is not a reachable state.
        let Some(id) = std::num::NonZeroU64::new(value) else {
            log::error!("{} ID overflow!", std::any::type_name::<T>());
            std::process::abort();
        };
        Self {
            id,
            _phantom: std::marker::PhantomData,
        }
    }
}
impl<T: std::any::Any> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Unwrap here is safe - rsplit always yields at least one element.
        write!(
            f,
            "{}#{}",
            std::any::type_name::<T>().rsplit("::").next().unwrap(),
            self.id
        )
    }
}
impl<T: std::any::Any> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::Id;

    #[test]
    fn unique_and_increasing() {
        struct Namespace;
        type TestId = Id<Namespace>;

        let a = TestId::next();
        let b = TestId::next();
        let c = TestId::next();
        assert!(a < b && b < c);
        assert_ne!(a, b);
    }
    #[test]
    fn namespaces_are_independent() {
        struct NsA;
        struct NsB;
        // Same numeric start in both namespaces - must not interfere.
        let a = Id::<NsA>::next();
        let b = Id::<NsB>::next();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 1);
    }
}
