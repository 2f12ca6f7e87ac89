use super::hash_table::{RawHashTable, SpaceUsage, TableElement};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::DefaultHashBuilder;

struct Pair<K, V> {
    key: K,
    value: V,
}

impl<K: Eq + Hash, V> TableElement for Pair<K, V> {
    type Key = K;
    fn key(&self) -> &K {
        &self.key
    }
}

/// A Robin-Hood hash map.
pub struct HashMap<K: Eq + Hash, V, S: BuildHasher = DefaultHashBuilder> {
    table: RawHashTable<Pair<K, V>, S>,
}

impl<K: Eq + Hash, V> HashMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K: Eq + Hash, V> Default for HashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> HashMap<K, V, S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self {
            table: RawHashTable::with_hasher(build_hasher),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.get(key).map(|pair| &pair.value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.get_mut(key).map(|pair| &mut pair.value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.get(key).is_some()
    }

    /// Returns the value for `key`, constructing it in place if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        let (pair, _inserted) = self.table.get_or_insert_with(key, move |key| Pair {
            value: make(),
            key,
        });
        &mut pair.value
    }

    /// Inserts a new entry; returns `false` without modification if the key
    /// is already present.
    pub fn add(&mut self, key: K, value: V) -> bool {
        self.table.add(Pair { key, value })
    }

    /// Upserts, returning the previous value if the key was present.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.table.set(Pair { key, value }).map(|pair| pair.value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.remove(key).map(|pair| pair.value)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Iterates entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.table.iter().map(|pair| (&pair.key, &pair.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.table
            .iter_mut()
            .map(|pair| (&pair.key, &mut pair.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.table.iter().map(|pair| &pair.key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.table.iter().map(|pair| &pair.value)
    }

    pub fn num_buckets(&self) -> usize {
        self.table.num_buckets()
    }

    pub fn analyze_space_usage(&self) -> SpaceUsage {
        self.table.analyze_space_usage()
    }
}

impl<K: Eq + Hash + fmt::Debug, V: fmt::Debug, S: BuildHasher> fmt::Debug for HashMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Eq + Hash + Clone, V: Clone, S: BuildHasher + Clone> Clone for HashMap<K, V, S> {
    fn clone(&self) -> Self {
        let mut map = Self::with_hasher(self.hasher_clone());
        for (key, value) in self.iter() {
            map.add(key.clone(), value.clone());
        }
        map
    }
}

impl<K: Eq + Hash, V, S: BuildHasher + Clone> HashMap<K, V, S> {
    fn hasher_clone(&self) -> S {
        self.table.build_hasher().clone()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for HashMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.set(key, value);
        }
        map
    }
}
