use super::hash_table::{RawHashTable, SpaceUsage, TableElement};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::DefaultHashBuilder;

struct SetElement<T>(T);

impl<T: Eq + Hash> TableElement for SetElement<T> {
    type Key = T;
    fn key(&self) -> &T {
        &self.0
    }
}

/// A Robin-Hood hash set.
pub struct HashSet<T: Eq + Hash, S: BuildHasher = DefaultHashBuilder> {
    table: RawHashTable<SetElement<T>, S>,
}

impl<T: Eq + Hash> HashSet<T> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<T: Eq + Hash> Default for HashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash, S: BuildHasher> HashSet<T, S> {
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

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.get(value).is_some()
    }

    /// Inserts `value`; returns `false` without modification if it is
    /// already present.
    pub fn add(&mut self, value: T) -> bool {
        self.table.add(SetElement(value))
    }

    pub fn remove<Q>(&mut self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.remove(value).is_some()
    }

    /// Removes and returns an arbitrary element.
    pub fn pop(&mut self) -> Option<T>
    where
        T: Clone,
    {
        let value = self.table.iter().next().map(|e| e.0.clone())?;
        self.table.remove(&value);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Iterates elements in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.table.iter().map(|element| &element.0)
    }

    pub fn num_buckets(&self) -> usize {
        self.table.num_buckets()
    }

    pub fn analyze_space_usage(&self) -> SpaceUsage {
        self.table.analyze_space_usage()
    }
}

impl<T: Eq + Hash + fmt::Debug, S: BuildHasher> fmt::Debug for HashSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Eq + Hash> FromIterator<T> for HashSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

impl<T: Eq + Hash> Extend<T> for HashSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.add(value);
        }
    }
}
