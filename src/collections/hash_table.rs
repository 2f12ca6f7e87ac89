use alloc::vec::Vec;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use core::mem;

/// The high bit of the hash word marks the bucket as occupied; the remaining
/// bits hold the key's hash. An empty bucket stores a zero word.
const OCCUPANCY_BIT: usize = 1 << (usize::BITS - 1);

const MIN_BUCKETS: usize = 8;

/// Occupancy is kept between 35% and 80%: grow when
/// `num_buckets < ceil(n*20/16)` and shrink when `num_buckets > ceil(n*20/7)`.
const MAX_OCCUPANCY_NUM: usize = 16;
const MIN_OCCUPANCY_NUM: usize = 7;
const OCCUPANCY_DEN: usize = 20;

pub(crate) trait TableElement {
    type Key: Eq + Hash;
    fn key(&self) -> &Self::Key;
}

struct Bucket<E> {
    hash_and_occupancy: usize,
    element: Option<E>,
}

impl<E> Bucket<E> {
    const EMPTY: Bucket<E> = Bucket {
        hash_and_occupancy: 0,
        element: None,
    };

    #[inline]
    fn is_occupied(&self) -> bool {
        self.hash_and_occupancy & OCCUPANCY_BIT != 0
    }
}

/// Statistics reported by [`RawHashTable::analyze_space_usage`].
#[derive(Debug, Clone, Copy)]
pub struct SpaceUsage {
    /// Total heap bytes owned by the table's bucket array.
    pub total_bytes: usize,
    /// The longest probe sequence of any present element.
    pub max_probe_count: usize,
    /// Fraction of buckets occupied.
    pub occupancy: f64,
    /// Average probe sequence length over all present elements.
    pub mean_probe_count: f64,
}

/// Robin-Hood open-addressed hash table with power-of-two bucket counts.
///
/// Insertion walks from the ideal bucket, evicting entries that sit closer to
/// their own ideal bucket than the incoming entry does; removal backfills the
/// gap by shifting successors left until an empty or in-place bucket.
pub(crate) struct RawHashTable<E: TableElement, S> {
    buckets: Vec<Bucket<E>>,
    num_elements: usize,
    build_hasher: S,
}

impl<E: TableElement, S: BuildHasher> RawHashTable<E, S> {
    pub(crate) fn with_hasher(build_hasher: S) -> Self {
        Self {
            buckets: Vec::new(),
            num_elements: 0,
            build_hasher,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.num_elements
    }

    #[inline]
    pub(crate) fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn hash_word<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        let hash = self.build_hasher.hash_one(key);
        // Truncation just drops high hash bits.
        #[allow(clippy::cast_possible_truncation)]
        let word = hash as usize;
        word | OCCUPANCY_BIT
    }

    #[inline]
    fn probe_count(&self, index: usize, hash_and_occupancy: usize) -> usize {
        let mask = self.buckets.len() - 1;
        index.wrapping_sub(hash_and_occupancy) & mask
    }

    fn find_index<Q>(&self, hash_and_occupancy: usize, key: &Q) -> Option<usize>
    where
        E::Key: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut index = hash_and_occupancy & mask;
        let mut probe = 0;
        loop {
            let bucket = &self.buckets[index];
            if !bucket.is_occupied() {
                return None;
            }
            // Robin-Hood ordering: once we pass buckets poorer than us, the
            // key cannot be present further along.
            if self.probe_count(index, bucket.hash_and_occupancy) < probe {
                return None;
            }
            if bucket.hash_and_occupancy == hash_and_occupancy
                && bucket.element.as_ref().unwrap().key().borrow() == key
            {
                return Some(index);
            }
            index = (index + 1) & mask;
            probe += 1;
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&E>
    where
        E::Key: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let word = self.hash_word(key);
        self.find_index(word, key)
            .map(|index| self.buckets[index].element.as_ref().unwrap())
    }

    pub(crate) fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut E>
    where
        E::Key: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let word = self.hash_word(key);
        self.find_index(word, key)
            .map(|index| self.buckets[index].element.as_mut().unwrap())
    }

    /// Inserts an element whose key is known to be absent, returning its
    /// bucket index after any eviction cascade.
    fn insert_unique(&mut self, mut word: usize, mut element: E) -> usize {
        let mask = self.buckets.len() - 1;
        let mut index = word & mask;
        let mut probe = 0;
        let mut result = None;
        loop {
            let bucket = &mut self.buckets[index];
            if !bucket.is_occupied() {
                bucket.hash_and_occupancy = word;
                bucket.element = Some(element);
                self.num_elements += 1;
                return result.unwrap_or(index);
            }
            let existing_probe = self.probe_count(index, self.buckets[index].hash_and_occupancy);
            if existing_probe < probe {
                // Evict the richer occupant one bucket to the right and keep
                // cascading with it.
                let bucket = &mut self.buckets[index];
                mem::swap(&mut bucket.hash_and_occupancy, &mut word);
                mem::swap(bucket.element.as_mut().unwrap(), &mut element);
                if result.is_none() {
                    result = Some(index);
                }
                probe = existing_probe;
            }
            index = (index + 1) & mask;
            probe += 1;
        }
    }

    fn rehash(&mut self, new_num_buckets: usize) {
        debug_assert!(new_num_buckets.is_power_of_two());
        let old = mem::replace(&mut self.buckets, Vec::new());
        self.buckets
            .resize_with(new_num_buckets, || Bucket::EMPTY);
        self.num_elements = 0;
        for mut bucket in old {
            if bucket.is_occupied() {
                let element = bucket.element.take().unwrap();
                self.insert_unique(bucket.hash_and_occupancy, element);
            }
        }
    }

    fn grow_if_needed(&mut self) {
        let needed = ceil_div((self.num_elements + 1) * OCCUPANCY_DEN, MAX_OCCUPANCY_NUM);
        if self.buckets.len() < needed {
            let target = needed.next_power_of_two().max(MIN_BUCKETS);
            self.rehash(target);
        }
    }

    fn shrink_if_needed(&mut self) {
        if self.buckets.len() <= MIN_BUCKETS {
            return;
        }
        let upper = ceil_div(self.num_elements * OCCUPANCY_DEN, MIN_OCCUPANCY_NUM);
        if self.buckets.len() > upper {
            let target = ceil_div(self.num_elements * OCCUPANCY_DEN, MAX_OCCUPANCY_NUM)
                .next_power_of_two()
                .max(MIN_BUCKETS);
            if target < self.buckets.len() {
                self.rehash(target);
            }
        }
    }

    pub(crate) fn build_hasher(&self) -> &S {
        &self.build_hasher
    }

    /// Inserts if absent; returns `(element, inserted)`.
    pub(crate) fn get_or_insert_with(
        &mut self,
        key: E::Key,
        make: impl FnOnce(E::Key) -> E,
    ) -> (&mut E, bool) {
        let word = self.hash_word(&key);
        if let Some(index) = self.find_index(word, &key) {
            return (self.buckets[index].element.as_mut().unwrap(), false);
        }
        self.grow_if_needed();
        let index = self.insert_unique(word, make(key));
        (self.buckets[index].element.as_mut().unwrap(), true)
    }

    /// Inserts a new element; returns `false` without modification if the key
    /// is already present.
    pub(crate) fn add(&mut self, element: E) -> bool {
        let word = self.hash_word(element.key());
        if self.find_index(word, element.key()).is_some() {
            return false;
        }
        self.grow_if_needed();
        self.insert_unique(word, element);
        true
    }

    /// Upserts, returning the previous element if the key was present.
    pub(crate) fn set(&mut self, element: E) -> Option<E> {
        let word = self.hash_word(element.key());
        if let Some(index) = self.find_index(word, element.key()) {
            return mem::replace(&mut self.buckets[index].element, Some(element));
        }
        self.grow_if_needed();
        self.insert_unique(word, element);
        None
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<E>
    where
        E::Key: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let word = self.hash_word(key);
        let mut index = self.find_index(word, key)?;
        let removed = self.buckets[index].element.take();
        self.buckets[index].hash_and_occupancy = 0;
        self.num_elements -= 1;

        // Backward-shift deletion: pull successors left until an empty bucket
        // or one already sitting in its ideal spot.
        let mask = self.buckets.len() - 1;
        loop {
            let next = (index + 1) & mask;
            if !self.buckets[next].is_occupied()
                || self.probe_count(next, self.buckets[next].hash_and_occupancy) == 0
            {
                break;
            }
            self.buckets[index].hash_and_occupancy = self.buckets[next].hash_and_occupancy;
            self.buckets[index].element = self.buckets[next].element.take();
            self.buckets[next].hash_and_occupancy = 0;
            index = next;
        }

        self.shrink_if_needed();
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.num_elements = 0;
    }

    /// Visits occupied buckets in bucket order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &E> {
        self.buckets
            .iter()
            .filter_map(|bucket| bucket.element.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut E> {
        self.buckets
            .iter_mut()
            .filter_map(|bucket| bucket.element.as_mut())
    }

    pub(crate) fn analyze_space_usage(&self) -> SpaceUsage {
        let mut max_probe_count = 0;
        let mut total_probes = 0usize;
        for (index, bucket) in self.buckets.iter().enumerate() {
            if bucket.is_occupied() {
                let probe = self.probe_count(index, bucket.hash_and_occupancy);
                max_probe_count = max_probe_count.max(probe);
                total_probes += probe;
            }
        }
        let occupancy = if self.buckets.is_empty() {
            0.0
        } else {
            self.num_elements as f64 / self.buckets.len() as f64
        };
        let mean_probe_count = if self.num_elements == 0 {
            0.0
        } else {
            total_probes as f64 / self.num_elements as f64
        };
        SpaceUsage {
            total_bytes: self.buckets.capacity() * mem::size_of::<Bucket<E>>(),
            max_probe_count,
            occupancy,
            mean_probe_count,
        }
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}
