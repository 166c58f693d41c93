use std::collections::BTreeMap;

/// A single time bucket `[start_time, start_time + bin_size)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBin<V> {
    start_time: f64,
    value: V,
}

impl<V> TimeBin<V> {
    #[inline]
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

/// Ordered buckets of fixed width, created on first access.
///
/// Buckets are keyed by their ordinal relative to `origin`, so a given start
/// time maps to exactly one bucket. Buckets are never merged, split or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBinMap<V> {
    bin_size: f64,
    origin: f64,
    bins: BTreeMap<i64, TimeBin<V>>,
}

impl<V> TimeBinMap<V> {
    /// # Panics
    /// Panics if `bin_size` is not a positive finite number; callers validate
    /// configured bin sizes before building maps.
    pub fn new(bin_size: f64) -> Self {
        Self::with_origin(bin_size, 0.0)
    }

    pub fn with_origin(bin_size: f64, origin: f64) -> Self {
        assert!(
            bin_size.is_finite() && bin_size > 0.0,
            "time bin size must be positive, got {bin_size}"
        );
        Self {
            bin_size,
            origin,
            bins: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    #[inline]
    pub fn origin(&self) -> f64 {
        self.origin
    }

    #[inline]
    fn ordinal(&self, time: f64) -> i64 {
        ((time - self.origin) / self.bin_size).floor() as i64
    }

    /// Start of the bucket whose window contains `time`.
    pub fn bin_start(&self, time: f64) -> f64 {
        self.origin + self.ordinal(time) as f64 * self.bin_size
    }

    /// Bucket containing `time`, created with `init` if absent.
    pub fn get_or_insert_with<F>(&mut self, time: f64, init: F) -> &mut TimeBin<V>
    where
        F: FnOnce() -> V,
    {
        let ordinal = self.ordinal(time);
        let start_time = self.origin + ordinal as f64 * self.bin_size;
        self.bins.entry(ordinal).or_insert_with(|| TimeBin {
            start_time,
            value: init(),
        })
    }

    pub fn get(&self, time: f64) -> Option<&TimeBin<V>> {
        self.bins.get(&self.ordinal(time))
    }

    pub fn get_mut(&mut self, time: f64) -> Option<&mut TimeBin<V>> {
        let ordinal = self.ordinal(time);
        self.bins.get_mut(&ordinal)
    }

    pub fn contains(&self, time: f64) -> bool {
        self.bins.contains_key(&self.ordinal(time))
    }

    /// Buckets in ascending start-time order.
    pub fn iter(&self) -> impl Iterator<Item = &TimeBin<V>> + '_ {
        self.bins.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TimeBin<V>> + '_ {
        self.bins.values_mut()
    }

    pub fn into_bins(self) -> impl Iterator<Item = TimeBin<V>> {
        self.bins.into_values()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Build a map from `(time, value)` pairs, folding values that land in the
    /// same bucket with `merge`.
    pub fn from_entries<I, M>(bin_size: f64, origin: f64, entries: I, mut merge: M) -> Self
    where
        I: IntoIterator<Item = (f64, V)>,
        M: FnMut(&mut V, V),
    {
        let mut map = Self::with_origin(bin_size, origin);
        for (time, value) in entries {
            let ordinal = map.ordinal(time);
            match map.bins.get_mut(&ordinal) {
                Some(bin) => merge(&mut bin.value, value),
                None => {
                    let start_time = map.origin + ordinal as f64 * map.bin_size;
                    map.bins.insert(ordinal, TimeBin { start_time, value });
                }
            }
        }
        map
    }
}

impl<V: Default> TimeBinMap<V> {
    pub fn get_or_default(&mut self, time: f64) -> &mut TimeBin<V> {
        self.get_or_insert_with(time, V::default)
    }
}
