//! Session-scoped cache of sampled raster columns and raster summaries.
//!
//! Entries are stamped with the generation counters of the raster and the
//! region set that produced them. A lookup with a different stamp is a
//! miss, so replacing either input invalidates every dependent entry
//! without any explicit bookkeeping at the call site.

use std::collections::BTreeMap;

use healthy_city_raster::RasterSummary;
use healthy_city_scoring_models::{Feature, RegionId};

/// Generation counters an entry was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Generation of the feature's raster.
    pub raster: u64,
    /// Generation of the region set.
    pub regions: u64,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    stamp: Stamp,
    value: T,
}

/// Per-feature cache owned by a [`crate::session::ScoringSession`].
#[derive(Debug, Clone, Default)]
pub struct SamplingCache {
    columns: BTreeMap<Feature, Entry<BTreeMap<RegionId, Option<f64>>>>,
    summaries: BTreeMap<Feature, Entry<Option<RasterSummary>>>,
    hits: u64,
    misses: u64,
}

impl SamplingCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sampled column for `feature` if it was computed with `stamp`.
    pub fn column(
        &mut self,
        feature: Feature,
        stamp: Stamp,
    ) -> Option<&BTreeMap<RegionId, Option<f64>>> {
        let fresh = self.columns.get(&feature).is_some_and(|e| e.stamp == stamp);
        self.record(fresh);
        if fresh {
            self.columns.get(&feature).map(|e| &e.value)
        } else {
            None
        }
    }

    /// Stores a sampled column.
    pub fn store_column(
        &mut self,
        feature: Feature,
        stamp: Stamp,
        value: BTreeMap<RegionId, Option<f64>>,
    ) {
        self.columns.insert(feature, Entry { stamp, value });
    }

    /// Raster summary for `feature` if it was computed with `stamp`.
    ///
    /// The outer `Option` is the cache lookup; the inner one is the
    /// summary itself, which is `None` for an all-no-data raster.
    pub fn summary(&mut self, feature: Feature, stamp: Stamp) -> Option<Option<RasterSummary>> {
        let cached = self
            .summaries
            .get(&feature)
            .filter(|e| e.stamp.raster == stamp.raster)
            .map(|e| e.value);
        self.record(cached.is_some());
        cached
    }

    /// Stores a raster summary.
    pub fn store_summary(&mut self, feature: Feature, stamp: Stamp, value: Option<RasterSummary>) {
        self.summaries.insert(feature, Entry { stamp, value });
    }

    /// Drops every entry derived from `feature`'s raster.
    pub fn invalidate_feature(&mut self, feature: Feature) {
        self.columns.remove(&feature);
        self.summaries.remove(&feature);
    }

    /// Drops every sampled column; raster summaries do not depend on regions.
    pub fn invalidate_regions(&mut self) {
        self.columns.clear();
    }

    /// Number of lookups answered from the cache.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of lookups that had to recompute.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    const fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: Stamp = Stamp {
        raster: 1,
        regions: 1,
    };

    fn column() -> BTreeMap<RegionId, Option<f64>> {
        BTreeMap::from([(RegionId::from("a"), Some(1.0))])
    }

    #[test]
    fn matching_stamp_hits() {
        let mut cache = SamplingCache::new();
        assert!(cache.column(Feature::Ndvi, STAMP).is_none());
        cache.store_column(Feature::Ndvi, STAMP, column());
        assert_eq!(cache.column(Feature::Ndvi, STAMP), Some(&column()));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn new_raster_generation_is_stale() {
        let mut cache = SamplingCache::new();
        cache.store_column(Feature::Ndvi, STAMP, column());
        let bumped = Stamp { raster: 2, ..STAMP };
        assert!(cache.column(Feature::Ndvi, bumped).is_none());
    }

    #[test]
    fn new_region_generation_keeps_summaries() {
        let mut cache = SamplingCache::new();
        cache.store_column(Feature::Ndvi, STAMP, column());
        cache.store_summary(Feature::Ndvi, STAMP, None);
        let bumped = Stamp { regions: 2, ..STAMP };
        assert!(cache.column(Feature::Ndvi, bumped).is_none());
        assert_eq!(cache.summary(Feature::Ndvi, bumped), Some(None));
    }

    #[test]
    fn invalidate_feature_drops_entries() {
        let mut cache = SamplingCache::new();
        cache.store_column(Feature::Pollutant, STAMP, column());
        cache.invalidate_feature(Feature::Pollutant);
        assert!(cache.column(Feature::Pollutant, STAMP).is_none());
    }
}
