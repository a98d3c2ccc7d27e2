#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over scoring regions.
//!
//! Builds an R-tree over region footprints and answers the three lookups
//! the simulation engine needs: which regions a polygon overlaps, which
//! region contains a point, and which region is nearest to a point.
//! Also parses region boundaries and candidate footprints from `GeoJSON`
//! `FeatureCollection`s.

use std::collections::BTreeSet;

use geo::{BoundingRect, Closest, ClosestPoint, Contains, MultiPolygon, Point, Polygon, Relate};
use geojson::{GeoJson, JsonValue};
use healthy_city_scoring_models::{Region, RegionId};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use thiserror::Error;

/// Errors that can occur while loading regions.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// `GeoJSON` text could not be parsed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The document is not a `FeatureCollection`.
    #[error("Expected a GeoJSON FeatureCollection, got {found}")]
    NotFeatureCollection {
        /// The top-level object that was found.
        found: &'static str,
    },

    /// Two regions share an identifier.
    #[error("Duplicate region id {0}")]
    DuplicateRegion(RegionId),

    /// A feature has no usable identifier.
    #[error("Feature {index} has no id (expected feature.id or properties.id)")]
    MissingId {
        /// Position of the feature in the collection.
        index: usize,
    },
}

/// A region footprint stored in the R-tree with its position in the
/// caller's region list.
struct RegionEntry {
    idx: usize,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for RegionEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for RegionEntry {
    /// Squared distance from the point to the footprint (zero inside).
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let p = Point::new(point[0], point[1]);
        match self.polygon.closest_point(&p) {
            Closest::Intersection(_) => 0.0,
            Closest::SinglePoint(q) => {
                let dx = q.x() - p.x();
                let dy = q.y() - p.y();
                dx.mul_add(dx, dy * dy)
            }
            Closest::Indeterminate => f64::INFINITY,
        }
    }
}

/// Pre-built spatial index over a region list.
///
/// Lookups return indices into the slice the index was built from, so the
/// caller keeps ownership of the regions.
pub struct RegionIndex {
    tree: RTree<RegionEntry>,
}

impl RegionIndex {
    /// Builds the index. Regions with empty geometry are not indexed.
    #[must_use]
    pub fn build(regions: &[Region]) -> Self {
        let entries: Vec<RegionEntry> = regions
            .iter()
            .enumerate()
            .filter_map(|(idx, region)| {
                let envelope = compute_envelope(&region.geometry)?;
                Some(RegionEntry {
                    idx,
                    envelope,
                    polygon: region.geometry.clone(),
                })
            })
            .collect();

        if entries.len() < regions.len() {
            log::warn!(
                "{} regions have empty geometry and were not indexed",
                regions.len() - entries.len()
            );
        }

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Indices of regions whose footprint overlaps `polygon` in area.
    ///
    /// Pure boundary touches (shared edge or vertex) are not overlaps. The
    /// result is sorted.
    #[must_use]
    pub fn overlapping(&self, polygon: &Polygon<f64>) -> Vec<usize> {
        let Some(rect) = polygon.bounding_rect() else {
            return Vec::new();
        };
        let search = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

        let hits: BTreeSet<usize> = self
            .tree
            .locate_in_envelope_intersecting(&search)
            .filter(|entry| {
                let im = entry.polygon.relate(polygon);
                im.is_intersects() && !im.is_touches()
            })
            .map(|entry| entry.idx)
            .collect();

        hits.into_iter().collect()
    }

    /// Index of the region containing `point`.
    ///
    /// Regions are expected to tile without overlap, so the lowest index
    /// among matches wins.
    #[must_use]
    pub fn containing(&self, point: Point<f64>) -> Option<usize> {
        let query = AABB::from_point([point.x(), point.y()]);
        self.tree
            .locate_in_envelope_intersecting(&query)
            .filter(|entry| entry.polygon.contains(&point))
            .map(|entry| entry.idx)
            .min()
    }

    /// Index of the region whose footprint is closest to `point`.
    #[must_use]
    pub fn nearest(&self, point: Point<f64>) -> Option<usize> {
        self.tree
            .nearest_neighbor(&[point.x(), point.y()])
            .map(|entry| entry.idx)
    }
}

/// Parses regions from a `GeoJSON` `FeatureCollection`.
///
/// The identifier comes from `feature.id` or `properties.id`; optional
/// `name`, `vulnerability` and `population` properties are carried over.
/// Features whose geometry is missing or not a (multi)polygon are skipped
/// with a warning.
///
/// # Errors
///
/// Returns an error if the text is not a `FeatureCollection`, a feature
/// has no identifier, or two features share one.
pub fn regions_from_geojson(text: &str) -> Result<Vec<Region>, SpatialError> {
    let collection = feature_collection(text)?;

    let mut seen = BTreeSet::new();
    let mut regions = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.into_iter().enumerate() {
        let id = feature
            .id
            .as_ref()
            .map(|id| match id {
                geojson::feature::Id::String(s) => s.clone(),
                geojson::feature::Id::Number(n) => n.to_string(),
            })
            .or_else(|| feature.property("id").and_then(json_to_id))
            .ok_or(SpatialError::MissingId { index })?;
        let id = RegionId::new(id);

        let Some(geometry) = feature.geometry.clone().and_then(geometry_to_multipolygon) else {
            log::warn!("Skipping region {id}: geometry is missing or not a polygon");
            continue;
        };

        if !seen.insert(id.clone()) {
            return Err(SpatialError::DuplicateRegion(id));
        }

        let mut region = Region::new(id, geometry);
        region.name = feature
            .property("name")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        region.vulnerability = feature.property("vulnerability").and_then(JsonValue::as_f64);
        region.population = feature.property("population").and_then(JsonValue::as_f64);
        regions.push(region);
    }

    log::info!("Parsed {} regions from GeoJSON", regions.len());
    Ok(regions)
}

/// Parses candidate footprints from a `GeoJSON` `FeatureCollection`.
///
/// Every polygon becomes one footprint, in document order; each part of a
/// multipolygon counts separately. Other geometries are skipped with a
/// warning.
///
/// # Errors
///
/// Returns an error if the text is not a `FeatureCollection`.
pub fn polygons_from_geojson(text: &str) -> Result<Vec<Polygon<f64>>, SpatialError> {
    let collection = feature_collection(text)?;
    let mut polygons = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        match feature.geometry.and_then(geometry_to_multipolygon) {
            Some(mp) => polygons.extend(mp.0),
            None => log::warn!("Skipping feature {index}: geometry is missing or not a polygon"),
        }
    }
    log::info!("Parsed {} polygon(s) from GeoJSON", polygons.len());
    Ok(polygons)
}

fn feature_collection(text: &str) -> Result<geojson::FeatureCollection, SpatialError> {
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(_) => Err(SpatialError::NotFeatureCollection { found: "Feature" }),
        GeoJson::Geometry(_) => Err(SpatialError::NotFeatureCollection { found: "Geometry" }),
    }
}

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
#[must_use]
pub fn geometry_to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

fn json_to_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn square(id: &str, x: f64, y: f64) -> Region {
        Region::new(
            id,
            polygon![
                (x: x, y: y),
                (x: x + 1.0, y: y),
                (x: x + 1.0, y: y + 1.0),
                (x: x, y: y + 1.0),
            ],
        )
    }

    fn grid() -> Vec<Region> {
        vec![
            square("a", 0.0, 0.0),
            square("b", 1.0, 0.0),
            square("c", 0.0, 1.0),
            square("d", 1.0, 1.0),
        ]
    }

    #[test]
    fn overlapping_excludes_boundary_touches() {
        let index = RegionIndex::build(&grid());
        // Exactly covers "a"; shares edges with "b" and "c" and a vertex with "d".
        let footprint = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        assert_eq!(index.overlapping(&footprint), vec![0]);
    }

    #[test]
    fn overlapping_spans_regions() {
        let index = RegionIndex::build(&grid());
        let footprint =
            polygon![(x: 0.5, y: 0.5), (x: 1.5, y: 0.5), (x: 1.5, y: 0.9), (x: 0.5, y: 0.9)];
        assert_eq!(index.overlapping(&footprint), vec![0, 1]);
    }

    #[test]
    fn containing_and_nearest() {
        let index = RegionIndex::build(&grid());
        assert_eq!(index.containing(Point::new(1.5, 1.5)), Some(3));
        assert_eq!(index.containing(Point::new(5.0, 5.0)), None);
        assert_eq!(index.nearest(Point::new(5.0, 0.5)), Some(1));
        assert_eq!(index.nearest(Point::new(-3.0, 1.6)), Some(2));
    }

    #[test]
    fn parses_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "id": "17031010100",
                    "properties": { "name": "Tract 101", "vulnerability": 0.3, "population": 4120 },
                    "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]] }
                },
                {
                    "type": "Feature",
                    "properties": { "id": 42 },
                    "geometry": { "type": "Point", "coordinates": [0, 0] }
                },
                {
                    "type": "Feature",
                    "properties": { "id": 7 },
                    "geometry": { "type": "MultiPolygon", "coordinates": [[[[2,2],[3,2],[3,3],[2,3],[2,2]]]] }
                }
            ]
        }"#;

        let regions = regions_from_geojson(text).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id.as_str(), "17031010100");
        assert_eq!(regions[0].name.as_deref(), Some("Tract 101"));
        assert_eq!(regions[0].vulnerability, Some(0.3));
        assert_eq!(regions[0].population, Some(4120.0));
        assert_eq!(regions[1].id.as_str(), "7");
        assert_eq!(regions[1].vulnerability, None);
        assert_eq!(regions[1].population, None);
    }

    #[test]
    fn candidate_polygons_flatten_multipolygons() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "MultiPolygon", "coordinates": [
                      [[[0,0],[1,0],[1,1],[0,0]]],
                      [[[5,5],[6,5],[6,6],[5,5]]]
                  ] } },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Point", "coordinates": [3, 3] } },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Polygon", "coordinates": [[[2,2],[3,2],[3,3],[2,2]]] } }
            ]
        }"#;

        let polygons = polygons_from_geojson(text).unwrap();
        assert_eq!(polygons.len(), 3);
        assert!((polygons[1].exterior().0[0].x - 5.0).abs() < f64::EPSILON);
        assert!((polygons[2].exterior().0[0].x - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let feature = r#"{ "type": "Feature", "properties": { "id": "x" },
            "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]] } }"#;
        let text = format!(r#"{{ "type": "FeatureCollection", "features": [{feature}, {feature}] }}"#);
        assert!(matches!(
            regions_from_geojson(&text),
            Err(SpatialError::DuplicateRegion(_))
        ));
    }

    #[test]
    fn rejects_bare_geometry() {
        let text = r#"{ "type": "Point", "coordinates": [0, 0] }"#;
        assert!(matches!(
            regions_from_geojson(text),
            Err(SpatialError::NotFeatureCollection { found: "Geometry" })
        ));
    }
}
