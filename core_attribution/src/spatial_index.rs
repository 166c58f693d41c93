//! Static spatial indexes over geometries and points.
//!
//! Both indexes are bulk-loaded R-trees and are immutable afterwards, so they
//! can be shared across worker threads without locking. Geometry queries run in
//! two stages: an envelope prefilter against the tree, then an exact predicate
//! evaluated with `geo`.

use geo::{BoundingRect, Coord, Geometry, Intersects, Point, Relate};
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject, AABB};

/// Exact relation between an indexed geometry (subject) and the query geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialPredicate {
    /// Envelope overlap only; no exact refinement.
    EnvelopeOnly,
    Intersects,
    /// Interiors of the two geometries share at least one point.
    Overlaps,
    /// Indexed geometry contains the query geometry.
    Contains,
    /// Indexed geometry covers the query geometry (boundary contact counts).
    Covers,
    /// Indexed geometry is covered by the query geometry.
    CoveredBy,
}

impl SpatialPredicate {
    fn evaluate(self, subject: &Geometry<f64>, query: &Geometry<f64>) -> bool {
        match self {
            SpatialPredicate::EnvelopeOnly => true,
            SpatialPredicate::Intersects => subject.intersects(query),
            SpatialPredicate::Contains => subject.relate(query).is_contains(),
            SpatialPredicate::Overlaps => subject
                .relate(query)
                .matches("T********")
                .unwrap_or(false),
            SpatialPredicate::Covers => subject.relate(query).is_covers(),
            SpatialPredicate::CoveredBy => subject.relate(query).is_coveredby(),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedGeometry<T> {
    item: T,
    geometry: Geometry<f64>,
    envelope: AABB<[f64; 2]>,
}

impl<T> RTreeObject for IndexedGeometry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn envelope_of(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    geometry.bounding_rect().map(|rect| {
        let min = rect.min();
        let max = rect.max();
        AABB::from_corners([min.x, min.y], [max.x, max.y])
    })
}

/// Bulk-built index pairing items with their geometry.
///
/// There is no way to obtain an index without building it, so a query can never
/// run against an unbuilt index.
#[derive(Debug)]
pub struct SpatialIndex<T> {
    tree: RTree<IndexedGeometry<T>>,
    skipped: usize,
}

impl<T> SpatialIndex<T> {
    /// Build the index in one pass. Items whose geometry has no extent (empty
    /// collections) cannot be located and are left out; see [`Self::skipped`].
    pub fn build<I, F>(items: I, geometry_of: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> Geometry<f64>,
    {
        let mut skipped = 0;
        let entries: Vec<_> = items
            .into_iter()
            .filter_map(|item| {
                let geometry = geometry_of(&item);
                match envelope_of(&geometry) {
                    Some(envelope) => Some(IndexedGeometry {
                        item,
                        geometry,
                        envelope,
                    }),
                    None => {
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
            skipped,
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Items whose geometry satisfies `predicate` against `query`.
    ///
    /// Each indexed entry is reported at most once; order is unspecified.
    pub fn query(&self, query: &Geometry<f64>, predicate: SpatialPredicate) -> Vec<&T> {
        let Some(envelope) = envelope_of(query) else {
            return Vec::new();
        };
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|entry| predicate.evaluate(&entry.geometry, query))
            .map(|entry| &entry.item)
            .collect()
    }

    pub fn query_point(&self, point: Coord<f64>, predicate: SpatialPredicate) -> Vec<&T> {
        self.query(&Geometry::Point(Point(point)), predicate)
    }
}

/// Bulk-built nearest-neighbour index over point locations.
#[derive(Debug)]
pub struct PointIndex<T> {
    tree: RTree<GeomWithData<[f64; 2], T>>,
}

impl<T> PointIndex<T> {
    pub fn build<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (Coord<f64>, T)>,
    {
        let entries = points
            .into_iter()
            .map(|(coord, item)| GeomWithData::new([coord.x, coord.y], item))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Closest indexed location and its item.
    pub fn nearest(&self, at: Coord<f64>) -> Option<(Coord<f64>, &T)> {
        self.tree.nearest_neighbor(&[at.x, at.y]).map(|entry| {
            let [x, y] = *entry.geom();
            (Coord { x, y }, &entry.data)
        })
    }

    /// Closest location no farther than `max_distance`.
    pub fn nearest_within(&self, at: Coord<f64>, max_distance: f64) -> Option<(Coord<f64>, &T)> {
        self.nearest(at).filter(|(coord, _)| {
            let dx = coord.x - at.x;
            let dy = coord.y - at.y;
            dx * dx + dy * dy <= max_distance * max_distance
        })
    }
}
