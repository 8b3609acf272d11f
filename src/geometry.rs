//! Geometry normalization and shared measures.
//!
//! Everything downstream assumes the polygons produced here: valid,
//! single-part, non-empty, finite coordinates, one consistent linear unit.

use geo::{
    Area, BooleanOps, BoundingRect, Centroid, MultiPolygon, Point, Polygon, Rect, Validation,
};
use rstar::{RTree, RTreeObject, AABB};

use crate::error::EngineError;
use crate::model::{CandidatePolygon, DroppedGeometry};

/// Below this area a geometry is treated as empty.
const EMPTY_AREA_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Repair and validate raw candidates.
///
/// Non-finite coordinates abort the batch (precondition violation). Invalid
/// polygons are repaired by self-union, which resolves self-intersections
/// into a valid multi-part result; only the largest part is kept. Empty or
/// near-zero-area results are dropped and reported, never fatal.
pub fn normalize(
    candidates: Vec<CandidatePolygon>,
) -> Result<(Vec<CandidatePolygon>, Vec<DroppedGeometry>), EngineError> {
    let mut kept = Vec::with_capacity(candidates.len());
    let mut dropped = Vec::new();

    for (index, candidate) in candidates.into_iter().enumerate() {
        if !coords_finite(&candidate.geometry) {
            return Err(EngineError::NonFiniteGeometry { index });
        }

        let Some(cleaned) = dedup_rings(&candidate.geometry) else {
            dropped.push(DroppedGeometry {
                index,
                reason: "degenerate ring after removing duplicate points".into(),
            });
            continue;
        };

        let repaired = if cleaned.is_valid() {
            cleaned
        } else {
            match repair(&cleaned) {
                Some(poly) => poly,
                None => {
                    dropped.push(DroppedGeometry {
                        index,
                        reason: "empty after validity repair".into(),
                    });
                    continue;
                }
            }
        };

        if polygon_area(&repaired) <= EMPTY_AREA_EPS {
            dropped.push(DroppedGeometry { index, reason: "zero-area geometry".into() });
            continue;
        }

        kept.push(CandidatePolygon {
            geometry: repaired,
            boundary_clarity: candidate.boundary_clarity,
        });
    }

    Ok((kept, dropped))
}

fn coords_finite(poly: &Polygon<f64>) -> bool {
    poly.exterior()
        .coords()
        .chain(poly.interiors().iter().flat_map(|r| r.coords()))
        .all(|c| c.x.is_finite() && c.y.is_finite())
}

/// Drop consecutive duplicate points; `None` if a ring degenerates below a
/// triangle.
fn dedup_rings(poly: &Polygon<f64>) -> Option<Polygon<f64>> {
    fn dedup(ring: &geo::LineString<f64>) -> Option<geo::LineString<f64>> {
        let mut coords: Vec<geo::Coord<f64>> = Vec::with_capacity(ring.0.len());
        for c in &ring.0 {
            if coords.last() != Some(c) {
                coords.push(*c);
            }
        }
        // open the ring: LineString closes it again on Polygon construction
        if coords.len() > 1 && coords.first() == coords.last() {
            coords.pop();
        }
        if coords.len() < 3 {
            return None;
        }
        Some(geo::LineString::from(coords))
    }

    let exterior = dedup(poly.exterior())?;
    let interiors: Vec<_> = poly.interiors().iter().filter_map(dedup).collect();
    Some(Polygon::new(exterior, interiors))
}

/// Standard valid-making repair: union the polygon with itself, which
/// re-nodes self-intersections, then keep the largest resulting part.
pub fn repair(poly: &Polygon<f64>) -> Option<Polygon<f64>> {
    let mp = MultiPolygon::new(vec![poly.clone()]);
    let unioned = mp.union(&mp);
    largest_part(unioned)
}

/// Largest-area part of a multi-polygon.
pub fn largest_part(mp: MultiPolygon<f64>) -> Option<Polygon<f64>> {
    mp.0.into_iter()
        .filter(|p| polygon_area(p) > EMPTY_AREA_EPS)
        .max_by(|a, b| polygon_area(a).total_cmp(&polygon_area(b)))
}

// ---------------------------------------------------------------------------
// Derived measures
// ---------------------------------------------------------------------------

pub fn polygon_area(poly: &Polygon<f64>) -> f64 {
    poly.unsigned_area()
}

/// Total boundary length, holes included.
pub fn perimeter(poly: &Polygon<f64>) -> f64 {
    ring_length(poly.exterior()) + poly.interiors().iter().map(ring_length).sum::<f64>()
}

fn ring_length(ring: &geo::LineString<f64>) -> f64 {
    ring.lines().map(|l| l.start.hypot_to(l.end)).sum()
}

trait HypotTo {
    fn hypot_to(&self, other: geo::Coord<f64>) -> f64;
}

impl HypotTo for geo::Coord<f64> {
    fn hypot_to(&self, other: geo::Coord<f64>) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Isoperimetric quotient `4π·area / perimeter²`: 1.0 for a circle, near 0
/// for slivers.
pub fn iso_quotient(poly: &Polygon<f64>) -> f64 {
    let p = perimeter(poly);
    if p <= 0.0 {
        return 0.0;
    }
    4.0 * std::f64::consts::PI * polygon_area(poly) / (p * p)
}

/// Intersection over union of two polygons.
pub fn iou(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    let intersection = a.intersection(b).unsigned_area();
    let union = a.union(b).unsigned_area();
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

pub fn intersection_area(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    a.intersection(b).unsigned_area()
}

pub fn centroid_xy(poly: &Polygon<f64>) -> (f64, f64) {
    match poly.centroid() {
        Some(p) => (p.x(), p.y()),
        None => (0.0, 0.0),
    }
}

/// Union of a whole parcel set.
pub fn union_all(polys: &[Polygon<f64>]) -> MultiPolygon<f64> {
    let mut acc = MultiPolygon::new(Vec::new());
    for poly in polys {
        acc = acc.union(&MultiPolygon::new(vec![poly.clone()]));
    }
    acc
}

// ---------------------------------------------------------------------------
// Boundary sampling
// ---------------------------------------------------------------------------

/// `n` points spaced uniformly by arc length along the exterior ring.
pub fn sample_boundary(poly: &Polygon<f64>, n: usize) -> Vec<Point<f64>> {
    let segments: Vec<geo::Line<f64>> = poly.exterior().lines().collect();
    let total: f64 = segments.iter().map(|l| l.start.hypot_to(l.end)).sum();
    if total <= 0.0 || n == 0 {
        return Vec::new();
    }

    let step = total / n as f64;
    let mut points = Vec::with_capacity(n);
    let mut seg_iter = segments.iter();
    let mut seg = match seg_iter.next() {
        Some(first) => *first,
        None => return Vec::new(),
    };
    let mut seg_len = seg.start.hypot_to(seg.end);
    let mut seg_start_dist = 0.0;

    for i in 0..n {
        let target = i as f64 * step;
        while target > seg_start_dist + seg_len {
            match seg_iter.next() {
                Some(next) => {
                    seg_start_dist += seg_len;
                    seg = *next;
                    seg_len = seg.start.hypot_to(seg.end);
                }
                None => break,
            }
        }
        let t = if seg_len > 0.0 { ((target - seg_start_dist) / seg_len).clamp(0.0, 1.0) } else { 0.0 };
        points.push(Point::new(
            seg.start.x + t * (seg.end.x - seg.start.x),
            seg.start.y + t * (seg.end.y - seg.start.y),
        ));
    }
    points
}

/// Distance from a point to the nearest segment of a polygon's boundary
/// (exterior and holes).
pub fn point_boundary_distance(point: Point<f64>, poly: &Polygon<f64>) -> f64 {
    let mut best = f64::INFINITY;
    for line in poly
        .exterior()
        .lines()
        .chain(poly.interiors().iter().flat_map(|r| r.lines()))
    {
        let d = point_segment_distance(point, line);
        if d < best {
            best = d;
        }
    }
    best
}

fn point_segment_distance(p: Point<f64>, seg: geo::Line<f64>) -> f64 {
    let (ax, ay) = (seg.start.x, seg.start.y);
    let (bx, by) = (seg.end.x, seg.end.y);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((p.x() - ax) * dx + (p.y() - ay) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (p.x() - cx).hypot(p.y() - cy)
}

/// Symmetric boundary distance: mean nearest-boundary distance of `n`
/// sample points in each direction, averaged.
pub fn boundary_distance(a: &Polygon<f64>, b: &Polygon<f64>, n: usize) -> Option<f64> {
    let pts_a = sample_boundary(a, n);
    let pts_b = sample_boundary(b, n);
    if pts_a.is_empty() || pts_b.is_empty() {
        return None;
    }
    let mean_ab: f64 =
        pts_a.iter().map(|p| point_boundary_distance(*p, b)).sum::<f64>() / pts_a.len() as f64;
    let mean_ba: f64 =
        pts_b.iter().map(|p| point_boundary_distance(*p, a)).sum::<f64>() / pts_b.len() as f64;
    Some((mean_ab + mean_ba) / 2.0)
}

// ---------------------------------------------------------------------------
// Spatial index
// ---------------------------------------------------------------------------

/// An indexed bounding box for R-tree storage.
#[derive(Clone, Debug)]
struct IndexedBounds {
    envelope: AABB<[f64; 2]>,
    index: usize,
}

impl RTreeObject for IndexedBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over parcel bounding boxes. All pairwise geometric tests go
/// through this to restrict candidates to bbox intersections.
pub struct ParcelIndex {
    tree: RTree<IndexedBounds>,
}

impl ParcelIndex {
    pub fn build<'a, I>(polys: I) -> Self
    where
        I: IntoIterator<Item = &'a Polygon<f64>>,
    {
        let entries: Vec<IndexedBounds> = polys
            .into_iter()
            .enumerate()
            .filter_map(|(index, poly)| {
                poly.bounding_rect().map(|rect| IndexedBounds {
                    envelope: rect_to_aabb(rect),
                    index,
                })
            })
            .collect();
        Self { tree: RTree::bulk_load(entries) }
    }

    /// Indices whose bounding box intersects `poly`'s, in ascending order.
    pub fn candidates(&self, poly: &Polygon<f64>) -> Vec<usize> {
        let Some(rect) = poly.bounding_rect() else {
            return Vec::new();
        };
        let mut out: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&rect_to_aabb(rect))
            .map(|e| e.index)
            .collect();
        out.sort_unstable();
        out
    }
}

fn rect_to_aabb(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, LineString};

    pub(crate) fn rect_poly(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        )
    }

    #[test]
    fn area_and_perimeter_of_square() {
        let square = rect_poly(0.0, 0.0, 10.0, 10.0);
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
        assert!((perimeter(&square) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn iso_quotient_square() {
        // 4π·100 / 40² = π/4
        let square = rect_poly(0.0, 0.0, 10.0, 10.0);
        let q = iso_quotient(&square);
        assert!((q - std::f64::consts::FRAC_PI_4).abs() < 1e-9);
    }

    #[test]
    fn iso_quotient_sliver_is_low() {
        let sliver = rect_poly(0.0, 0.0, 100.0, 0.02);
        assert!(iso_quotient(&sliver) < 0.01);
    }

    #[test]
    fn iou_identity_and_disjoint() {
        let a = rect_poly(0.0, 0.0, 10.0, 10.0);
        let b = rect_poly(20.0, 20.0, 30.0, 30.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = rect_poly(0.0, 0.0, 10.0, 10.0);
        let b = rect_poly(5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_nan() {
        let bad = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, f64::NAN), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let err = normalize(vec![CandidatePolygon::new(bad)]).unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteGeometry { index: 0 }));
    }

    #[test]
    fn normalize_drops_degenerate() {
        let line = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let (kept, dropped) = normalize(vec![CandidatePolygon::new(line)]).unwrap();
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].index, 0);
    }

    #[test]
    fn normalize_repairs_bowtie() {
        // self-intersecting hourglass; repair keeps the largest lobe
        let bowtie = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (2.0, 2.0),
                (2.0, 0.0),
                (0.0, 2.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let (kept, dropped) = normalize(vec![CandidatePolygon::new(bowtie)]).unwrap();
        assert!(dropped.is_empty());
        assert_eq!(kept.len(), 1);
        assert!(kept[0].geometry.is_valid());
        let area = polygon_area(&kept[0].geometry);
        assert!(area > 0.1 && area < 2.0, "unexpected repaired area {area}");
    }

    #[test]
    fn normalize_strips_duplicate_points() {
        let poly = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (0.0, 0.0),
                (4.0, 0.0),
                (4.0, 4.0),
                (4.0, 4.0),
                (0.0, 4.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let (kept, _) = normalize(vec![CandidatePolygon::new(poly)]).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].geometry.exterior().0.len(), 5); // closed square
    }

    #[test]
    fn boundary_sampling_count_and_spacing() {
        let square = rect_poly(0.0, 0.0, 10.0, 10.0);
        let pts = sample_boundary(&square, 40);
        assert_eq!(pts.len(), 40);
        // every sample lies on the boundary
        for p in &pts {
            assert!(point_boundary_distance(*p, &square) < 1e-9);
        }
    }

    #[test]
    fn boundary_distance_of_shifted_squares() {
        let a = rect_poly(0.0, 0.0, 10.0, 10.0);
        let b = rect_poly(1.0, 0.0, 11.0, 10.0);
        let d = boundary_distance(&a, &b, 50).unwrap();
        assert!(d > 0.0 && d < 1.0, "distance {d} out of expected band");
    }

    #[test]
    fn index_restricts_candidates() {
        let polys = vec![
            rect_poly(0.0, 0.0, 10.0, 10.0),
            rect_poly(9.0, 0.0, 20.0, 10.0),
            rect_poly(100.0, 100.0, 110.0, 110.0),
        ];
        let index = ParcelIndex::build(polys.iter());
        let near = index.candidates(&polys[0]);
        assert!(near.contains(&0) && near.contains(&1));
        assert!(!near.contains(&2));
    }

    #[test]
    fn union_all_merges_touching() {
        let polys = vec![rect_poly(0.0, 0.0, 10.0, 10.0), rect_poly(10.0, 0.0, 20.0, 10.0)];
        let unioned = union_all(&polys);
        assert!((unioned.unsigned_area() - 200.0).abs() < 1e-6);
    }
}
