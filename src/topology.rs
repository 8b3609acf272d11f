//! Topology repair: slivers, overlaps, gaps, minimum-area cleanup.
//!
//! The fix pipeline is strictly ordered; each step assumes the previous one
//! completed. `validate` detects the same issue categories without mutating
//! anything, and reports zero issues on the pipeline's own output.

use geo::{BooleanOps, BoundingRect, Centroid, ConvexHull, MultiPolygon, Polygon, Validation};
use ordered_float::OrderedFloat;

use crate::config::{EnvelopeKind, TopologyConfig};
use crate::geometry::{
    self, intersection_area, iso_quotient, largest_part, polygon_area, union_all, ParcelIndex,
};
use crate::model::{CandidatePolygon, FixReport, IssueKind, Parcel, Severity, TopologyIssue};

/// Gaps below this area are floating-point debris, neither filled nor
/// reported.
const NEGLIGIBLE_GAP: f64 = 0.01;
/// Minimum gap area worth reporting from `validate`.
const MIN_REPORTED_GAP: f64 = 1.0;
/// Distance under which a boundary sample counts as shared with a parcel.
const SHARED_BOUNDARY_EPS: f64 = 1e-6;
/// Samples taken along a gap boundary when picking the merge target.
const GAP_SAMPLES: usize = 32;
/// Overlaps larger than this are high severity in reports.
const SEVERE_OVERLAP_AREA: f64 = 10.0;

pub struct TopologyFixer {
    config: TopologyConfig,
}

impl TopologyFixer {
    pub fn new(config: TopologyConfig) -> Self {
        Self { config }
    }

    /// Run the full repair pipeline on normalized candidates.
    pub fn fix(&self, candidates: Vec<CandidatePolygon>) -> (Vec<Parcel>, FixReport) {
        let mut report = FixReport::default();

        let mut items = self.remove_slivers(candidates, &mut report);
        self.resolve_overlaps(&mut items, &mut report);
        self.fill_gaps(&mut items, &mut report);

        // final cleanup: drop sub-minimum parcels, assign sequential ids
        let mut parcels = Vec::with_capacity(items.len());
        for item in items {
            if polygon_area(&item.geometry) < self.config.min_area {
                report.dropped_below_min_area += 1;
                continue;
            }
            parcels.push(Parcel::new(parcels.len(), item.geometry, item.boundary_clarity));
        }
        (parcels, report)
    }

    // -- step 1: slivers ---------------------------------------------------

    fn remove_slivers(
        &self,
        candidates: Vec<CandidatePolygon>,
        report: &mut FixReport,
    ) -> Vec<CandidatePolygon> {
        let (slivers, mut kept): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| iso_quotient(&c.geometry) < self.config.sliver_threshold);

        if slivers.is_empty() {
            return kept;
        }

        for sliver in slivers {
            let index = ParcelIndex::build(kept.iter().map(|c| &c.geometry));
            let target = index
                .candidates(&sliver.geometry)
                .into_iter()
                .filter(|&i| geometry_touches(&kept[i].geometry, &sliver.geometry))
                .max_by_key(|&i| OrderedFloat(polygon_area(&kept[i].geometry)));

            match target {
                Some(i) => {
                    if let Some(merged) = union_into(&kept[i].geometry, &sliver.geometry) {
                        kept[i].geometry = merged;
                        report.slivers_merged += 1;
                    } else {
                        report.slivers_dropped += 1;
                    }
                }
                None => {
                    tracing::debug!("sliver has no touching neighbor, dropping");
                    report.slivers_dropped += 1;
                }
            }
        }
        kept
    }

    // -- step 2: overlaps --------------------------------------------------

    fn resolve_overlaps(&self, items: &mut Vec<CandidatePolygon>, report: &mut FixReport) {
        if items.len() < 2 {
            return;
        }
        // envelopes only shrink during resolution, so the initial index
        // stays a superset of true candidates
        let index = ParcelIndex::build(items.iter().map(|c| &c.geometry));
        let mut removed = vec![false; items.len()];

        for i in 0..items.len() {
            if removed[i] {
                continue;
            }
            for j in index.candidates(&items[i].geometry) {
                if j <= i || removed[j] {
                    continue;
                }
                let overlap = intersection_area(&items[i].geometry, &items[j].geometry);
                if overlap <= self.config.overlap_threshold {
                    continue;
                }

                // the smaller parcel cedes the intersection to the larger
                let (loser, winner) = if polygon_area(&items[i].geometry)
                    >= polygon_area(&items[j].geometry)
                {
                    (j, i)
                } else {
                    (i, j)
                };
                let remainder =
                    items[loser].geometry.difference(&items[winner].geometry);
                match largest_part(remainder) {
                    // the subtraction can leave a strip too thin to stand on
                    // its own; absorb it into the winner instead of emitting
                    // a parcel the sliver pass would have caught
                    Some(fragment)
                        if iso_quotient(&fragment) < self.config.sliver_threshold =>
                    {
                        if let Some(merged) = union_into(&items[winner].geometry, &fragment)
                        {
                            items[winner].geometry = merged;
                            report.slivers_merged += 1;
                        } else {
                            report.slivers_dropped += 1;
                        }
                        removed[loser] = true;
                    }
                    Some(fragment) => items[loser].geometry = fragment,
                    None => removed[loser] = true,
                }
                report.overlaps_resolved += 1;
                if removed[i] {
                    break;
                }
            }
        }

        let mut idx = 0;
        items.retain(|_| {
            let keep = !removed[idx];
            idx += 1;
            keep
        });
    }

    // -- step 3: gaps ------------------------------------------------------

    fn fill_gaps(&self, items: &mut [CandidatePolygon], report: &mut FixReport) {
        if items.len() < 2 {
            return;
        }
        let union = union_all(&collect_geoms(items));
        let Some(envelope) = self.envelope_of(&union) else {
            return;
        };

        let gaps = MultiPolygon::new(vec![envelope]).difference(&union);
        let index = ParcelIndex::build(items.iter().map(|c| &c.geometry));

        for gap in gaps.0 {
            let area = polygon_area(&gap);
            if area < NEGLIGIBLE_GAP {
                continue;
            }
            if area >= self.config.gap_threshold {
                // intentional non-parcel space (roads, water)
                report.gaps_left += 1;
                continue;
            }

            match self.gap_merge_target(&gap, items, &index) {
                Some(i) => {
                    if let Some(merged) = union_into(&items[i].geometry, &gap) {
                        items[i].geometry = merged;
                        report.gaps_filled += 1;
                    } else {
                        report.gaps_left += 1;
                    }
                }
                None => {
                    tracing::debug!(area, "gap shares no boundary with any parcel");
                    report.gaps_left += 1;
                }
            }
        }
    }

    /// Parcel sharing the longest boundary with the gap, estimated by the
    /// fraction of gap-boundary samples lying on each parcel's boundary.
    fn gap_merge_target(
        &self,
        gap: &Polygon<f64>,
        items: &[CandidatePolygon],
        index: &ParcelIndex,
    ) -> Option<usize> {
        let samples = geometry::sample_boundary(gap, GAP_SAMPLES);
        if samples.is_empty() {
            return None;
        }

        let mut best: Option<(usize, usize)> = None; // (shared samples, item)
        let mut nearest: Option<(f64, usize)> = None;

        for i in index.candidates(gap) {
            let geom = &items[i].geometry;
            let mut shared = 0usize;
            let mut min_dist = f64::INFINITY;
            for p in &samples {
                let d = geometry::point_boundary_distance(*p, geom);
                if d < SHARED_BOUNDARY_EPS {
                    shared += 1;
                }
                if d < min_dist {
                    min_dist = d;
                }
            }
            if shared > 0 {
                let better = match best {
                    Some((s, b)) => {
                        shared > s
                            || (shared == s
                                && polygon_area(geom) > polygon_area(&items[b].geometry))
                    }
                    None => true,
                };
                if better {
                    best = Some((shared, i));
                }
            }
            if nearest.map_or(true, |(d, _)| min_dist < d) {
                nearest = Some((min_dist, i));
            }
        }

        best.map(|(_, i)| i).or_else(|| {
            // boolean-op noise can push shared points just off the boundary
            nearest.filter(|(d, _)| *d < 1e-3).map(|(_, i)| i)
        })
    }

    fn envelope_of(&self, union: &MultiPolygon<f64>) -> Option<Polygon<f64>> {
        match self.config.envelope {
            EnvelopeKind::ConvexHull => {
                if union.0.is_empty() {
                    None
                } else {
                    Some(union.convex_hull())
                }
            }
            EnvelopeKind::BoundingBox => union.bounding_rect().map(|r| r.to_polygon()),
        }
    }

    // -- validation --------------------------------------------------------

    /// Read-only issue detection over any parcel set.
    pub fn validate(&self, parcels: &[Parcel]) -> Vec<TopologyIssue> {
        let mut issues = Vec::new();

        for parcel in parcels {
            if !parcel.geometry.is_valid() {
                issues.push(TopologyIssue {
                    kind: IssueKind::Invalid,
                    severity: Severity::High,
                    location: geometry::centroid_xy(&parcel.geometry),
                    area: parcel.area(),
                    parcel_ids: vec![parcel.id],
                    message: format!("invalid geometry at parcel {}", parcel.id),
                });
            }
        }

        issues.extend(self.detect_overlaps(parcels));
        issues.extend(self.detect_gaps(parcels));
        issues.extend(self.detect_slivers(parcels));
        issues
    }

    fn detect_overlaps(&self, parcels: &[Parcel]) -> Vec<TopologyIssue> {
        let mut issues = Vec::new();
        if parcels.len() < 2 {
            return issues;
        }
        let index = ParcelIndex::build(parcels.iter().map(|p| &p.geometry));

        for (i, parcel) in parcels.iter().enumerate() {
            for j in index.candidates(&parcel.geometry) {
                if j <= i {
                    continue;
                }
                let overlap = intersection_area(&parcel.geometry, &parcels[j].geometry);
                if overlap > self.config.overlap_threshold {
                    let shared = parcel.geometry.intersection(&parcels[j].geometry);
                    issues.push(TopologyIssue {
                        kind: IssueKind::Overlap,
                        severity: if overlap > SEVERE_OVERLAP_AREA {
                            Severity::High
                        } else {
                            Severity::Medium
                        },
                        location: multipolygon_centroid(&shared),
                        area: overlap,
                        parcel_ids: vec![parcel.id, parcels[j].id],
                        message: format!(
                            "overlap of {overlap:.1} between parcels {} and {}",
                            parcel.id, parcels[j].id
                        ),
                    });
                }
            }
        }
        issues
    }

    fn detect_gaps(&self, parcels: &[Parcel]) -> Vec<TopologyIssue> {
        let mut issues = Vec::new();
        if parcels.len() < 2 {
            return issues;
        }
        let geoms: Vec<Polygon<f64>> = parcels.iter().map(|p| p.geometry.clone()).collect();
        let union = union_all(&geoms);
        let Some(envelope) = self.envelope_of(&union) else {
            return issues;
        };
        let gaps = MultiPolygon::new(vec![envelope]).difference(&union);

        for gap in gaps.0 {
            let area = polygon_area(&gap);
            // gaps at or above the threshold are intentional non-parcel space
            if area < MIN_REPORTED_GAP || area >= self.config.gap_threshold {
                continue;
            }
            let samples = geometry::sample_boundary(&gap, GAP_SAMPLES);
            let mut adjacent: Vec<usize> = parcels
                .iter()
                .filter(|p| {
                    samples
                        .iter()
                        .any(|s| geometry::point_boundary_distance(*s, &p.geometry) < 0.1)
                })
                .map(|p| p.id)
                .collect();
            adjacent.truncate(5);
            issues.push(TopologyIssue {
                kind: IssueKind::Gap,
                severity: Severity::Low,
                location: geometry::centroid_xy(&gap),
                area,
                parcel_ids: adjacent,
                message: format!("gap of {area:.1} detected"),
            });
        }
        issues
    }

    fn detect_slivers(&self, parcels: &[Parcel]) -> Vec<TopologyIssue> {
        parcels
            .iter()
            .filter(|p| iso_quotient(&p.geometry) < self.config.sliver_threshold)
            .map(|p| TopologyIssue {
                kind: IssueKind::Sliver,
                severity: Severity::Medium,
                location: geometry::centroid_xy(&p.geometry),
                area: p.area(),
                parcel_ids: vec![p.id],
                message: format!(
                    "sliver at parcel {} (q={:.3})",
                    p.id,
                    iso_quotient(&p.geometry)
                ),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn geometry_touches(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    use geo::Intersects;
    a.intersects(b)
}

/// Union two polygons, keeping the largest part if the result fragments.
fn union_into(base: &Polygon<f64>, addition: &Polygon<f64>) -> Option<Polygon<f64>> {
    largest_part(base.union(addition))
}

fn collect_geoms(items: &[CandidatePolygon]) -> Vec<Polygon<f64>> {
    items.iter().map(|c| c.geometry.clone()).collect()
}

fn multipolygon_centroid(mp: &MultiPolygon<f64>) -> (f64, f64) {
    match mp.centroid() {
        Some(p) => (p.x(), p.y()),
        None => (0.0, 0.0),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
