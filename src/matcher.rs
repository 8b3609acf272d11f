//! Parcel-to-record matching by minimum total area deviation.

use ordered_float::OrderedFloat;

use crate::assignment;
use crate::config::MatchingConfig;
use crate::error::EngineError;
use crate::geometry::{polygon_area, ParcelIndex};
use crate::model::{
    AdministrativeRecord, BatchStats, ConstraintViolation, Parcel, RecordMatch, Severity,
    ViolationKind,
};

pub struct RecordMatcher {
    config: MatchingConfig,
}

impl RecordMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Count-constraint pre-processing before assignment.
    ///
    /// Too many parcels: fragments below `min_expected * merge_factor` are
    /// merged into their largest touching neighbor, ascending by size, which
    /// removes spurious splinters before they pollute the cost matrix. Too
    /// few: oversized parcels are flagged for splitting. Either case yields
    /// a count violation, never an error.
    pub fn apply_count_constraint(
        &self,
        mut parcels: Vec<Parcel>,
        stats: &BatchStats,
    ) -> (Vec<Parcel>, Option<ConstraintViolation>) {
        let expected = stats.expected_count;
        if expected == 0 {
            return (parcels, None);
        }
        let actual = parcels.len();
        let upper = expected as f64 * (1.0 + self.config.count_tolerance);
        let lower = expected as f64 * (1.0 - self.config.count_tolerance);

        if (actual as f64) > upper {
            let cutoff = stats.min_expected_area * self.config.merge_factor;
            let merged_ids = self.merge_small_parcels(&mut parcels, cutoff);
            let violation = ConstraintViolation {
                kind: ViolationKind::CountHigh,
                severity: Severity::Medium,
                message: format!("too many parcels: {actual} (expected ~{expected})"),
                parcel_ids: merged_ids,
                record_ids: Vec::new(),
            };
            return (parcels, Some(violation));
        }

        if (actual as f64) < lower {
            let oversized = stats.max_expected_area * 1.5;
            let mut flagged = Vec::new();
            for parcel in &mut parcels {
                if parcel.area() > oversized {
                    parcel.needs_split = true;
                    flagged.push(parcel.id);
                }
            }
            let violation = ConstraintViolation {
                kind: ViolationKind::CountLow,
                severity: Severity::Medium,
                message: format!("too few parcels: {actual} (expected ~{expected})"),
                parcel_ids: flagged,
                record_ids: Vec::new(),
            };
            return (parcels, Some(violation));
        }

        (parcels, None)
    }

    /// Merge sub-cutoff parcels into their largest touching neighbor,
    /// smallest first. Fragments with no touching neighbor are kept as-is.
    /// Returns the ids of the parcels that were absorbed.
    fn merge_small_parcels(&self, parcels: &mut Vec<Parcel>, cutoff: f64) -> Vec<usize> {
        let mut small: Vec<usize> = (0..parcels.len())
            .filter(|&i| parcels[i].area() < cutoff)
            .collect();
        small.sort_by_key(|&i| OrderedFloat(parcels[i].area()));

        let mut absorbed = Vec::new();
        for i in small {
            let index = ParcelIndex::build(parcels.iter().map(|p| &p.geometry));
            let target = index
                .candidates(&parcels[i].geometry)
                .into_iter()
                .filter(|&j| j != i && !absorbed_contains(&absorbed, parcels[j].id))
                .filter(|&j| parcels[i].area() < parcels[j].area())
                .filter(|&j| {
                    use geo::Intersects;
                    parcels[i].geometry.intersects(&parcels[j].geometry)
                })
                .max_by_key(|&j| OrderedFloat(parcels[j].area()));

            if let Some(j) = target {
                use geo::BooleanOps;
                let merged = parcels[j].geometry.union(&parcels[i].geometry);
                if let Some(geom) = crate::geometry::largest_part(merged) {
                    parcels[j].geometry = geom;
                    absorbed.push(parcels[i].id);
                }
            }
        }
        parcels.retain(|p| !absorbed_contains(&absorbed, p.id));
        absorbed
    }

    /// Optimal assignment between parcels and records.
    ///
    /// Returns the parcels annotated with their link and deviation, plus one
    /// [`RecordMatch`] per parcel. An empty record set is not an error: all
    /// parcels come back unmatched with degraded confidence.
    pub fn match_records(
        &self,
        mut parcels: Vec<Parcel>,
        records: &[AdministrativeRecord],
    ) -> Result<(Vec<Parcel>, Vec<RecordMatch>), EngineError> {
        if records.is_empty() {
            tracing::warn!("empty record set, all parcels unmatched");
            let matches = parcels
                .iter()
                .map(|p| RecordMatch {
                    parcel_id: p.id,
                    record_id: None,
                    cost: 1.0,
                    confidence: 0.0,
                })
                .collect();
            return Ok((parcels, matches));
        }

        let cost: Vec<Vec<f64>> = parcels
            .iter()
            .map(|p| {
                let area = polygon_area(&p.geometry);
                records
                    .iter()
                    .map(|r| {
                        if r.expected_area > 0.0 {
                            (area - r.expected_area).abs() / r.expected_area
                        } else {
                            1.0
                        }
                    })
                    .collect()
            })
            .collect();

        let assignment = assignment::solve(&cost)?;

        let mut matches = Vec::with_capacity(parcels.len());
        for (i, parcel) in parcels.iter_mut().enumerate() {
            let accepted = assignment[i].filter(|&j| {
                self.deviation_acceptable(polygon_area(&parcel.geometry), &records[j])
            });
            match accepted {
                Some(j) => {
                    let record = &records[j];
                    let deviation = cost[i][j];
                    parcel.linked_record_id = Some(record.id.clone());
                    parcel.area_deviation = Some(deviation);
                    matches.push(RecordMatch {
                        parcel_id: parcel.id,
                        record_id: Some(record.id.clone()),
                        cost: deviation,
                        confidence: (1.0 - deviation.min(1.0)).max(0.0),
                    });
                }
                None => {
                    matches.push(RecordMatch {
                        parcel_id: parcel.id,
                        record_id: None,
                        cost: 1.0,
                        confidence: 0.0,
                    });
                }
            }
        }
        Ok((parcels, matches))
    }

    /// Acceptance uses the deviation relative to the smaller of the two
    /// areas, so a tiny parcel forced onto a huge record (or vice versa) is
    /// rejected even though the one-sided cost looks moderate.
    fn deviation_acceptable(&self, area: f64, record: &AdministrativeRecord) -> bool {
        let expected = record.expected_area;
        if expected <= 0.0 || area <= 0.0 {
            return false;
        }
        let symmetric = (area - expected).abs() / area.min(expected);
        symmetric < self.config.reject_threshold
    }
}

fn absorbed_contains(absorbed: &[usize], id: usize) -> bool {
    absorbed.contains(&id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn rect_poly(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        )
    }

    fn record(id: &str, area: f64) -> AdministrativeRecord {
        AdministrativeRecord {
            id: id.into(),
            expected_area: area,
            owner: "owner".into(),
            land_type: "agricultural".into(),
        }
    }

    fn square_parcel(id: usize, origin: f64, side: f64) -> Parcel {
        Parcel::new(id, rect_poly(origin, 0.0, origin + side, side), None)
    }

    #[test]
    fn oversized_record_is_left_unmatched() {
        // three area-100 parcels vs records {100, 100, 5000}
        let parcels = vec![
            square_parcel(0, 0.0, 10.0),
            square_parcel(1, 20.0, 10.0),
            square_parcel(2, 40.0, 10.0),
        ];
        let records = vec![record("s1", 100.0), record("s2", 100.0), record("s3", 5000.0)];
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (parcels, matches) = matcher.match_records(parcels, &records).unwrap();

        let matched: Vec<_> = matches.iter().filter(|m| m.record_id.is_some()).collect();
        assert_eq!(matched.len(), 2);
        for m in &matched {
            assert!(m.cost < 1e-9, "expected near-zero cost, got {}", m.cost);
            assert!((m.confidence - 1.0).abs() < 1e-9);
        }
        assert!(
            matches.iter().all(|m| m.record_id.as_deref() != Some("s3")),
            "the 5000 record must stay unmatched"
        );
        assert_eq!(parcels.iter().filter(|p| p.linked_record_id.is_some()).count(), 2);
    }

    #[test]
    fn matching_is_injective() {
        let parcels = vec![
            square_parcel(0, 0.0, 10.0),
            square_parcel(1, 20.0, 10.0),
            square_parcel(2, 40.0, 10.0),
        ];
        let records = vec![record("s1", 100.0)];
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (_, matches) = matcher.match_records(parcels, &records).unwrap();
        let linked = matches.iter().filter(|m| m.record_id.is_some()).count();
        assert_eq!(linked, 1, "one record can satisfy only one parcel");
    }

    #[test]
    fn empty_records_degrade_gracefully() {
        let parcels = vec![square_parcel(0, 0.0, 10.0)];
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (parcels, matches) = matcher.match_records(parcels, &[]).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].record_id.is_none());
        assert_eq!(matches[0].confidence, 0.0);
        assert!(parcels[0].linked_record_id.is_none());
    }

    #[test]
    fn annotations_carry_deviation() {
        let parcels = vec![square_parcel(0, 0.0, 10.0)]; // 100
        let records = vec![record("s1", 110.0)];
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (parcels, matches) = matcher.match_records(parcels, &records).unwrap();
        let expected_dev = 10.0 / 110.0;
        assert!((parcels[0].area_deviation.unwrap() - expected_dev).abs() < 1e-9);
        assert!((matches[0].cost - expected_dev).abs() < 1e-9);
        assert!((matches[0].confidence - (1.0 - expected_dev)).abs() < 1e-9);
    }

    #[test]
    fn count_high_triggers_premerge() {
        // 10x10 parcel with two touching splinters; expected count 1
        let parcels = vec![
            Parcel::new(0, rect_poly(0.0, 0.0, 10.0, 10.0), None),
            Parcel::new(1, rect_poly(10.0, 0.0, 11.0, 5.0), None),
            Parcel::new(2, rect_poly(10.0, 5.0, 11.5, 10.0), None),
        ];
        let records = vec![record("s1", 115.0)];
        let stats = BatchStats::from_records(&records);
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (parcels, violation) = matcher.apply_count_constraint(parcels, &stats);

        let violation = violation.unwrap();
        assert_eq!(violation.kind, ViolationKind::CountHigh);
        assert_eq!(parcels.len(), 1);
        assert!((parcels[0].area() - 112.5).abs() < 1e-6);
    }

    #[test]
    fn count_low_flags_oversized() {
        let parcels = vec![Parcel::new(0, rect_poly(0.0, 0.0, 40.0, 40.0), None)];
        let records = vec![record("s1", 100.0), record("s2", 100.0), record("s3", 100.0)];
        let stats = BatchStats::from_records(&records);
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (parcels, violation) = matcher.apply_count_constraint(parcels, &stats);
        assert_eq!(violation.unwrap().kind, ViolationKind::CountLow);
        assert!(parcels[0].needs_split, "1600 >> 1.5 * 100");
    }

    #[test]
    fn count_within_tolerance_is_untouched() {
        let parcels = vec![square_parcel(0, 0.0, 10.0), square_parcel(1, 20.0, 10.0)];
        let records = vec![record("s1", 100.0), record("s2", 100.0)];
        let stats = BatchStats::from_records(&records);
        let matcher = RecordMatcher::new(MatchingConfig::default());
        let (parcels, violation) = matcher.apply_count_constraint(parcels, &stats);
        assert!(violation.is_none());
        assert_eq!(parcels.len(), 2);
    }
}
