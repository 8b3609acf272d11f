//! Constraint violation detection between parcels and the register.
//!
//! Violations are advisory output, never errors: the pipeline always runs to
//! completion and hands reviewers a prioritized list of disagreements.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::MatchingConfig;
use crate::model::{
    AdministrativeRecord, ConflictReport, ConstraintViolation, Parcel, RecordMatch, Severity,
    ViolationKind,
};

/// Area deviation above which a mismatch is high severity.
const SEVERE_AREA_DEVIATION: f64 = 0.20;

pub struct ConflictDetector {
    config: MatchingConfig,
}

impl ConflictDetector {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Check the reconciled batch against the register. `carried` holds
    /// violations raised by earlier stages (count pre-merge), which are
    /// prepended so the report reflects the whole run.
    pub fn detect(
        &self,
        parcels: &[Parcel],
        records: &[AdministrativeRecord],
        matches: &[RecordMatch],
        carried: Vec<ConstraintViolation>,
    ) -> ConflictReport {
        let mut violations = carried;

        for parcel in parcels {
            match (&parcel.linked_record_id, parcel.area_deviation) {
                (Some(record_id), Some(dev)) if dev.abs() > self.config.area_tolerance => {
                    let severity = if dev.abs() > SEVERE_AREA_DEVIATION {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    violations.push(ConstraintViolation {
                        kind: ViolationKind::AreaMismatch,
                        severity,
                        message: format!(
                            "parcel {} deviates {:.1}% from record {}",
                            parcel.id,
                            dev.abs() * 100.0,
                            record_id
                        ),
                        parcel_ids: vec![parcel.id],
                        record_ids: vec![record_id.clone()],
                    });
                }
                (Some(_), _) => {}
                (None, _) => {
                    violations.push(ConstraintViolation {
                        kind: ViolationKind::ExtraParcel,
                        severity: Severity::High,
                        message: format!(
                            "parcel {} ({:.0} sqm) has no matching record",
                            parcel.id,
                            parcel.area()
                        ),
                        parcel_ids: vec![parcel.id],
                        record_ids: Vec::new(),
                    });
                }
            }
        }

        let matched_ids: BTreeSet<&str> = matches
            .iter()
            .filter_map(|m| m.record_id.as_deref())
            .collect();
        for record in records {
            if !matched_ids.contains(record.id.as_str()) {
                violations.push(ConstraintViolation {
                    kind: ViolationKind::MissingRecord,
                    severity: Severity::High,
                    message: format!(
                        "record {} ({:.0} sqm expected) matched no parcel",
                        record.id, record.expected_area
                    ),
                    parcel_ids: Vec::new(),
                    record_ids: vec![record.id.clone()],
                });
            }
        }

        if let Some(v) = self.count_violation(parcels.len(), records.len()) {
            // skip if the pre-merge stage already reported the same kind
            if !violations.iter().any(|c| c.kind == v.kind) {
                violations.push(v);
            }
        }

        build_report(violations)
    }

    fn count_violation(&self, actual: usize, expected: usize) -> Option<ConstraintViolation> {
        if expected == 0 {
            return None;
        }
        let slack = expected as f64 * self.config.count_tolerance;
        let (kind, breach) = if (actual as f64) > expected as f64 + slack {
            (ViolationKind::CountHigh, true)
        } else if (actual as f64) < expected as f64 - slack {
            (ViolationKind::CountLow, true)
        } else {
            (ViolationKind::CountHigh, false)
        };
        breach.then(|| ConstraintViolation {
            kind,
            severity: Severity::Medium,
            message: format!("{actual} parcels against {expected} records"),
            parcel_ids: Vec::new(),
            record_ids: Vec::new(),
        })
    }
}

fn build_report(violations: Vec<ConstraintViolation>) -> ConflictReport {
    let mut by_kind = BTreeMap::new();
    let mut by_severity = BTreeMap::new();
    for v in &violations {
        *by_kind.entry(v.kind.to_string()).or_insert(0) += 1;
        *by_severity.entry(v.severity.to_string()).or_insert(0) += 1;
    }
    ConflictReport { total: violations.len(), violations, by_kind, by_severity }
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

    fn linked_parcel(id: usize, record_id: &str, deviation: f64) -> Parcel {
        let mut p = Parcel::new(id, rect_poly(0.0, 0.0, 10.0, 10.0), None);
        p.linked_record_id = Some(record_id.into());
        p.area_deviation = Some(deviation);
        p
    }

    fn match_for(parcel: &Parcel) -> RecordMatch {
        RecordMatch {
            parcel_id: parcel.id,
            record_id: parcel.linked_record_id.clone(),
            cost: parcel.area_deviation.unwrap_or(1.0),
            confidence: 0.0,
        }
    }

    fn detector() -> ConflictDetector {
        ConflictDetector::new(MatchingConfig::default())
    }

    #[test]
    fn severe_mismatch_is_high() {
        let parcels = vec![linked_parcel(0, "s1", 0.25), linked_parcel(1, "s2", 0.10)];
        let records = vec![record("s1", 100.0), record("s2", 100.0)];
        let matches: Vec<_> = parcels.iter().map(match_for).collect();
        let report = detector().detect(&parcels, &records, &matches, Vec::new());

        assert_eq!(report.total, 2);
        assert_eq!(report.by_kind["AREA_MISMATCH"], 2);
        assert_eq!(report.by_severity["HIGH"], 1);
        assert_eq!(report.by_severity["MEDIUM"], 1);
    }

    #[test]
    fn small_deviation_is_clean() {
        let parcels = vec![linked_parcel(0, "s1", 0.03)];
        let records = vec![record("s1", 100.0)];
        let matches: Vec<_> = parcels.iter().map(match_for).collect();
        let report = detector().detect(&parcels, &records, &matches, Vec::new());
        assert_eq!(report.total, 0);
    }

    #[test]
    fn unmatched_sides_reported() {
        // one unlinked parcel, one never-matched record
        let parcels = vec![
            linked_parcel(0, "s1", 0.0),
            Parcel::new(1, rect_poly(20.0, 0.0, 30.0, 10.0), None),
        ];
        let records = vec![record("s1", 100.0), record("s2", 5000.0)];
        let matches = vec![
            match_for(&parcels[0]),
            RecordMatch { parcel_id: 1, record_id: None, cost: 1.0, confidence: 0.0 },
        ];
        let report = detector().detect(&parcels, &records, &matches, Vec::new());

        assert_eq!(report.by_kind["EXTRA_PARCEL"], 1);
        assert_eq!(report.by_kind["MISSING_RECORD"], 1);
        let missing = report
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::MissingRecord)
            .unwrap();
        assert_eq!(missing.record_ids, vec!["s2".to_string()]);
        assert_eq!(missing.severity, Severity::High);
    }

    #[test]
    fn count_low_detected() {
        let parcels = vec![linked_parcel(0, "s1", 0.0)];
        let records = vec![record("s1", 100.0), record("s2", 100.0), record("s3", 100.0)];
        let matches = vec![match_for(&parcels[0])];
        let report = detector().detect(&parcels, &records, &matches, Vec::new());
        assert_eq!(report.by_kind["COUNT_LOW"], 1);
    }

    #[test]
    fn carried_violation_suppresses_duplicate_count() {
        let parcels = vec![linked_parcel(0, "s1", 0.0)];
        let records = vec![record("s1", 100.0), record("s2", 100.0), record("s3", 100.0)];
        let matches = vec![match_for(&parcels[0])];
        let carried = vec![ConstraintViolation {
            kind: ViolationKind::CountLow,
            severity: Severity::Medium,
            message: "too few parcels: 1 (expected ~3)".into(),
            parcel_ids: Vec::new(),
            record_ids: Vec::new(),
        }];
        let report = detector().detect(&parcels, &records, &matches, carried);
        assert_eq!(report.by_kind["COUNT_LOW"], 1, "no duplicate count violation");
    }
}
