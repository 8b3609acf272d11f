//! Per-parcel trust scoring and review routing.
//!
//! Six bounded factors are blended with configurable weights into a single
//! confidence in [0, 1], which then routes the parcel to auto-approval,
//! desktop review, or field verification. Every score carries a
//! human-readable explanation list, routing decision first, so a reviewer
//! can see why a parcel landed in their queue.

use ordered_float::OrderedFloat;

use crate::config::{ConfidenceConfig, FactorWeights};
use crate::geometry;
use crate::model::{BatchStats, Parcel, Routing, RoutingSummary};

/// Neutral value for factors whose input signal is absent.
const NEUTRAL: f64 = 0.5;

pub struct ConfidenceScorer {
    config: ConfidenceConfig,
    weights: FactorWeights,
}

/// The individual factor values behind one parcel's score, all in [0, 1].
#[derive(Debug, Clone, Copy)]
struct Factors {
    area_match: f64,
    has_record_link: f64,
    boundary_clarity: f64,
    shape_regularity: f64,
    count_consistency: f64,
    size_reasonable: f64,
}

impl ConfidenceScorer {
    pub fn new(config: ConfidenceConfig) -> Self {
        let weights = config.weights.normalized();
        Self { config, weights }
    }

    /// Score every parcel in place: confidence, routing, explanations.
    pub fn score_parcels(&self, parcels: &mut [Parcel], stats: &BatchStats) {
        for parcel in parcels.iter_mut() {
            self.score_parcel(parcel, stats);
        }
    }

    fn score_parcel(&self, parcel: &mut Parcel, stats: &BatchStats) {
        let factors = self.factors(parcel, stats);
        let w = &self.weights;
        let confidence = (factors.area_match * w.area_match
            + factors.has_record_link * w.has_record_link
            + factors.boundary_clarity * w.boundary_clarity
            + factors.shape_regularity * w.shape_regularity
            + factors.count_consistency * w.count_consistency
            + factors.size_reasonable * w.size_reasonable)
            .clamp(0.0, 1.0);

        let routing = if confidence >= self.config.auto_threshold {
            Routing::AutoApprove
        } else if confidence >= self.config.desktop_threshold {
            Routing::DesktopReview
        } else {
            Routing::FieldVerification
        };

        parcel.confidence = confidence;
        parcel.routing = Some(routing);
        parcel.explanation = self.explain(parcel, &factors, routing);
    }

    fn factors(&self, parcel: &Parcel, stats: &BatchStats) -> Factors {
        Factors {
            area_match: match parcel.area_deviation {
                Some(dev) => (1.0 - dev.abs()).max(0.0),
                None => NEUTRAL,
            },
            has_record_link: if parcel.linked_record_id.is_some() { 1.0 } else { 0.0 },
            boundary_clarity: parcel
                .boundary_clarity
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(NEUTRAL),
            shape_regularity: geometry::iso_quotient(&parcel.geometry).clamp(0.0, 1.0),
            count_consistency: count_consistency(stats),
            size_reasonable: size_reasonable(parcel.area(), stats),
        }
    }

    fn explain(&self, parcel: &Parcel, factors: &Factors, routing: Routing) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(
            match routing {
                Routing::AutoApprove => "High confidence - auto-approved",
                Routing::DesktopReview => "Moderate confidence - desktop review recommended",
                Routing::FieldVerification => "Low confidence - field verification required",
            }
            .to_string(),
        );

        match parcel.area_deviation {
            Some(dev) if dev.abs() <= 0.05 => {
                lines.push("Area matches register within 5%".into());
            }
            Some(dev) if dev.abs() > 0.20 => {
                lines.push(format!("Area deviates {:.0}% from register", dev.abs() * 100.0));
            }
            Some(_) => {}
            None => lines.push("No administrative record linked".into()),
        }

        if let Some(clarity) = parcel.boundary_clarity {
            if clarity < 0.5 {
                lines.push(format!("Weak boundary signal ({clarity:.2})"));
            }
        }
        if factors.shape_regularity < 0.3 {
            lines.push(format!("Irregular shape ({:.2})", factors.shape_regularity));
        }
        if parcel.needs_split {
            lines.push("Large parcel may cover multiple records - split candidate".into());
        }
        lines
    }
}

/// How well parcel count agrees with record count, as the ratio of the
/// smaller to the larger.
fn count_consistency(stats: &BatchStats) -> f64 {
    if stats.expected_count == 0 || stats.actual_count == 0 {
        return NEUTRAL;
    }
    let lo = stats.expected_count.min(stats.actual_count) as f64;
    let hi = stats.expected_count.max(stats.actual_count) as f64;
    lo / hi
}

/// Full credit inside [0.5 * min_expected, 1.5 * max_expected], linear
/// falloff outside, neutral when the batch has no usable record areas.
fn size_reasonable(area: f64, stats: &BatchStats) -> f64 {
    if stats.min_expected_area <= 0.0 || stats.max_expected_area <= 0.0 {
        return NEUTRAL;
    }
    let lower = 0.5 * stats.min_expected_area;
    let upper = 1.5 * stats.max_expected_area;
    if area < lower {
        (area / lower).max(0.0)
    } else if area > upper {
        (1.0 - (area - upper) / upper).max(0.0)
    } else {
        1.0
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

pub fn routing_summary(parcels: &[Parcel]) -> RoutingSummary {
    let total = parcels.len();
    let mut summary = RoutingSummary { total, ..RoutingSummary::default() };
    if total == 0 {
        return summary;
    }
    for parcel in parcels {
        match parcel.routing {
            Some(Routing::AutoApprove) => summary.auto_approve.count += 1,
            Some(Routing::DesktopReview) => summary.desktop_review.count += 1,
            Some(Routing::FieldVerification) | None => {
                summary.field_verification.count += 1
            }
        }
        summary.mean_confidence += parcel.confidence;
    }
    summary.mean_confidence /= total as f64;
    for bucket in [
        &mut summary.auto_approve,
        &mut summary.desktop_review,
        &mut summary.field_verification,
    ] {
        bucket.percentage = 100.0 * bucket.count as f64 / total as f64;
    }
    summary
}

/// Parcels needing human attention, least trusted first.
pub fn review_queue(parcels: &[Parcel]) -> Vec<&Parcel> {
    let mut queue: Vec<&Parcel> = parcels
        .iter()
        .filter(|p| p.routing != Some(Routing::AutoApprove))
        .collect();
    queue.sort_by_key(|p| OrderedFloat(p.confidence));
    queue
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

    fn batch(expected: usize, actual: usize, min_area: f64, max_area: f64) -> BatchStats {
        BatchStats {
            expected_count: expected,
            actual_count: actual,
            min_expected_area: min_area,
            max_expected_area: max_area,
            ..BatchStats::default()
        }
    }

    fn scored(parcel: Parcel, stats: &BatchStats) -> Parcel {
        let scorer = ConfidenceScorer::new(ConfidenceConfig::default());
        let mut parcels = vec![parcel];
        scorer.score_parcels(&mut parcels, stats);
        parcels.pop().unwrap()
    }

    #[test]
    fn well_matched_square_auto_approves() {
        let mut parcel = Parcel::new(0, rect_poly(0.0, 0.0, 10.0, 10.0), Some(0.95));
        parcel.linked_record_id = Some("s1".into());
        parcel.area_deviation = Some(0.01);
        let parcel = scored(parcel, &batch(3, 3, 90.0, 110.0));
        assert!(parcel.confidence >= 0.85, "confidence {}", parcel.confidence);
        assert_eq!(parcel.routing, Some(Routing::AutoApprove));
        assert_eq!(parcel.explanation[0], "High confidence - auto-approved");
        assert!(parcel
            .explanation
            .iter()
            .any(|l| l.contains("within 5%")));
    }

    #[test]
    fn unmatched_parcel_routes_to_field() {
        let parcel = Parcel::new(0, rect_poly(0.0, 0.0, 10.0, 10.0), Some(0.2));
        let parcel = scored(parcel, &batch(3, 3, 90.0, 110.0));
        assert_eq!(parcel.routing, Some(Routing::FieldVerification));
        assert!(parcel
            .explanation
            .iter()
            .any(|l| l == "No administrative record linked"));
        assert!(parcel
            .explanation
            .iter()
            .any(|l| l.starts_with("Weak boundary signal")));
    }

    #[test]
    fn confidence_always_bounded() {
        let cases = [
            (batch(0, 0, 0.0, 0.0), None),
            (batch(5, 1, 100.0, 100.0), Some(3.0)),
            (batch(1, 50, 1.0, 1e9), Some(0.0)),
        ];
        for (stats, dev) in cases {
            let mut parcel = Parcel::new(0, rect_poly(0.0, 0.0, 10.0, 10.0), None);
            parcel.area_deviation = dev;
            let parcel = scored(parcel, &stats);
            assert!((0.0..=1.0).contains(&parcel.confidence));
            assert!(parcel.routing.is_some());
        }
    }

    #[test]
    fn size_falloff_is_linear() {
        let stats = batch(1, 1, 100.0, 100.0);
        assert_eq!(size_reasonable(100.0, &stats), 1.0);
        assert_eq!(size_reasonable(50.0, &stats), 1.0); // lower edge
        assert!((size_reasonable(25.0, &stats) - 0.5).abs() < 1e-9);
        assert_eq!(size_reasonable(150.0, &stats), 1.0); // upper edge
        assert!((size_reasonable(225.0, &stats) - 0.5).abs() < 1e-9);
        assert_eq!(size_reasonable(1000.0, &stats), 0.0);
    }

    #[test]
    fn count_consistency_symmetric() {
        assert!((count_consistency(&batch(4, 2, 1.0, 1.0)) - 0.5).abs() < 1e-9);
        assert!((count_consistency(&batch(2, 4, 1.0, 1.0)) - 0.5).abs() < 1e-9);
        assert_eq!(count_consistency(&batch(0, 4, 1.0, 1.0)), NEUTRAL);
    }

    #[test]
    fn summary_percentages_add_up() {
        let stats = batch(2, 2, 90.0, 110.0);
        let scorer = ConfidenceScorer::new(ConfidenceConfig::default());
        let mut parcels = vec![
            {
                let mut p = Parcel::new(0, rect_poly(0.0, 0.0, 10.0, 10.0), Some(0.95));
                p.linked_record_id = Some("s1".into());
                p.area_deviation = Some(0.0);
                p
            },
            Parcel::new(1, rect_poly(20.0, 0.0, 30.0, 10.0), Some(0.1)),
        ];
        scorer.score_parcels(&mut parcels, &stats);
        let summary = routing_summary(&parcels);
        assert_eq!(summary.total, 2);
        let covered = summary.auto_approve.count
            + summary.desktop_review.count
            + summary.field_verification.count;
        assert_eq!(covered, 2);
        let pct = summary.auto_approve.percentage
            + summary.desktop_review.percentage
            + summary.field_verification.percentage;
        assert!((pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn review_queue_sorted_ascending() {
        let stats = batch(3, 3, 90.0, 110.0);
        let scorer = ConfidenceScorer::new(ConfidenceConfig::default());
        let mut parcels = vec![
            Parcel::new(0, rect_poly(0.0, 0.0, 10.0, 10.0), Some(0.4)),
            Parcel::new(1, rect_poly(20.0, 0.0, 30.0, 10.0), Some(0.05)),
            Parcel::new(2, rect_poly(40.0, 0.0, 50.0, 10.0), Some(0.7)),
        ];
        scorer.score_parcels(&mut parcels, &stats);
        let queue = review_queue(&parcels);
        for pair in queue.windows(2) {
            assert!(pair[0].confidence <= pair[1].confidence);
        }
    }
}
