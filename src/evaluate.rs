//! Accuracy evaluation of detected parcels against ground truth.
//!
//! Detected and truth polygons are paired by maximizing total IoU (optimal
//! assignment on `1 - IoU`), then the matched pairs are summarized into the
//! aggregate metrics survey teams track across pipeline revisions.

use serde::Serialize;

use crate::assignment;
use crate::config::EvaluationConfig;
use crate::error::EngineError;
use crate::geometry::{self, ParcelIndex};
use geo::Polygon;

pub struct Evaluator {
    config: EvaluationConfig,
}

/// One matched detected/truth pair.
#[derive(Debug, Clone, Serialize)]
pub struct ParcelMetrics {
    pub detected_index: usize,
    pub truth_index: usize,
    pub iou: f64,
    /// detected area / truth area
    pub area_ratio: f64,
    /// |detected - truth| / truth
    pub area_error: f64,
    /// Mean symmetric boundary distance; `None` when either boundary is
    /// degenerate.
    pub boundary_distance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationResult {
    pub detected_count: usize,
    pub truth_count: usize,
    pub matched: Vec<ParcelMetrics>,
    pub unmatched_detected: Vec<usize>,
    pub unmatched_truth: Vec<usize>,
    /// matched / truth_count
    pub match_rate: f64,
    pub mean_iou: f64,
    pub median_iou: f64,
    /// Fraction of matched pairs with IoU above 0.5 / 0.7.
    pub iou_above_50: f64,
    pub iou_above_70: f64,
    /// Fraction of matched pairs with area error within 10% / 20%.
    pub area_within_10: f64,
    pub area_within_20: f64,
    pub mean_boundary_distance: Option<f64>,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        detected: &[Polygon<f64>],
        truth: &[Polygon<f64>],
    ) -> Result<EvaluationResult, EngineError> {
        let mut result = EvaluationResult {
            detected_count: detected.len(),
            truth_count: truth.len(),
            ..EvaluationResult::default()
        };
        if detected.is_empty() || truth.is_empty() {
            result.unmatched_detected = (0..detected.len()).collect();
            result.unmatched_truth = (0..truth.len()).collect();
            return Ok(result);
        }

        // sparse IoU matrix: bbox-disjoint pairs have IoU 0 without a
        // boolean-ops call
        let index = ParcelIndex::build(truth.iter());
        let mut iou = vec![vec![0.0f64; truth.len()]; detected.len()];
        for (i, det) in detected.iter().enumerate() {
            for j in index.candidates(det) {
                iou[i][j] = geometry::iou(det, &truth[j]);
            }
        }

        let cost: Vec<Vec<f64>> =
            iou.iter().map(|row| row.iter().map(|v| 1.0 - v).collect()).collect();
        let assignment = assignment::solve(&cost)?;

        let mut truth_matched = vec![false; truth.len()];
        for (i, det) in detected.iter().enumerate() {
            let accepted = assignment[i].filter(|&j| iou[i][j] >= self.config.iou_threshold);
            match accepted {
                Some(j) => {
                    truth_matched[j] = true;
                    let det_area = geometry::polygon_area(det);
                    let truth_area = geometry::polygon_area(&truth[j]);
                    let (ratio, error) = if truth_area > 0.0 {
                        (det_area / truth_area, (det_area - truth_area).abs() / truth_area)
                    } else {
                        (0.0, 1.0)
                    };
                    result.matched.push(ParcelMetrics {
                        detected_index: i,
                        truth_index: j,
                        iou: iou[i][j],
                        area_ratio: ratio,
                        area_error: error,
                        boundary_distance: geometry::boundary_distance(
                            det,
                            &truth[j],
                            self.config.boundary_samples,
                        ),
                    });
                }
                None => result.unmatched_detected.push(i),
            }
        }
        result.unmatched_truth =
            truth_matched.iter().enumerate().filter(|(_, m)| !**m).map(|(j, _)| j).collect();

        aggregate(&mut result);
        Ok(result)
    }

    /// Evaluate several named runs against the same truth, for side-by-side
    /// comparison of configurations.
    pub fn compare(
        &self,
        runs: &[(String, Vec<Polygon<f64>>)],
        truth: &[Polygon<f64>],
    ) -> Result<Vec<(String, EvaluationResult)>, EngineError> {
        runs.iter()
            .map(|(name, detected)| Ok((name.clone(), self.evaluate(detected, truth)?)))
            .collect()
    }
}

fn aggregate(result: &mut EvaluationResult) {
    let n = result.matched.len();
    result.match_rate = if result.truth_count > 0 {
        n as f64 / result.truth_count as f64
    } else {
        0.0
    };
    if n == 0 {
        return;
    }

    let mut ious: Vec<f64> = result.matched.iter().map(|m| m.iou).collect();
    ious.sort_by(f64::total_cmp);
    result.mean_iou = ious.iter().sum::<f64>() / n as f64;
    result.median_iou = if n % 2 == 1 {
        ious[n / 2]
    } else {
        (ious[n / 2 - 1] + ious[n / 2]) / 2.0
    };
    result.iou_above_50 = fraction(&result.matched, |m| m.iou > 0.5);
    result.iou_above_70 = fraction(&result.matched, |m| m.iou > 0.7);
    result.area_within_10 = fraction(&result.matched, |m| m.area_error <= 0.10);
    result.area_within_20 = fraction(&result.matched, |m| m.area_error <= 0.20);

    let distances: Vec<f64> =
        result.matched.iter().filter_map(|m| m.boundary_distance).collect();
    if !distances.is_empty() {
        result.mean_boundary_distance =
            Some(distances.iter().sum::<f64>() / distances.len() as f64);
    }
}

fn fraction(matched: &[ParcelMetrics], pred: impl Fn(&ParcelMetrics) -> bool) -> f64 {
    matched.iter().filter(|m| pred(m)).count() as f64 / matched.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    fn rect_poly(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        )
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(EvaluationConfig::default())
    }

    #[test]
    fn identical_sets_score_perfectly() {
        let truth = vec![rect_poly(0.0, 0.0, 10.0, 10.0), rect_poly(20.0, 0.0, 30.0, 10.0)];
        let result = evaluator().evaluate(&truth, &truth).unwrap();
        assert_eq!(result.matched.len(), 2);
        assert!((result.match_rate - 1.0).abs() < 1e-9);
        assert!((result.mean_iou - 1.0).abs() < 1e-6);
        assert!((result.median_iou - 1.0).abs() < 1e-6);
        assert_eq!(result.iou_above_70, 1.0);
        assert_eq!(result.area_within_10, 1.0);
        assert!(result.mean_boundary_distance.unwrap() < 1e-9);
    }

    #[test]
    fn shifted_detection_still_matches() {
        let truth = vec![rect_poly(0.0, 0.0, 10.0, 10.0)];
        let detected = vec![rect_poly(1.0, 0.0, 11.0, 10.0)];
        let result = evaluator().evaluate(&detected, &truth).unwrap();
        assert_eq!(result.matched.len(), 1);
        let m = &result.matched[0];
        // intersection 90, union 110
        assert!((m.iou - 9.0 / 11.0).abs() < 1e-6);
        assert!((m.area_ratio - 1.0).abs() < 1e-9);
        assert!(m.boundary_distance.unwrap() > 0.0);
    }

    #[test]
    fn below_threshold_pairs_rejected() {
        let truth = vec![rect_poly(0.0, 0.0, 10.0, 10.0)];
        let detected = vec![rect_poly(8.0, 8.0, 18.0, 18.0)]; // IoU 4/196
        let result = evaluator().evaluate(&detected, &truth).unwrap();
        assert!(result.matched.is_empty());
        assert_eq!(result.unmatched_detected, vec![0]);
        assert_eq!(result.unmatched_truth, vec![0]);
        assert_eq!(result.match_rate, 0.0);
    }

    #[test]
    fn assignment_prefers_best_pairing() {
        // detected[0] overlaps both truths, detected[1] only the second;
        // greedy-by-first would steal truth[1] and orphan detected[1]
        let truth = vec![rect_poly(0.0, 0.0, 10.0, 10.0), rect_poly(8.0, 0.0, 18.0, 10.0)];
        let detected = vec![rect_poly(2.0, 0.0, 12.0, 10.0), rect_poly(9.0, 0.0, 19.0, 10.0)];
        let result = evaluator().evaluate(&detected, &truth).unwrap();
        assert_eq!(result.matched.len(), 2);
        let pairs: Vec<(usize, usize)> =
            result.matched.iter().map(|m| (m.detected_index, m.truth_index)).collect();
        assert!(pairs.contains(&(0, 0)));
        assert!(pairs.contains(&(1, 1)));
    }

    #[test]
    fn empty_inputs_are_graceful() {
        let truth = vec![rect_poly(0.0, 0.0, 10.0, 10.0)];
        let result = evaluator().evaluate(&[], &truth).unwrap();
        assert_eq!(result.match_rate, 0.0);
        assert_eq!(result.unmatched_truth, vec![0]);

        let result = evaluator().evaluate(&truth, &[]).unwrap();
        assert_eq!(result.unmatched_detected, vec![0]);
    }

    #[test]
    fn compare_names_runs() {
        let truth = vec![rect_poly(0.0, 0.0, 10.0, 10.0)];
        let runs = vec![
            ("exact".to_string(), truth.clone()),
            ("offset".to_string(), vec![rect_poly(3.0, 0.0, 13.0, 10.0)]),
        ];
        let results = evaluator().compare(&runs, &truth).unwrap();
        assert_eq!(results[0].0, "exact");
        assert!(results[0].1.mean_iou > results[1].1.mean_iou);
    }
}
