//! End-to-end reconciliation pipeline.
//!
//! Normalize raw candidates, repair topology, enforce the count constraint,
//! assign records, score confidence, then report conflicts and residual
//! topology issues. Pure transformation: inputs are already loaded, output
//! is a single [`EngineResult`], and the only hard failures are precondition
//! violations.

use crate::config::EngineConfig;
use crate::confidence::{self, ConfidenceScorer};
use crate::conflicts::ConflictDetector;
use crate::error::EngineError;
use crate::geometry;
use crate::matcher::RecordMatcher;
use crate::model::{
    AdministrativeRecord, BatchStats, CandidatePolygon, EngineMeta, EngineResult, TopologyReport,
};
use crate::topology::TopologyFixer;

pub fn run(
    config: &EngineConfig,
    candidates: Vec<CandidatePolygon>,
    records: &[AdministrativeRecord],
) -> Result<EngineResult, EngineError> {
    config.validate()?;
    tracing::debug!(
        config = %config.name,
        candidates = candidates.len(),
        records = records.len(),
        "reconciliation start"
    );

    let (normalized, dropped) = geometry::normalize(candidates)?;
    tracing::debug!(kept = normalized.len(), dropped = dropped.len(), "normalized");

    let fixer = TopologyFixer::new(config.topology.clone());
    let (parcels, fix) = fixer.fix(normalized);
    tracing::debug!(parcels = parcels.len(), ?fix, "topology fixed");

    let mut stats = BatchStats::from_records(records);

    let matcher = RecordMatcher::new(config.matching.clone());
    let (parcels, count_violation) = matcher.apply_count_constraint(parcels, &stats);
    let (mut parcels, matches) = matcher.match_records(parcels, records)?;

    fill_parcel_stats(&mut stats, &parcels, &matches);
    tracing::debug!(
        matched = stats.matched_count,
        match_rate = stats.match_rate,
        "records matched"
    );

    let scorer = ConfidenceScorer::new(config.confidence.clone());
    scorer.score_parcels(&mut parcels, &stats);

    let detector = ConflictDetector::new(config.matching.clone());
    let conflicts =
        detector.detect(&parcels, records, &matches, count_violation.into_iter().collect());

    let topology = TopologyReport::from_issues(fixer.validate(&parcels));
    tracing::debug!(
        conflicts = conflicts.total,
        topology_issues = topology.issues.len(),
        "reconciliation done"
    );

    Ok(EngineResult {
        meta: EngineMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        parcels,
        matches,
        stats,
        conflicts,
        topology,
        fix,
        dropped,
    })
}

/// Routing summary over a finished run, for dashboards and batch triage.
pub fn summarize(result: &EngineResult) -> crate::model::RoutingSummary {
    confidence::routing_summary(&result.parcels)
}

fn fill_parcel_stats(
    stats: &mut BatchStats,
    parcels: &[crate::model::Parcel],
    matches: &[crate::model::RecordMatch],
) {
    stats.actual_count = parcels.len();
    stats.total_actual_area = parcels.iter().map(|p| p.area()).sum();
    stats.matched_count = matches.iter().filter(|m| m.record_id.is_some()).count();
    stats.match_rate = if stats.expected_count > 0 {
        stats.matched_count as f64 / stats.expected_count as f64
    } else {
        0.0
    };

    let deviations: Vec<f64> =
        parcels.iter().filter_map(|p| p.area_deviation).map(f64::abs).collect();
    if !deviations.is_empty() {
        stats.mean_area_deviation =
            Some(deviations.iter().sum::<f64>() / deviations.len() as f64);
        stats.max_area_deviation = deviations.iter().copied().reduce(f64::max);
    }
}
