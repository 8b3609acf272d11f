use std::collections::BTreeMap;

use geo::Polygon;
use serde::Serialize;

use crate::geometry;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A raw candidate polygon as produced by an upstream detector.
///
/// Coordinates must already be projected to a single consistent linear unit;
/// the engine never reprojects. `boundary_clarity` is an optional external
/// edge-confidence signal in [0, 1].
#[derive(Debug, Clone)]
pub struct CandidatePolygon {
    pub geometry: Polygon<f64>,
    pub boundary_clarity: Option<f64>,
}

impl CandidatePolygon {
    pub fn new(geometry: Polygon<f64>) -> Self {
        Self { geometry, boundary_clarity: None }
    }

    pub fn with_clarity(geometry: Polygon<f64>, clarity: f64) -> Self {
        Self { geometry, boundary_clarity: Some(clarity) }
    }
}

/// An authoritative land-register entry. Immutable input, supplied by an
/// external loader (see [`crate::records`]).
#[derive(Debug, Clone, Serialize)]
pub struct AdministrativeRecord {
    pub id: String,
    pub expected_area: f64,
    pub owner: String,
    pub land_type: String,
}

// ---------------------------------------------------------------------------
// Parcel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Routing {
    AutoApprove,
    DesktopReview,
    FieldVerification,
}

impl std::fmt::Display for Routing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoApprove => write!(f, "AUTO_APPROVE"),
            Self::DesktopReview => write!(f, "DESKTOP_REVIEW"),
            Self::FieldVerification => write!(f, "FIELD_VERIFICATION"),
        }
    }
}

/// A reconciled parcel. Created by the topology stage, annotated by the
/// matcher and scorer. Area and perimeter are always derived from the
/// current geometry, never cached across mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Parcel {
    pub id: usize,
    pub geometry: Polygon<f64>,
    pub boundary_clarity: Option<f64>,
    pub linked_record_id: Option<String>,
    pub area_deviation: Option<f64>,
    /// Set when the batch is short on parcels and this one is large enough
    /// to plausibly cover several records.
    pub needs_split: bool,
    pub confidence: f64,
    pub routing: Option<Routing>,
    /// Human-readable rationale, routing decision first.
    pub explanation: Vec<String>,
}

impl Parcel {
    pub fn new(id: usize, geometry: Polygon<f64>, boundary_clarity: Option<f64>) -> Self {
        Self {
            id,
            geometry,
            boundary_clarity,
            linked_record_id: None,
            area_deviation: None,
            needs_split: false,
            confidence: 0.0,
            routing: None,
            explanation: Vec::new(),
        }
    }

    pub fn area(&self) -> f64 {
        geometry::polygon_area(&self.geometry)
    }

    pub fn perimeter(&self) -> f64 {
        geometry::perimeter(&self.geometry)
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// One parcel's assignment outcome. `record_id == None` means the optimal
/// assignment for this parcel failed the acceptance threshold.
#[derive(Debug, Clone, Serialize)]
pub struct RecordMatch {
    pub parcel_id: usize,
    pub record_id: Option<String>,
    pub cost: f64,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    AreaMismatch,
    ExtraParcel,
    MissingRecord,
    CountHigh,
    CountLow,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AreaMismatch => write!(f, "AREA_MISMATCH"),
            Self::ExtraParcel => write!(f, "EXTRA_PARCEL"),
            Self::MissingRecord => write!(f, "MISSING_RECORD"),
            Self::CountHigh => write!(f, "COUNT_HIGH"),
            Self::CountLow => write!(f, "COUNT_LOW"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub parcel_ids: Vec<usize>,
    pub record_ids: Vec<String>,
}

/// Flat violation list plus aggregate counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictReport {
    pub violations: Vec<ConstraintViolation>,
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Topology reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    Invalid,
    Overlap,
    Gap,
    Sliver,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => write!(f, "INVALID"),
            Self::Overlap => write!(f, "OVERLAP"),
            Self::Gap => write!(f, "GAP"),
            Self::Sliver => write!(f, "SLIVER"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    /// Centroid of the affected area.
    pub location: (f64, f64),
    pub area: f64,
    pub parcel_ids: Vec<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyReport {
    pub is_valid: bool,
    pub issues: Vec<TopologyIssue>,
    pub by_kind: BTreeMap<String, usize>,
}

impl TopologyReport {
    pub fn from_issues(issues: Vec<TopologyIssue>) -> Self {
        let mut by_kind = BTreeMap::new();
        for issue in &issues {
            *by_kind.entry(issue.kind.to_string()).or_insert(0) += 1;
        }
        Self { is_valid: issues.is_empty(), issues, by_kind }
    }
}

/// What the fix pipeline actually did. Unresolved slivers and unfilled gaps
/// are surfaced here, never as errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FixReport {
    pub slivers_merged: usize,
    pub slivers_dropped: usize,
    pub overlaps_resolved: usize,
    pub gaps_filled: usize,
    pub gaps_left: usize,
    pub dropped_below_min_area: usize,
}

/// A candidate excluded during normalization.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedGeometry {
    pub index: usize,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Batch statistics
// ---------------------------------------------------------------------------

/// Batch-level context, computed once per village and passed into every
/// per-parcel score call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub expected_count: usize,
    pub actual_count: usize,
    pub min_expected_area: f64,
    pub max_expected_area: f64,
    pub total_expected_area: f64,
    pub total_actual_area: f64,
    pub matched_count: usize,
    pub match_rate: f64,
    pub mean_area_deviation: Option<f64>,
    pub max_area_deviation: Option<f64>,
}

impl BatchStats {
    /// Record-side statistics; parcel-side fields are filled in as the
    /// pipeline progresses.
    pub fn from_records(records: &[AdministrativeRecord]) -> Self {
        let mut stats = Self {
            expected_count: records.len(),
            ..Self::default()
        };
        for r in records {
            stats.total_expected_area += r.expected_area;
            if stats.min_expected_area == 0.0 || r.expected_area < stats.min_expected_area {
                stats.min_expected_area = r.expected_area;
            }
            if r.expected_area > stats.max_expected_area {
                stats.max_expected_area = r.expected_area;
            }
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Routing summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingCount {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingSummary {
    pub total: usize,
    pub auto_approve: RoutingCount,
    pub desktop_review: RoutingCount,
    pub field_verification: RoutingCount,
    pub mean_confidence: f64,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EngineMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineResult {
    pub meta: EngineMeta,
    pub parcels: Vec<Parcel>,
    pub matches: Vec<RecordMatch>,
    pub stats: BatchStats,
    pub conflicts: ConflictReport,
    pub topology: TopologyReport,
    pub fix: FixReport,
    pub dropped: Vec<DroppedGeometry>,
}
