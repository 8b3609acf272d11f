use serde::Deserialize;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

fn default_name() -> String {
    "default".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            topology: TopologyConfig::default(),
            matching: MatchingConfig::default(),
            confidence: ConfidenceConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Which outer boundary the gap stage measures against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    ConvexHull,
    BoundingBox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    /// Isoperimetric quotient below which a parcel is a sliver.
    #[serde(default = "default_sliver_threshold")]
    pub sliver_threshold: f64,
    /// Pairwise intersection area above which an overlap is resolved.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
    /// Gaps smaller than this are filled; larger ones are intentional
    /// non-parcel space (roads, water).
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: f64,
    /// Parcels below this area are dropped in final cleanup.
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    #[serde(default = "default_envelope")]
    pub envelope: EnvelopeKind,
}

fn default_sliver_threshold() -> f64 { 0.1 }
fn default_overlap_threshold() -> f64 { 1.0 }
fn default_gap_threshold() -> f64 { 10.0 }
fn default_min_area() -> f64 { 10.0 }
fn default_envelope() -> EnvelopeKind { EnvelopeKind::ConvexHull }

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            sliver_threshold: default_sliver_threshold(),
            overlap_threshold: default_overlap_threshold(),
            gap_threshold: default_gap_threshold(),
            min_area: default_min_area(),
            envelope: default_envelope(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Symmetric relative area deviation above which an assignment is
    /// discarded. The default 2.0 (200%) mirrors the source system and is
    /// deliberately loose; tune per region.
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: f64,
    /// Allowed fractional deviation of parcel count from record count.
    #[serde(default = "default_count_tolerance")]
    pub count_tolerance: f64,
    /// Area deviation above which a medium-severity mismatch is reported.
    #[serde(default = "default_area_tolerance")]
    pub area_tolerance: f64,
    /// Pre-merge cutoff = `min_expected_area * merge_factor`.
    #[serde(default = "default_merge_factor")]
    pub merge_factor: f64,
}

fn default_reject_threshold() -> f64 { 2.0 }
fn default_count_tolerance() -> f64 { 0.3 }
fn default_area_tolerance() -> f64 { 0.05 }
fn default_merge_factor() -> f64 { 0.5 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            reject_threshold: default_reject_threshold(),
            count_tolerance: default_count_tolerance(),
            area_tolerance: default_area_tolerance(),
            merge_factor: default_merge_factor(),
        }
    }
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FactorWeights {
    #[serde(default = "w_area_match")]
    pub area_match: f64,
    #[serde(default = "w_has_record_link")]
    pub has_record_link: f64,
    #[serde(default = "w_boundary_clarity")]
    pub boundary_clarity: f64,
    #[serde(default = "w_shape_regularity")]
    pub shape_regularity: f64,
    #[serde(default = "w_count_consistency")]
    pub count_consistency: f64,
    #[serde(default = "w_size_reasonable")]
    pub size_reasonable: f64,
}

fn w_area_match() -> f64 { 0.30 }
fn w_has_record_link() -> f64 { 0.15 }
fn w_boundary_clarity() -> f64 { 0.15 }
fn w_shape_regularity() -> f64 { 0.10 }
fn w_count_consistency() -> f64 { 0.15 }
fn w_size_reasonable() -> f64 { 0.15 }

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            area_match: w_area_match(),
            has_record_link: w_has_record_link(),
            boundary_clarity: w_boundary_clarity(),
            shape_regularity: w_shape_regularity(),
            count_consistency: w_count_consistency(),
            size_reasonable: w_size_reasonable(),
        }
    }
}

impl FactorWeights {
    pub fn sum(&self) -> f64 {
        self.area_match
            + self.has_record_link
            + self.boundary_clarity
            + self.shape_regularity
            + self.count_consistency
            + self.size_reasonable
    }

    /// Scale so the weights sum to 1. Warns instead of failing: a caller
    /// supplying raw importance values still gets a well-formed score.
    pub fn normalized(&self) -> FactorWeights {
        let total = self.sum();
        if (total - 1.0).abs() <= 0.01 {
            return self.clone();
        }
        tracing::warn!(total, "confidence weights do not sum to 1, renormalizing");
        FactorWeights {
            area_match: self.area_match / total,
            has_record_link: self.has_record_link / total,
            boundary_clarity: self.boundary_clarity / total,
            shape_regularity: self.shape_regularity / total,
            count_consistency: self.count_consistency / total,
            size_reasonable: self.size_reasonable / total,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: f64,
    #[serde(default = "default_desktop_threshold")]
    pub desktop_threshold: f64,
    #[serde(default)]
    pub weights: FactorWeights,
}

fn default_auto_threshold() -> f64 { 0.85 }
fn default_desktop_threshold() -> f64 { 0.60 }

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            auto_threshold: default_auto_threshold(),
            desktop_threshold: default_desktop_threshold(),
            weights: FactorWeights::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    /// Minimum IoU for a detected/truth pair to count as a match.
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
    /// Points sampled along each boundary for the distance metric.
    #[serde(default = "default_boundary_samples")]
    pub boundary_samples: usize,
}

fn default_iou_threshold() -> f64 { 0.3 }
fn default_boundary_samples() -> usize { 50 }

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            boundary_samples: default_boundary_samples(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| EngineError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let t = &self.topology;
        for (name, value) in [
            ("topology.sliver_threshold", t.sliver_threshold),
            ("topology.overlap_threshold", t.overlap_threshold),
            ("topology.gap_threshold", t.gap_threshold),
            ("topology.min_area", t.min_area),
            ("matching.reject_threshold", self.matching.reject_threshold),
            ("matching.count_tolerance", self.matching.count_tolerance),
            ("matching.area_tolerance", self.matching.area_tolerance),
            ("matching.merge_factor", self.matching.merge_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::ConfigValidation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        let c = &self.confidence;
        if !(0.0..=1.0).contains(&c.auto_threshold)
            || !(0.0..=1.0).contains(&c.desktop_threshold)
        {
            return Err(EngineError::ConfigValidation(
                "confidence thresholds must be in [0, 1]".into(),
            ));
        }
        if c.desktop_threshold > c.auto_threshold {
            return Err(EngineError::ConfigValidation(format!(
                "desktop_threshold {} exceeds auto_threshold {}",
                c.desktop_threshold, c.auto_threshold
            )));
        }

        let w = &c.weights;
        let all = [
            w.area_match,
            w.has_record_link,
            w.boundary_clarity,
            w.shape_regularity,
            w.count_consistency,
            w.size_reasonable,
        ];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EngineError::ConfigValidation(
                "confidence weights must be non-negative".into(),
            ));
        }
        if w.sum() <= 0.0 {
            return Err(EngineError::ConfigValidation(
                "confidence weights must not all be zero".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.evaluation.iou_threshold) {
            return Err(EngineError::ConfigValidation(
                "evaluation.iou_threshold must be in [0, 1]".into(),
            ));
        }
        if self.evaluation.boundary_samples == 0 {
            return Err(EngineError::ConfigValidation(
                "evaluation.boundary_samples must be positive".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
