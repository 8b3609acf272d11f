//! Cadastral parcel reconciliation engine.
//!
//! Pure engine crate: callers load detected boundary polygons and register
//! records however they like, hand them in pre-loaded, and get back a
//! topology-repaired, record-linked, confidence-scored parcel set with
//! conflict and topology reports. No I/O happens here beyond parsing config
//! TOML and record CSV content passed in as strings.
//!
//! The pipeline entry point is [`engine::run`]; the stages behind it are
//! usable on their own (topology repair without matching, evaluation
//! without reconciliation).

pub mod assignment;
pub mod config;
pub mod confidence;
pub mod conflicts;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod geometry;
pub mod matcher;
pub mod model;
pub mod records;
pub mod topology;

pub use config::EngineConfig;
pub use engine::run;
pub use error::EngineError;
pub use evaluate::{EvaluationResult, Evaluator, ParcelMetrics};
pub use model::{
    AdministrativeRecord, CandidatePolygon, ConflictReport, EngineResult, Parcel, RecordMatch,
    Routing, TopologyReport,
};
