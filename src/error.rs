use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad threshold, degenerate weights, etc.).
    ConfigValidation(String),
    /// A candidate polygon carries a NaN or infinite coordinate.
    /// Units and coordinate sanity are the caller's responsibility; this
    /// aborts the whole batch rather than produce wrong areas.
    NonFiniteGeometry { index: usize },
    /// The assignment solver failed on a well-formed matrix.
    /// This indicates a programming defect, never bad input.
    AssignmentInfeasible(String),
    /// Missing required column in record CSV data.
    MissingColumn { column: String },
    /// A record field failed to parse.
    FieldParse { record_id: String, column: String, value: String },
    /// CSV-level read error.
    RecordRead(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::NonFiniteGeometry { index } => {
                write!(f, "candidate polygon {index} has non-finite coordinates")
            }
            Self::AssignmentInfeasible(msg) => {
                write!(f, "assignment solver failed: {msg}")
            }
            Self::MissingColumn { column } => {
                write!(f, "record data: missing column '{column}'")
            }
            Self::FieldParse { record_id, column, value } => {
                write!(f, "record '{record_id}': cannot parse {column} '{value}'")
            }
            Self::RecordRead(msg) => write!(f, "record read error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
