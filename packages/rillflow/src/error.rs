use std::fmt;

/// Tagged error kinds surfaced at the library boundary.
///
/// Overflow is deliberately not here: exceeding `max_rows`/`max_results`
/// is reported as a flag on view updates, never as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The parser or planner hit a construct outside the supported SQL
    /// surface. Fatal for that view only.
    UnsupportedSql(String),
    /// An ingest batch disagrees with the registered table schema.
    SchemaMismatch(String),
    /// A retraction referenced state that does not exist, or an operator
    /// index lost synchrony. Fatal for the step; no partial outputs.
    InvariantViolated(String),
    /// A cycle without a delay node, or a reference to an undeclared
    /// source, detected when the circuit is built.
    CircuitBuild(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedSql(msg) => write!(f, "unsupported SQL: {}", msg),
            Error::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            Error::InvariantViolated(msg) => write!(f, "invariant violated: {}", msg),
            Error::CircuitBuild(msg) => write!(f, "circuit build error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedSql(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Error::SchemaMismatch(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolated(msg.into())
    }

    pub fn build(msg: impl Into<String>) -> Self {
        Error::CircuitBuild(msg.into())
    }
}
