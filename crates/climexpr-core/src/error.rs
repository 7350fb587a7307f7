//! Error type for expression construction, parsing and resolution.

use thiserror::Error;

/// Errors raised by the expression core.
///
/// Every variant is raised at the point of detection. The only place where a
/// failure is downgraded to a warning is wildcard exploration in
/// [`crate::resolve::ExploreMode::Choices`] mode.
#[derive(Debug, Error)]
pub enum CrsError {
    /// No project is declared under this name.
    #[error("unknown project: {0}")]
    UnknownProject(String),

    /// The facet is not part of the project's facet list.
    #[error("project '{project}' has no facet '{facet}'")]
    UnknownFacet { project: String, facet: String },

    /// A facet has no value and no default.
    #[error("project '{project}': facet '{facet}' has no value and no default")]
    MissingRequiredFacet { project: String, facet: String },

    /// A facet value contains a character that would break the CRS syntax.
    #[error("facet '{facet}' value '{value}' contains reserved character '{ch}'")]
    ReservedCharacterInValue {
        facet: String,
        value: String,
        ch: char,
    },

    /// A parse matched several projects, or a resolution found several values.
    #[error("ambiguous expression: {0}")]
    AmbiguousExpression(String),

    /// A parse matched no project.
    #[error("unknown expression: {0}")]
    UnknownExpression(String),

    /// The location registry has no entry compatible with the dataset.
    #[error("no location registered for {0}")]
    NoLocationRegistered(String),

    /// Locations exist but the file search matched nothing.
    #[error("no file found for {0}")]
    NoFileFound(String),

    /// Merged periods do not form a single interval.
    #[error("period has holes: {0}")]
    PeriodHasHoles(String),

    /// A macro was instantiated with the wrong number of operands.
    #[error("macro '{name}' expects {expected} operand(s), got {got}")]
    MacroOperandCountMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// An operator command template could not be interpreted.
    #[error("malformed template for operator '{name}': {reason}")]
    MalformedOperatorTemplate { name: String, reason: String },

    /// An ensemble reorder was not a permutation of the current labels.
    #[error("ensemble labels mismatch: expected {expected:?}, got {got:?}")]
    EnsembleLabelSetMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    /// A period string could not be parsed.
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// A domain string could not be parsed.
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// A project declaration violates an invariant.
    #[error("invalid project declaration '{name}': {reason}")]
    InvalidProject { name: String, reason: String },

    /// A page geometry violates an invariant.
    #[error("invalid page: {0}")]
    InvalidPage(String),

    /// No operator or macro is declared under this name.
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    /// Operand count is not compatible with the operator's slots.
    #[error("operator '{operator}' accepts {min}..={max} operand(s), got {got}")]
    ArityMismatch {
        operator: String,
        min: usize,
        max: usize,
        got: usize,
    },

    /// The operator does not declare this output.
    #[error("operator '{operator}' has no output named '{output}'")]
    UnknownOutput { operator: String, output: String },

    /// The operator's template does not declare this parameter.
    #[error("operator '{operator}' has no parameter '{param}'")]
    UnknownParameter { operator: String, param: String },

    /// NaN and infinities have no CRS literal.
    #[error("parameter '{param}' is not a finite number")]
    NonFiniteParameter { param: String },

    /// CRS syntax error.
    #[error("CRS parse error: {0}")]
    Parse(String),

    /// The external evaluator reported a failure.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// A declaration catalog could not be read.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// A location URL pattern could not be compiled.
    #[error("invalid location pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// I/O error while reading a catalog.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrsError {
    /// Returns the stable error code (e.g., "CRS001").
    pub fn code(&self) -> &'static str {
        match self {
            CrsError::UnknownProject(_) => "CRS001",
            CrsError::UnknownFacet { .. } => "CRS002",
            CrsError::MissingRequiredFacet { .. } => "CRS003",
            CrsError::ReservedCharacterInValue { .. } => "CRS004",
            CrsError::AmbiguousExpression(_) => "CRS005",
            CrsError::UnknownExpression(_) => "CRS006",
            CrsError::NoLocationRegistered(_) => "CRS007",
            CrsError::NoFileFound(_) => "CRS008",
            CrsError::PeriodHasHoles(_) => "CRS009",
            CrsError::MacroOperandCountMismatch { .. } => "CRS010",
            CrsError::MalformedOperatorTemplate { .. } => "CRS011",
            CrsError::EnsembleLabelSetMismatch { .. } => "CRS012",
            CrsError::InvalidPeriod(_) => "CRS020",
            CrsError::InvalidDomain(_) => "CRS021",
            CrsError::InvalidProject { .. } => "CRS022",
            CrsError::InvalidPage(_) => "CRS023",
            CrsError::UnknownOperator(_) => "CRS030",
            CrsError::ArityMismatch { .. } => "CRS031",
            CrsError::UnknownOutput { .. } => "CRS032",
            CrsError::UnknownParameter { .. } => "CRS033",
            CrsError::NonFiniteParameter { .. } => "CRS034",
            CrsError::Parse(_) => "CRS040",
            CrsError::Evaluation(_) => "CRS050",
            CrsError::Catalog(_) => "CRS060",
            CrsError::Pattern { .. } => "CRS061",
            CrsError::Io(_) => "CRS062",
        }
    }

    /// Returns true for the two "nothing there" failures that choices-mode
    /// exploration reports as warnings.
    pub fn is_absence(&self) -> bool {
        matches!(
            self,
            CrsError::NoLocationRegistered(_) | CrsError::NoFileFound(_)
        )
    }
}

impl From<serde_yaml::Error> for CrsError {
    fn from(err: serde_yaml::Error) -> Self {
        CrsError::Catalog(err.to_string())
    }
}

impl From<serde_json::Error> for CrsError {
    fn from(err: serde_json::Error) -> Self {
        CrsError::Catalog(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CrsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let errors = vec![
            CrsError::UnknownProject("x".into()),
            CrsError::AmbiguousExpression("x".into()),
            CrsError::UnknownExpression("x".into()),
            CrsError::NoLocationRegistered("x".into()),
            CrsError::NoFileFound("x".into()),
            CrsError::PeriodHasHoles("x".into()),
            CrsError::NonFiniteParameter { param: "x".into() },
            CrsError::Parse("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_absence_classification() {
        assert!(CrsError::NoFileFound("a".into()).is_absence());
        assert!(CrsError::NoLocationRegistered("a".into()).is_absence());
        assert!(!CrsError::AmbiguousExpression("a".into()).is_absence());
    }

    #[test]
    fn test_display_messages() {
        let err = CrsError::MacroOperandCountMismatch {
            name: "zm".into(),
            expected: 1,
            got: 2,
        };
        assert_eq!(err.to_string(), "macro 'zm' expects 1 operand(s), got 2");
    }
}
