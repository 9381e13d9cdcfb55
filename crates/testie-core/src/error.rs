//! Error types for testie parsing and expansion

use testie_subst::SubstitutionError;
use thiserror::Error;

/// Malformed testie text
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GrammarError {
    #[error("unknown section line '{0}'")]
    UnknownSection(String),

    #[error("invalid assignment '{0}'")]
    MalformedAssignment(String),

    #[error("invalid value expression '{expr}': {reason}")]
    InvalidValue { expr: String, reason: String },

    #[error("only one section of type {0} is allowed")]
    DuplicateSection(&'static str),

    #[error("only script and import sections take arguments ({section} has '{arguments}')")]
    UnexpectedArguments { section: String, arguments: String },

    #[error("%import section must name a module or a testie=<path> to import")]
    MissingImportTarget,

    #[error("%import section does not support any content (got '{0}')")]
    ImportWithContent(String),

    #[error("content before the first section: '{0}'")]
    ContentBeforeSection(String),
}

/// Domain merge failure for `+=`
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("cannot merge a dictionary with a {0} domain")]
    DictionaryMix(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TestieError {
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error(transparent)]
    DomainMerge(#[from] DomainError),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error("late variable '{name}' has {count} values, expected exactly one")]
    DerivationArity { name: String, count: usize },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid value '{value}' for parameter '{name}'")]
    InvalidParam { name: String, value: String },

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<TestieError>,
    },
}

impl TestieError {
    /// Annotate with a 1-based line number. Already annotated errors keep
    /// their innermost line.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            e @ TestieError::AtLine { .. } => e,
            e => TestieError::AtLine {
                line,
                source: Box::new(e),
            },
        }
    }

    /// The error without its line annotation
    pub fn root(&self) -> &TestieError {
        match self {
            TestieError::AtLine { source, .. } => source.root(),
            e => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, TestieError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_line_keeps_innermost() {
        let err = TestieError::UnknownVariable("x".into()).at_line(4).at_line(1);
        assert_eq!(err.to_string(), "line 4: unknown variable 'x'");
        assert_eq!(err.root(), &TestieError::UnknownVariable("x".into()));
    }
}
