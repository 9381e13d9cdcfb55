//! Error types for testie substitution.

use thiserror::Error;

/// Failure of the restricted arithmetic evaluator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("cannot parse expression '{expr}': {message}")]
    Parse { expr: String, message: String },

    #[error("unterminated arithmetic span starting at '{0}'")]
    Unterminated(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("{function}() takes {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: &'static str,
        got: usize,
    },

    #[error("math domain error in {0}()")]
    Domain(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubstitutionError {
    #[error("arithmetic expression failed: {0}")]
    Expression(#[from] ExprError),

    #[error("no node bound to role '{0}'")]
    UnknownRole(String),

    #[error("node for role '{role}' has no interface {index}")]
    UnknownInterface { role: String, index: usize },

    #[error("interface {index} of role '{role}' has no attribute '{attribute}'")]
    UnknownAttribute {
        role: String,
        index: usize,
        attribute: String,
    },

    #[error("interface index '{0}' does not resolve to a non-negative integer")]
    InvalidIndex(String),
}
