//! Variables: domains, value expressions, assignments and the container

mod container;
mod domain;
mod factory;

pub use container::{Dtype, VariableContainer};
pub use domain::VariableDomain;
pub use factory::parse_value;

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::GrammarError;
use crate::tags::{self, Tags};

/// `[tags:]name(=|+=|?=)value`
static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([A-Za-z0-9_,|-]*):)?([A-Za-z0-9_.-]+)(=|\+=|\?=)(.*)$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=` replaces the domain
    Set,
    /// `+=` merges into the existing domain, or sets it when absent
    Append,
    /// `?=` sets only when absent
    Default,
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Append => "+=",
            AssignOp::Default => "?=",
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignOp {
    type Err = GrammarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(AssignOp::Set),
            "+=" => Ok(AssignOp::Append),
            "?=" => Ok(AssignOp::Default),
            other => Err(GrammarError::MalformedAssignment(other.to_string())),
        }
    }
}

/// One assignment line. The value expression is kept as text and parsed by
/// whoever applies it, since late variables substitute it first.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub tags: Option<String>,
    pub name: String,
    pub op: AssignOp,
    pub value: String,
}

impl Assignment {
    /// Parse one line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Assignment>, GrammarError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let caps = ASSIGNMENT
            .captures(line)
            .ok_or_else(|| GrammarError::MalformedAssignment(line.to_string()))?;
        Ok(Some(Assignment {
            tags: caps.get(1).map(|m| m.as_str().to_string()),
            name: caps[2].to_string(),
            op: caps[3].parse()?,
            value: caps[4].to_string(),
        }))
    }

    /// Whether the guarding tag expression holds
    pub fn applies(&self, active: &Tags) -> bool {
        self.tags
            .as_deref()
            .map_or(true, |expr| tags::matches(expr, active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_assignment() {
        let a = Assignment::parse("dpdk:BURST+=[32*256]").unwrap().unwrap();
        assert_eq!(a.tags.as_deref(), Some("dpdk"));
        assert_eq!(a.name, "BURST");
        assert_eq!(a.op, AssignOp::Append);
        assert_eq!(a.value, "[32*256]");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let a = Assignment::parse("CMD?=a=b").unwrap().unwrap();
        assert_eq!(a.op, AssignOp::Default);
        assert_eq!(a.value, "a=b");
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(Assignment::parse("   ").unwrap(), None);
        assert_eq!(Assignment::parse("# n_runs=1").unwrap(), None);
    }

    #[test]
    fn test_malformed_line() {
        assert!(matches!(
            Assignment::parse("just words"),
            Err(GrammarError::MalformedAssignment(_))
        ));
    }

    #[test]
    fn test_tag_filter() {
        let a = Assignment::parse("-fast:N=1").unwrap().unwrap();
        assert!(a.applies(&Tags::new()));
        assert!(!a.applies(&crate::tags::parse_tags("fast")));
    }
}
