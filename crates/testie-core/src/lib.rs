//! testie-core: section grammar and variable expansion for testie files
//!
//! A testie is a `%`-sectioned text describing a parameterized performance
//! test. This crate turns that text into typed sections, expands the declared
//! variables into a concrete test matrix and resolves per-row text:
//! - Tag matcher for conditional headers and assignments
//! - `nom` header grammar and the section factory
//! - Variable domains, assignment operators and the variable container
//! - Brute and shuffled matrix expansion
//! - Config registry with the framework's option catalogue
//! - Late variables derived from an already resolved row
//!
//! Nothing in here runs processes, touches git or judges regressions.

pub mod config;
mod error;
pub mod expansion;
pub mod grammar;
pub mod late;
pub mod section;
pub mod tags;
pub mod testie;
pub mod variable;

pub use config::ConfigRegistry;
pub use error::{DomainError, GrammarError, Result, TestieError};
pub use expansion::{expand, expand_with_rng, ExpandMode};
pub use grammar::{parse_header, Header, HeaderKind, Params};
pub use late::LateVariableSection;
pub use section::{
    FileSection, ImportSection, RepositoryRegistry, RequireSection, ScriptKind, ScriptSection,
    Section, SectionFactory,
};
pub use tags::{parse_tags, Tags};
pub use testie::{ResolvedText, Testie};
pub use variable::{parse_value, AssignOp, Assignment, Dtype, VariableContainer, VariableDomain};

// Substitution and value types are part of this crate's API surface
pub use testie_subst::{Node, NodeResolver, StaticNodes, Substituter};
pub use testie_types::{Row, Value, ValueFormat};
