//! testie: load testie files for a performance regression run
//!
//! The parsing, expansion and substitution engine lives in the workspace
//! crates; this package adds run settings (tags, overrides, node table) and
//! the `testie_cli` inspection binary.
//!
//! ```no_run
//! use testie::{ExpandMode, RunSettings};
//!
//! let settings = RunSettings::discover(None)?;
//! let testie = settings.load_testie("tests/udp.testie".as_ref())?;
//! for row in testie.rows(ExpandMode::Brute)? {
//!     for script in testie.resolve_scripts(&row, Some(&settings.nodes))? {
//!         println!("{}: {}", script.name, script.content);
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod settings;

pub use settings::{RunSettings, DEFAULT_SETTINGS_FILE, SETTINGS_ENV};

pub use testie_core::{
    expand, expand_with_rng, parse_header, parse_tags, ConfigRegistry, ExpandMode, GrammarError,
    LateVariableSection, ResolvedText, Section, SectionFactory, Tags, Testie, TestieError,
    VariableContainer, VariableDomain,
};
pub use testie_subst::{substitute, Node, NodeResolver, StaticNodes, Substituter};
pub use testie_types::{Row, Value, ValueFormat};
