//! Testie text substitution
//!
//! Resolves the placeholders found in script bodies, file bodies and late
//! variable definitions against one concrete row of the expansion matrix.
//!
//! Three passes run in a fixed order, each one scan over the whole text:
//!
//! 1. `$name` / `${name}` → the row value
//! 2. `${role:index:attr}` → an attribute of a node interface
//! 3. `$(expr)` → the result of a restricted arithmetic evaluation
//!
//! Variables are resolved first so they can feed interface indices and
//! arithmetic spans.
//!
//! # Example
//!
//! ```
//! use testie_subst::substitute;
//! use testie_types::{Row, Value};
//!
//! let row = Row::from([("n".to_string(), Value::text("4"))]);
//! let text = substitute(&row, "count=$n total=$(2*$n)").unwrap();
//! assert_eq!(text, "count=4 total=8");
//! ```

pub mod arith;
mod error;
pub mod nodes;
mod substitute;

pub use arith::{evaluate, Expr, Number};
pub use error::{ExprError, SubstitutionError};
pub use nodes::{resolve_role, Interface, Node, NodeResolver, StaticNodes, DEFAULT_ROLE};
pub use substitute::{substitute, Substituter};
