//! Late variables
//!
//! `%late_variables` assignments run once per row, after the row is known.
//! Each value is substituted against the row plus every variable derived so
//! far, so later lines can build on earlier ones.

use testie_subst::substitute;
use testie_types::Row;

use crate::error::{Result, TestieError};
use crate::tags::Tags;
use crate::variable::{parse_value, Assignment, VariableContainer, VariableDomain};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LateVariableSection {
    content: String,
}

impl LateVariableSection {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Derive the final row. Every variable must end up with exactly one
    /// value.
    pub fn derive(&self, row: &Row, tags: &Tags) -> Result<Row> {
        let mut vars = VariableContainer::new();
        for (name, value) in row {
            vars.insert(name.clone(), VariableDomain::Simple(value.clone()));
        }

        for (i, line) in self.content.lines().enumerate() {
            derive_line(&mut vars, line, tags).map_err(|e| e.at_line(i + 1))?;
        }

        vars.iter()
            .map(|(name, domain)| match domain.count() {
                1 => Ok((name.to_string(), domain.first())),
                count => Err(TestieError::DerivationArity {
                    name: name.to_string(),
                    count,
                }),
            })
            .collect()
    }
}

fn derive_line(vars: &mut VariableContainer, line: &str, tags: &Tags) -> Result<()> {
    let Some(assignment) = Assignment::parse(line)? else {
        return Ok(());
    };
    if !assignment.applies(tags) {
        return Ok(());
    }
    let text = substitute(&vars.snapshot(), &assignment.value)?;
    let domain = parse_value(&text)?;
    vars.apply(assignment.name, assignment.op, domain)
}
