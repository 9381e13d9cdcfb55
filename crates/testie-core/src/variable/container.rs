use serde::Serialize;
use std::collections::BTreeMap;
use testie_subst::substitute;
use testie_types::{Row, ValueFormat};
use tracing::{debug, warn};

use super::{parse_value, AssignOp, Assignment, VariableDomain};
use crate::error::{Result, TestieError};
use crate::expansion::{expand, ExpandMode};
use crate::tags::Tags;

/// Parallel name/format lists describing a container's schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dtype {
    pub names: Vec<String>,
    pub formats: Vec<ValueFormat>,
}

/// Ordered mapping from variable name to domain.
///
/// A strict container only accepts names it already holds, falling back to
/// the singular form, the plural form and finally the alias table. Strict
/// names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContainer {
    vars: BTreeMap<String, VariableDomain>,
    aliases: BTreeMap<String, String>,
    strict: bool,
}

impl VariableContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(aliases: BTreeMap<String, String>) -> Self {
        Self {
            vars: BTreeMap::new(),
            aliases,
            strict: true,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn insert(&mut self, name: impl Into<String>, domain: VariableDomain) {
        self.vars.insert(name.into(), domain);
    }

    pub fn get(&self, name: &str) -> Option<&VariableDomain> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableDomain)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Apply every assignment line of a section body.
    ///
    /// Lines whose tag expression fails are skipped. The container is left
    /// untouched when any line fails.
    pub fn build(&mut self, content: &str, tags: &Tags) -> Result<()> {
        let mut working = self.clone();
        for (i, line) in content.lines().enumerate() {
            working
                .build_line(line, tags)
                .map_err(|e| e.at_line(i + 1))?;
        }
        debug!(variables = working.len(), strict = self.strict, "built variables");
        *self = working;
        Ok(())
    }

    fn build_line(&mut self, line: &str, tags: &Tags) -> Result<()> {
        let Some(assignment) = Assignment::parse(line)? else {
            return Ok(());
        };
        if !assignment.applies(tags) {
            return Ok(());
        }
        let name = if self.strict {
            self.resolve_name(&assignment.name)
                .ok_or_else(|| TestieError::UnknownVariable(assignment.name.clone()))?
        } else {
            assignment.name.clone()
        };
        let domain = self.coerce(&name, parse_value(&assignment.value)?);
        self.apply(name, assignment.op, domain)
    }

    // Strict containers read labelled lists as dictionaries when the
    // existing entry is a dictionary
    fn coerce(&self, name: &str, domain: VariableDomain) -> VariableDomain {
        match self.vars.get(name) {
            Some(VariableDomain::Dict(_)) if self.strict => domain.into_dict(),
            _ => domain,
        }
    }

    /// Apply one operator to a resolved name
    pub fn apply(&mut self, name: String, op: AssignOp, domain: VariableDomain) -> Result<()> {
        match op {
            AssignOp::Set => {
                self.vars.insert(name, domain);
            }
            AssignOp::Append => match self.vars.get_mut(&name) {
                Some(existing) => existing.merge(domain)?,
                None => {
                    self.vars.insert(name, domain);
                }
            },
            AssignOp::Default => {
                self.vars.entry(name).or_insert(domain);
            }
        }
        Ok(())
    }

    /// Resolve a name through singular, plural and alias fallbacks
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        let name = if self.strict {
            name.to_lowercase()
        } else {
            name.to_string()
        };
        self.existing_form(&name).or_else(|| {
            self.aliases
                .get(&name)
                .map(|target| self.existing_form(target).unwrap_or_else(|| target.clone()))
        })
    }

    fn existing_form(&self, name: &str) -> Option<String> {
        if self.vars.contains_key(name) {
            return Some(name.to_string());
        }
        if let Some(singular) = name.strip_suffix('s') {
            if self.vars.contains_key(singular) {
                return Some(singular.to_string());
            }
        }
        let plural = format!("{}s", name);
        self.vars.contains_key(&plural).then_some(plural)
    }

    /// Override one variable from outside the testie (command line,
    /// settings). Same operator rules as [`build`](Self::build).
    pub fn override_var(&mut self, name: &str, op: AssignOp, domain: VariableDomain) -> Result<()> {
        let resolved = if self.strict {
            self.resolve_name(name)
        } else {
            self.contains(name).then(|| name.to_string())
        };
        let name = match resolved {
            Some(resolved) => resolved,
            None if self.strict => return Err(TestieError::UnknownVariable(name.to_string())),
            None => {
                warn!(variable = name, "override does not replace any existing variable");
                name.to_string()
            }
        };
        let domain = self.coerce(&name, domain);
        self.apply(name, op, domain)
    }

    /// Override from `name=value` lines. Atomic like [`build`](Self::build).
    pub fn override_all<S: AsRef<str>>(&mut self, lines: &[S], tags: &Tags) -> Result<()> {
        let mut working = self.clone();
        for line in lines {
            let Some(assignment) = Assignment::parse(line.as_ref())? else {
                continue;
            };
            if !assignment.applies(tags) {
                continue;
            }
            let domain = parse_value(&assignment.value)?;
            working.override_var(&assignment.name, assignment.op, domain)?;
        }
        *self = working;
        Ok(())
    }

    /// Variables taking more than one value
    pub fn dynamics(&self) -> BTreeMap<&str, &VariableDomain> {
        self.iter().filter(|(_, d)| d.count() > 1).collect()
    }

    /// Variables taking at most one value
    pub fn statics(&self) -> BTreeMap<&str, &VariableDomain> {
        self.iter().filter(|(_, d)| d.count() <= 1).collect()
    }

    pub fn dtype(&self) -> Dtype {
        let (names, formats) = self
            .iter()
            .map(|(name, d)| (name.to_string(), d.format()))
            .unzip();
        Dtype { names, formats }
    }

    /// Number of rows in the full matrix, 0 when there are no variables
    pub fn matrix_size(&self) -> usize {
        if self.vars.is_empty() {
            return 0;
        }
        self.vars
            .values()
            .fold(1usize, |n, d| n.saturating_mul(d.count()))
    }

    /// Unknown names count as numeric
    pub fn is_numeric(&self, name: &str) -> bool {
        self.vars.get(name).map_or(true, VariableDomain::is_numeric)
    }

    /// Single-valued view: the first value of every domain
    pub fn snapshot(&self) -> Row {
        self.iter()
            .map(|(name, d)| (name.to_string(), d.first()))
            .collect()
    }

    pub fn expand(&self, mode: ExpandMode) -> Vec<Row> {
        expand(self, mode)
    }

    /// `text` substituted once per row of the brute expansion
    pub fn replace_all(&self, text: &str) -> Result<Vec<String>> {
        self.expand(ExpandMode::Brute)
            .iter()
            .map(|row| substitute(row, text).map_err(TestieError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use crate::tags::parse_tags;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use testie_types::Value;

    fn built(content: &str) -> VariableContainer {
        let mut c = VariableContainer::new();
        c.build(content, &Tags::new()).unwrap();
        c
    }

    fn text(s: &str) -> VariableDomain {
        VariableDomain::Simple(Value::text(s))
    }

    #[test]
    fn test_build_operators() {
        let c = built("A=1\nB={x,y}\nB+=z\nC?=5\nC?=6\nD+=7\n");
        assert_eq!(c.get("A"), Some(&text("1")));
        assert_eq!(c.get("B").map(VariableDomain::count), Some(3));
        assert_eq!(c.get("C"), Some(&text("5")));
        assert_eq!(c.get("D"), Some(&text("7")));
    }

    #[test]
    fn test_build_respects_tags() {
        let mut c = VariableContainer::new();
        c.build("N=1\ndpdk:N=2\n-dpdk:M=3", &parse_tags("dpdk"))
            .unwrap();
        assert_eq!(c.get("N"), Some(&text("2")));
        assert!(!c.contains("M"));
    }

    #[test]
    fn test_build_is_atomic() {
        let mut c = built("A=1");
        let err = c.build("A=2\nnot an assignment\n", &Tags::new()).unwrap_err();
        assert!(matches!(err, TestieError::AtLine { line: 2, .. }));
        assert_eq!(c.get("A"), Some(&text("1")));
    }

    #[test]
    fn test_merge_failure_is_reported() {
        let mut c = VariableContainer::new();
        c.insert("D", VariableDomain::Dict(BTreeMap::new()));
        let err = c.build("D+=x", &Tags::new()).unwrap_err();
        assert_eq!(
            err.root(),
            &TestieError::DomainMerge(DomainError::DictionaryMix("simple"))
        );
    }

    #[test]
    fn test_strict_singular_plural_alias() {
        let mut c = VariableContainer::strict(
            [("old_name".to_string(), "worker".to_string())].into(),
        );
        c.insert("worker", text("1"));
        c.insert("queues", text("1"));

        c.override_var("workers", AssignOp::Set, text("4")).unwrap();
        assert_eq!(c.get("worker"), Some(&text("4")));

        c.override_var("QUEUE", AssignOp::Set, text("2")).unwrap();
        assert_eq!(c.get("queues"), Some(&text("2")));

        c.build("old_name=8", &Tags::new()).unwrap();
        assert_eq!(c.get("worker"), Some(&text("8")));

        assert_eq!(
            c.override_var("nope", AssignOp::Set, text("1")),
            Err(TestieError::UnknownVariable("nope".into()))
        );
    }

    #[test]
    fn test_non_strict_override_creates() {
        let mut c = built("A=1");
        c.override_all(&["B={1,2}", "A?=9"], &Tags::new()).unwrap();
        assert_eq!(c.get("A"), Some(&text("1")));
        assert_eq!(c.get("B").map(VariableDomain::count), Some(2));
    }

    #[test]
    fn test_dynamics_and_statics() {
        let c = built("A={1,2}\nB=x\nC=[1-3]");
        assert_eq!(c.dynamics().keys().copied().collect::<Vec<_>>(), vec!["A", "C"]);
        assert_eq!(c.statics().keys().copied().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_dtype_and_numeric() {
        let c = built("PROTO={tcp,udp}\nSIZE=[64*256]");
        assert_eq!(
            c.dtype(),
            Dtype {
                names: vec!["PROTO".into(), "SIZE".into()],
                formats: vec![ValueFormat::Str, ValueFormat::Int],
            }
        );
        assert!(!c.is_numeric("PROTO"));
        assert!(c.is_numeric("SIZE"));
        assert!(c.is_numeric("UNKNOWN"));
    }

    #[test]
    fn test_matrix_size() {
        assert_eq!(VariableContainer::new().matrix_size(), 0);
        assert_eq!(built("A={1,2}\nB={x,y,z}").matrix_size(), 6);
    }

    #[test]
    fn test_replace_all() {
        let c = built("N={1,2}");
        assert_eq!(
            c.replace_all("n=$N sq=$($N*$N)").unwrap(),
            vec!["n=1 sq=1".to_string(), "n=2 sq=4".to_string()]
        );
    }

    fn container_from(counts: &[usize]) -> VariableContainer {
        let mut c = VariableContainer::new();
        for (i, n) in counts.iter().enumerate() {
            let values = (0..*n).map(|v| Value::Int(v as i64)).collect();
            c.insert(format!("V{}", i), VariableDomain::List(values));
        }
        c
    }

    proptest! {
        #[test]
        fn prop_dynamics_statics_partition(counts in prop::collection::vec(0usize..4, 0..6)) {
            let c = container_from(&counts);
            let dynamics = c.dynamics();
            let statics = c.statics();
            prop_assert_eq!(dynamics.len() + statics.len(), c.len());
            for (name, d) in c.iter() {
                prop_assert_eq!(dynamics.contains_key(name), d.count() > 1);
                prop_assert_eq!(statics.contains_key(name), d.count() <= 1);
            }
        }

        #[test]
        fn prop_matrix_size_is_product(counts in prop::collection::vec(1usize..5, 1..5)) {
            let c = container_from(&counts);
            prop_assert_eq!(c.matrix_size(), counts.iter().product::<usize>());
        }
    }
}
