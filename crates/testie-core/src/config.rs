//! Config registry
//!
//! The `%config` section of a testie assigns framework options. Every
//! recognized option is pre-seeded with its default, so assignments to an
//! unknown option are rejected (after singular/plural and legacy-name
//! fallbacks). Keys are case-insensitive.

use regex::Regex;
use std::collections::BTreeMap;
use testie_types::Value;
use tracing::warn;

use crate::error::Result;
use crate::tags::Tags;
use crate::variable::{AssignOp, VariableContainer, VariableDomain};

/// Pattern extracting `RESULT[-TYPE] value[unit]` lines from run output
pub const DEFAULT_RESULT_REGEX: &str = r"(:?(?P<time>[0-9.]+)-)?RESULT(:?-(?P<type>[A-Z0-9_:~.-]+))?[ \t]+(?P<value>[0-9.]+(e[+-][0-9]+)?)[ ]*(?P<multiplier>[nµugmkKGT]?)(?P<unit>s|sec|b|byte|bits)?";

/// Legacy and alternate option names
pub const ALIASES: &[(&str, &str)] = &[
    ("graph_variable_as_series", "graph_variables_as_series"),
    ("graph_grid", "var_grid"),
    ("graph_serie", "var_serie"),
    ("var_combine", "graph_combine_variables"),
    ("series_as_variables", "graph_series_as_variables"),
    ("var_as_series", "graph_variables_as_series"),
    ("result_as_variables", "graph_result_as_variables"),
    ("series_prop", "graph_series_prop"),
    ("graph_legend_ncol", "legend_ncol"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRegistry {
    vars: VariableContainer,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn null() -> VariableDomain {
    VariableDomain::Simple(Value::Null)
}

fn scalar(v: impl Into<Value>) -> VariableDomain {
    VariableDomain::Simple(v.into())
}

fn list<V: Into<Value> + Clone>(items: &[V]) -> VariableDomain {
    VariableDomain::List(items.iter().cloned().map(Into::into).collect())
}

fn dict(entries: &[(&str, Value)]) -> VariableDomain {
    VariableDomain::Dict(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn empty_list() -> VariableDomain {
    VariableDomain::List(Vec::new())
}

fn empty_dict() -> VariableDomain {
    VariableDomain::Dict(BTreeMap::new())
}

fn catalogue() -> Vec<(&'static str, VariableDomain)> {
    vec![
        // environment and run control
        ("default_repo", null()),
        ("accept_zero", empty_dict()),
        ("n_supplementary_runs", scalar(3i64)),
        ("acceptable", scalar(0.01)),
        ("accept_outliers_mult", scalar(1i64)),
        ("accept_variance", scalar(1i64)),
        ("n_runs", scalar(3i64)),
        ("n_retry", scalar(0i64)),
        ("result_regex", list(&[DEFAULT_RESULT_REGEX])),
        ("results_expect", empty_list()),
        ("autokill", scalar(true)),
        ("critical", scalar(false)),
        ("env", empty_dict()),
        ("timeout", scalar(30i64)),
        ("time_precision", scalar(1i64)),
        ("default_role_map", empty_dict()),
        ("role_exclude", empty_list()),
        ("require_tags", empty_list()),
        ("title", null()),
        // graphing
        ("graph_combine_variables", empty_dict()),
        ("graph_subplot_results", empty_dict()),
        ("graph_subplot_variable", null()),
        ("graph_display_statics", empty_list()),
        ("graph_variables_as_series", empty_list()),
        ("graph_hide_variables", empty_list()),
        ("graph_result_as_variable", empty_dict()),
        ("graph_map", empty_dict()),
        ("graph_scatter", scalar(false)),
        ("graph_subplot_type", scalar("subplot")),
        ("graph_max_series", null()),
        ("graph_series_as_variables", scalar(false)),
        ("graph_series_prop", scalar(false)),
        ("graph_series_sort", null()),
        ("graph_series_label", null()),
        ("graph_bar_stack", scalar(false)),
        ("graph_text", scalar("")),
        ("graph_legend", scalar(true)),
        ("graph_error_fill", scalar(false)),
        ("graph_error", empty_dict()),
        ("graph_mode", null()),
        ("graph_y_group", empty_dict()),
        ("graph_color", empty_list()),
        (
            "graph_markers",
            list(&["o", "^", "s", "D", "*", "x", ".", "_", "H", ">", "<", "v", "d"]),
        ),
        ("graph_lines", list(&["-", "--", "-.", ":"])),
        (
            "legend_bbox",
            VariableDomain::List(vec![
                Value::Int(0),
                Value::Int(1),
                Value::Int(1),
                Value::Float(0.1),
            ]),
        ),
        ("legend_loc", scalar("best")),
        ("legend_ncol", scalar(1i64)),
        // per-variable presentation
        ("var_hide", empty_dict()),
        ("var_log", empty_list()),
        ("var_log_base", empty_dict()),
        ("var_divider", dict(&[("result", Value::Int(1))])),
        ("var_lim", empty_dict()),
        ("var_format", empty_dict()),
        ("var_ticks", empty_dict()),
        ("var_grid", empty_list()),
        ("var_serie", null()),
        (
            "var_names",
            dict(&[
                ("result-LATENCY", Value::text("Latency (µs)")),
                ("result-THROUGHPUT", Value::text("Throughput")),
            ]),
        ),
        (
            "var_unit",
            dict(&[
                ("result", Value::text("bps")),
                ("result-LATENCY", Value::text("us")),
                ("latency", Value::text("us")),
                ("throughput", Value::text("bps")),
            ]),
        ),
        ("var_round", empty_dict()),
        ("var_repeat", empty_dict()),
        ("var_drawstyle", empty_dict()),
    ]
}

fn collapse(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::List(values)
    }
}

impl ConfigRegistry {
    /// Registry holding every option at its default
    pub fn new() -> Self {
        let aliases = ALIASES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        let mut vars = VariableContainer::strict(aliases);
        for (name, domain) in catalogue() {
            vars.insert(name, domain);
        }
        Self { vars }
    }

    /// Apply a `%config` body
    pub fn build(&mut self, content: &str, tags: &Tags) -> Result<()> {
        self.vars.build(content, tags)
    }

    pub fn variables(&self) -> &VariableContainer {
        &self.vars
    }

    fn domain(&self, key: &str) -> Option<&VariableDomain> {
        self.vars.get(&key.to_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.domain(key).is_some()
    }

    /// The single value of an option, or a list when it holds several
    pub fn get(&self, key: &str) -> Option<Value> {
        self.domain(key).map(|d| collapse(d.values()))
    }

    pub fn get_list(&self, key: &str) -> Vec<Value> {
        self.domain(key).map(VariableDomain::values).unwrap_or_default()
    }

    /// Dictionary view of an option. A non-dictionary entry degrades to
    /// `{key: first value}`.
    pub fn get_dict(&self, key: &str) -> BTreeMap<String, Value> {
        let key = key.to_lowercase();
        match self.vars.get(&key) {
            Some(VariableDomain::Dict(entries)) => entries
                .iter()
                .map(|(k, v)| (k.trim().to_string(), v.clone()))
                .collect(),
            Some(other) => {
                warn!(option = %key, "configuration entry is not a dictionary");
                BTreeMap::from([(key, other.first())])
            }
            None => BTreeMap::new(),
        }
    }

    /// Look up `subkey` in dictionary option `key`.
    ///
    /// With a result type the lookup tries `subkey-type`, then `type`, then
    /// `subkey`. A miss is retried with the lower-cased subkey.
    pub fn get_dict_value(
        &self,
        key: &str,
        subkey: &str,
        result_type: Option<&str>,
        default: Option<Value>,
    ) -> Option<Value> {
        if !self.contains(key) {
            return default;
        }
        let d = self.get_dict(key);
        let found = match result_type {
            None => d.get(subkey),
            Some(rt) => d
                .get(&format!("{}-{}", subkey, rt))
                .or_else(|| d.get(rt))
                .or_else(|| d.get(subkey)),
        };
        match found {
            Some(v) => Some(v.clone()),
            None => {
                let lower = subkey.to_lowercase();
                if lower != subkey {
                    self.get_dict_value(key, &lower, result_type, default)
                } else {
                    default
                }
            }
        }
    }

    /// Store under the lower-cased key, creating it if needed
    pub fn set(&mut self, key: &str, domain: impl Into<VariableDomain>) {
        self.vars.insert(key.to_lowercase(), domain.into());
    }

    /// Whether any pattern listed under `key` matches the start of `candidate`
    pub fn matches(&self, key: &str, candidate: &str) -> Result<bool> {
        for pattern in self.get_list(key) {
            let re = Regex::new(&format!("^(?:{})", pattern))?;
            if re.is_match(candidate) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// Textual value; `None` for unset (null) options
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_null()).map(|v| v.to_string())
    }

    /// Display name of a variable, from `var_names`
    pub fn var_name(&self, key: &str) -> String {
        let names = self.get_dict("var_names");
        names
            .get(key)
            .or_else(|| names.get(&key.to_lowercase()))
            .map(|v| v.to_string())
            .unwrap_or_else(|| key.to_string())
    }

    /// `default_role_map` as plain strings
    pub fn role_map(&self) -> BTreeMap<String, String> {
        self.get_dict("default_role_map")
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect()
    }

    pub fn override_var(&mut self, key: &str, op: AssignOp, domain: VariableDomain) -> Result<()> {
        self.vars.override_var(key, op, domain)
    }

    pub fn override_all<S: AsRef<str>>(&mut self, lines: &[S], tags: &Tags) -> Result<()> {
        self.vars.override_all(lines, tags)
    }

    /// Every option with its current value
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        let table: BTreeMap<&str, Value> = self
            .vars
            .iter()
            .map(|(k, d)| (k, collapse(d.values())))
            .collect();
        serde_json::to_value(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestieError;
    use pretty_assertions::assert_eq;

    fn built(content: &str) -> ConfigRegistry {
        let mut c = ConfigRegistry::new();
        c.build(content, &Tags::new()).unwrap();
        c
    }

    #[test]
    fn test_defaults() {
        let c = ConfigRegistry::new();
        assert_eq!(c.get_int("n_runs"), Some(3));
        assert_eq!(c.get_float("acceptable"), Some(0.01));
        assert_eq!(c.get_bool("autokill"), Some(true));
        assert_eq!(c.get_str("title"), None);
        assert_eq!(c.get_list("graph_lines").len(), 4);
        assert_eq!(c.get("legend_bbox").map(|v| v.to_string()), Some("0,1,1,0.1".into()));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let c = built("N_RUNS=10");
        assert!(c.contains("N_Runs"));
        assert_eq!(c.get_int("n_runs"), Some(10));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut c = ConfigRegistry::new();
        let err = c.build("bogus_option=1", &Tags::new()).unwrap_err();
        assert_eq!(err.root(), &TestieError::UnknownVariable("bogus_option".into()));
    }

    #[test]
    fn test_plural_and_alias_fallback() {
        let c = built("n_run=5\ngraph_grid={x}\nresult_as_variables={a:b}\ngraph_legend_ncol=3");
        assert_eq!(c.get_int("n_runs"), Some(5));
        assert_eq!(c.get_list("var_grid"), vec![Value::text("x")]);
        assert_eq!(
            c.get_dict("graph_result_as_variable").get("a"),
            Some(&Value::text("b"))
        );
        assert_eq!(c.get_int("legend_ncol"), Some(3));
    }

    #[test]
    fn test_labelled_list_onto_dict() {
        let c = built("var_divider={result:1000}\nvar_unit+={rate:pps}");
        assert_eq!(
            c.get_dict("var_divider").get("result"),
            Some(&Value::text("1000"))
        );
        let units = c.get_dict("var_unit");
        assert_eq!(units.get("rate"), Some(&Value::text("pps")));
        assert_eq!(units.get("result"), Some(&Value::text("bps")));
    }

    #[test]
    fn test_get_dict_degrades() {
        let c = ConfigRegistry::new();
        assert_eq!(
            c.get_dict("n_runs"),
            BTreeMap::from([("n_runs".to_string(), Value::Int(3))])
        );
    }

    #[test]
    fn test_get_dict_value_chain() {
        let c = ConfigRegistry::new();
        assert_eq!(
            c.get_dict_value("var_unit", "result", Some("LATENCY"), None),
            Some(Value::text("us"))
        );
        assert_eq!(
            c.get_dict_value("var_unit", "result", Some("THROUGHPUT"), None),
            Some(Value::text("bps"))
        );
        assert_eq!(
            c.get_dict_value("var_unit", "LATENCY", None, None),
            Some(Value::text("us"))
        );
        assert_eq!(
            c.get_dict_value("var_unit", "jitter", None, Some(Value::text("?"))),
            Some(Value::text("?"))
        );
        assert_eq!(c.get_dict_value("nothing", "x", None, None), None);
    }

    #[test]
    fn test_matches_anchored_patterns() {
        let mut c = ConfigRegistry::new();
        c.set("role_exclude", VariableDomain::List(vec![Value::text("cli.*")]));
        assert_eq!(c.matches("role_exclude", "client"), Ok(true));
        assert_eq!(c.matches("role_exclude", "myclient"), Ok(false));

        c.set("role_exclude", VariableDomain::List(vec![Value::text("(")]));
        assert!(matches!(
            c.matches("role_exclude", "x"),
            Err(TestieError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_default_result_regex_extracts() {
        let c = ConfigRegistry::new();
        assert_eq!(c.matches("result_regex", "RESULT-LATENCY 12.5us"), Ok(true));
        let re = Regex::new(DEFAULT_RESULT_REGEX).unwrap();
        let caps = re.captures("RESULT-THROUGHPUT 9.4G").unwrap();
        assert_eq!(&caps["type"], "THROUGHPUT");
        assert_eq!(&caps["value"], "9.4");
        assert_eq!(&caps["multiplier"], "G");
    }

    #[test]
    fn test_var_name_and_role_map() {
        let c = built("default_role_map={dut:server}");
        assert_eq!(c.var_name("result-LATENCY"), "Latency (µs)");
        assert_eq!(c.var_name("PPS"), "PPS");
        assert_eq!(
            c.role_map(),
            BTreeMap::from([("dut".to_string(), "server".to_string())])
        );
    }

    #[test]
    fn test_strict_override() {
        let mut c = ConfigRegistry::new();
        c.override_all(&["N_RETRY=2", "timeout?=99"], &Tags::new())
            .unwrap();
        assert_eq!(c.get_int("n_retry"), Some(2));
        assert_eq!(c.get_int("timeout"), Some(30));
        assert!(c.override_all(&["bogus=1"], &Tags::new()).is_err());
    }

    #[test]
    fn test_to_json() {
        let json = ConfigRegistry::new().to_json().unwrap();
        assert_eq!(json["n_runs"], serde_json::json!(3));
        assert_eq!(json["title"], serde_json::Value::Null);
    }
}
