//! Three-pass placeholder substitution

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use testie_types::Row;
use tracing::trace;

use crate::arith;
use crate::error::{ExprError, SubstitutionError};
use crate::nodes::{resolve_role, NodeResolver};

/// `$name` or `${name}`, optionally escaped with a leading backslash. Only
/// the braced form accepts `.` and `-`, so `$a.b` reads as `$a` then `.b`.
static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\\)?\$(?:\{([A-Za-z0-9_.-]+)\}|([A-Za-z0-9_]+))").unwrap()
});

/// `${role:index:attr}` where index is a literal or a row variable
static INTERFACE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\\)?\$\{([A-Za-z0-9_-]*):([0-9]+|[A-Za-z_][A-Za-z0-9_]*):([A-Za-z0-9_]+)\}")
        .unwrap()
});

static EMPTY_ROLE_MAP: LazyLock<BTreeMap<String, String>> = LazyLock::new(BTreeMap::new);

/// Substitute `text` against `row` with no node resolver and no role mapping
pub fn substitute(row: &Row, text: &str) -> Result<String, SubstitutionError> {
    Substituter::new().apply(row, text)
}

/// Configured substitution pass.
///
/// Without a node resolver, interface references are left as written so a
/// text can be previewed before the cluster is known.
#[derive(Clone, Copy, Default)]
pub struct Substituter<'a> {
    nodes: Option<&'a dyn NodeResolver>,
    self_role: Option<&'a str>,
    role_map: Option<&'a BTreeMap<String, String>>,
}

impl<'a> Substituter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(mut self, nodes: &'a dyn NodeResolver) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn with_self_role(mut self, role: &'a str) -> Self {
        self.self_role = Some(role);
        self
    }

    pub fn with_role_map(mut self, role_map: &'a BTreeMap<String, String>) -> Self {
        self.role_map = Some(role_map);
        self
    }

    pub fn apply(&self, row: &Row, text: &str) -> Result<String, SubstitutionError> {
        let text = replace_variables(row, text);
        let text = match self.nodes {
            Some(nodes) => self.replace_interfaces(nodes, row, &text)?,
            None => text,
        };
        Ok(replace_arithmetic(&text)?)
    }

    fn replace_interfaces(
        &self,
        nodes: &dyn NodeResolver,
        row: &Row,
        text: &str,
    ) -> Result<String, SubstitutionError> {
        let role_map = self.role_map.unwrap_or(&EMPTY_ROLE_MAP);
        replace_fallible(&INTERFACE_REF, text, |caps| {
            if caps.get(1).is_some() {
                return Ok(caps[0].to_string());
            }
            let role = resolve_role(&caps[2], self.self_role, role_map);
            let index = interface_index(row, &caps[3])?;
            let attribute = &caps[4];

            let node = nodes
                .resolve(role)
                .ok_or_else(|| SubstitutionError::UnknownRole(role.to_string()))?;
            let interface =
                node.interface_at(index)
                    .ok_or_else(|| SubstitutionError::UnknownInterface {
                        role: role.to_string(),
                        index,
                    })?;
            let value = interface
                .get(attribute)
                .ok_or_else(|| SubstitutionError::UnknownAttribute {
                    role: role.to_string(),
                    index,
                    attribute: attribute.to_string(),
                })?;
            trace!(role, index, attribute, value = %value, "interface reference");
            Ok(value.clone())
        })
    }
}

fn interface_index(row: &Row, raw: &str) -> Result<usize, SubstitutionError> {
    if let Ok(index) = raw.parse::<usize>() {
        return Ok(index);
    }
    row.get(raw)
        .and_then(|v| v.as_i64())
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| SubstitutionError::InvalidIndex(raw.to_string()))
}

fn replace_variables(row: &Row, text: &str) -> String {
    VARIABLE
        .replace_all(text, |caps: &Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match row.get(name) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn replace_fallible<F>(re: &Regex, text: &str, mut f: F) -> Result<String, SubstitutionError>
where
    F: FnMut(&Captures) -> Result<String, SubstitutionError>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        out.push_str(&text[last..whole.start]);
        out.push_str(&f(&caps)?);
        last = whole.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Replace every `$(expr)` span. Parentheses inside the span must balance.
fn replace_arithmetic(text: &str) -> Result<String, ExprError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("$(") {
        if rest[..start].ends_with('\\') {
            out.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            continue;
        }
        out.push_str(&rest[..start]);
        let body_start = start + 2;
        let end = closing_paren(&rest[body_start..])
            .ok_or_else(|| ExprError::Unterminated(rest[start..].to_string()))?;
        let expr = &rest[body_start..body_start + end];
        let result = arith::evaluate(expr.trim())?;
        out.push_str(&result.to_string());
        rest = &rest[body_start + end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// Offset of the parenthesis closing an already-open span
fn closing_paren(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, b) in body.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Interface, Node, StaticNodes};
    use pretty_assertions::assert_eq;
    use testie_types::Value;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn nodes() -> StaticNodes {
        let iface = |ip: &str, ifname: &str| -> Interface {
            [("ip", ip), ("ifname", ifname)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        let mut nodes = StaticNodes::new();
        nodes.insert(
            "client",
            Node::new("host-a")
                .with_interface(iface("10.0.0.1", "eth0"))
                .with_interface(iface("10.0.1.1", "eth1")),
        );
        nodes.insert(
            "server",
            Node::new("host-b").with_interface(iface("10.0.0.2", "eth0")),
        );
        nodes
    }

    #[test]
    fn test_variables_then_arithmetic() {
        let r = row(&[("n", Value::text("4"))]);
        assert_eq!(
            substitute(&r, "count=$n total=$(2*$n)").unwrap(),
            "count=4 total=8"
        );
    }

    #[test]
    fn test_braced_and_unknown_variables() {
        let r = row(&[("SIZE", Value::text("64"))]);
        assert_eq!(
            substitute(&r, "${SIZE}B $SIZE $MISSING ${MISSING}").unwrap(),
            "64B 64 $MISSING ${MISSING}"
        );
    }

    #[test]
    fn test_braced_names_with_dots_and_dashes() {
        let r = row(&[
            ("pkt.size", Value::text("64")),
            ("foo-bar", Value::text("7")),
            ("pkt", Value::text("P")),
        ]);
        assert_eq!(
            substitute(&r, "echo ${pkt.size} ${foo-bar} $pkt.size").unwrap(),
            "echo 64 7 P.size"
        );
    }

    #[test]
    fn test_escaped_placeholders_untouched() {
        let r = row(&[("n", Value::text("4"))]);
        assert_eq!(substitute(&r, r"echo \$n \$(ls)").unwrap(), r"echo \$n \$(ls)");
    }

    #[test]
    fn test_labeled_value_uses_first_element() {
        let r = row(&[("LEN", Value::labeled(Value::text("1500"), "large"))]);
        assert_eq!(substitute(&r, "len=$LEN").unwrap(), "len=1500");
    }

    #[test]
    fn test_nested_parentheses_in_arithmetic() {
        let r = Row::new();
        assert_eq!(substitute(&r, "x=$((1+2)*(3+4))!").unwrap(), "x=21!");
    }

    #[test]
    fn test_unterminated_arithmetic_is_fatal() {
        let err = substitute(&Row::new(), "x=$(1+2").unwrap_err();
        assert!(matches!(
            err,
            SubstitutionError::Expression(ExprError::Unterminated(_))
        ));
    }

    #[test]
    fn test_shell_command_span_is_fatal() {
        let err = substitute(&Row::new(), "now=$(date +%s)").unwrap_err();
        assert!(matches!(err, SubstitutionError::Expression(_)));
    }

    #[test]
    fn test_interface_references() {
        let nodes = nodes();
        let r = row(&[("IDX", Value::text("1"))]);
        let sub = Substituter::new().with_nodes(&nodes);
        assert_eq!(
            sub.apply(&r, "${client:0:ip} ${client:IDX:ifname} ${server:$IDX:ip}")
                .map_err(|e| e.to_string()),
            Err("node for role 'server' has no interface 1".to_string())
        );
        assert_eq!(
            sub.apply(&r, "${client:0:ip} ${client:IDX:ifname}").unwrap(),
            "10.0.0.1 eth1"
        );
    }

    #[test]
    fn test_self_role_and_role_map() {
        let nodes = nodes();
        let mut map = BTreeMap::new();
        map.insert("dut".to_string(), "server".to_string());
        let sub = Substituter::new()
            .with_nodes(&nodes)
            .with_self_role("dut")
            .with_role_map(&map);
        assert_eq!(
            sub.apply(&Row::new(), "${self:0:ip} ${:0:ip} ${dut:0:ifname}")
                .unwrap(),
            "10.0.0.2 10.0.0.2 eth0"
        );
    }

    #[test]
    fn test_unknown_attribute_and_index() {
        let nodes = nodes();
        let sub = Substituter::new().with_nodes(&nodes);
        assert!(matches!(
            sub.apply(&Row::new(), "${client:0:speed}"),
            Err(SubstitutionError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            sub.apply(&Row::new(), "${client:NIC:ip}"),
            Err(SubstitutionError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_references_verbatim_without_resolver() {
        assert_eq!(
            substitute(&Row::new(), "ping ${server:0:ip}").unwrap(),
            "ping ${server:0:ip}"
        );
    }
}
