use regex::Regex;
use std::sync::LazyLock;
use testie_types::Value;

use super::VariableDomain;
use crate::error::GrammarError;

/// `[a-b]`, `[a-b#step]`, `[a*b]`, `[a*b#factor]`
static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\s*(-?[0-9]*\.?[0-9]+)\s*([-*])\s*(-?[0-9]*\.?[0-9]+)\s*(?:#\s*(-?[0-9]*\.?[0-9]+)\s*)?\]$")
        .unwrap()
});

// Guards against runaway materialization of float ranges
const MAX_RANGE_LEN: usize = 1_000_000;

/// Parse the right-hand side of an assignment into a domain
pub fn parse_value(text: &str) -> Result<VariableDomain, GrammarError> {
    let text = text.trim();

    if let Some(caps) = RANGE.captures(text) {
        let step = caps.get(4).map(|m| m.as_str());
        return if &caps[2] == "*" {
            multiplicative(text, &caps[1], &caps[3], step)
        } else {
            additive(text, &caps[1], &caps[3], step)
        };
    }

    if let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        return Ok(VariableDomain::List(list_items(inner)));
    }

    Ok(VariableDomain::Simple(Value::text(text)))
}

fn list_items(inner: &str) -> Vec<Value> {
    if inner.trim().is_empty() {
        return vec![Value::text("")];
    }
    inner
        .split(',')
        .map(str::trim)
        .map(|item| match item.split_once(':') {
            Some((value, label)) => Value::labeled(Value::text(value.trim()), label.trim()),
            None => Value::text(item),
        })
        .collect()
}

fn invalid(expr: &str, reason: impl Into<String>) -> GrammarError {
    GrammarError::InvalidValue {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn number(expr: &str, raw: &str) -> Result<f64, GrammarError> {
    raw.parse::<f64>()
        .map_err(|_| invalid(expr, format!("'{}' is not a number", raw)))
}

fn is_float(parts: &[Option<&str>]) -> bool {
    parts.iter().flatten().any(|p| p.contains('.'))
}

fn additive(
    expr: &str,
    start: &str,
    end: &str,
    step: Option<&str>,
) -> Result<VariableDomain, GrammarError> {
    if !is_float(&[Some(start), Some(end), step]) {
        let parse = |raw: &str| {
            raw.parse::<i64>()
                .map_err(|_| invalid(expr, format!("'{}' is not an integer", raw)))
        };
        let (a, b) = (parse(start)?, parse(end)?);
        let step = step.map(parse).transpose()?.unwrap_or(1);
        if step <= 0 {
            return Err(invalid(expr, "step must be positive"));
        }
        if a > b {
            return Err(invalid(expr, "empty range"));
        }
        let span = b
            .checked_sub(a)
            .ok_or_else(|| invalid(expr, "range bounds overflow"))?;
        let len = (span / step) as usize + 1;
        if len > MAX_RANGE_LEN {
            return Err(invalid(expr, "range too large"));
        }
        // i * step never exceeds span, so a + i * step stays within [a, b]
        let values = (0..len as i64).map(|i| Value::Int(a + i * step)).collect();
        return Ok(VariableDomain::Range(values));
    }

    let (a, b) = (number(expr, start)?, number(expr, end)?);
    let step = step.map(|s| number(expr, s)).transpose()?.unwrap_or(1.0);
    if step <= 0.0 {
        return Err(invalid(expr, "step must be positive"));
    }
    if a > b {
        return Err(invalid(expr, "empty range"));
    }
    let len = ((b - a) / step + 1e-9).floor() as usize + 1;
    if len > MAX_RANGE_LEN {
        return Err(invalid(expr, "range too large"));
    }
    // Index-based so float steps do not accumulate error
    let values = (0..len)
        .map(|i| Value::Float(round_to_step(a + i as f64 * step)))
        .collect();
    Ok(VariableDomain::Range(values))
}

fn round_to_step(v: f64) -> f64 {
    if v.abs() >= 1e9 {
        return v;
    }
    (v * 1e9).round() / 1e9
}

fn integer(expr: &str, raw: &str) -> Result<i64, GrammarError> {
    raw.parse::<i64>()
        .map_err(|_| invalid(expr, format!("'{}' is not an integer in range", raw)))
}

fn multiplicative(
    expr: &str,
    start: &str,
    end: &str,
    factor: Option<&str>,
) -> Result<VariableDomain, GrammarError> {
    if !is_float(&[Some(start), Some(end), factor]) {
        let (a, b) = (integer(expr, start)?, integer(expr, end)?);
        let factor = factor.map(|f| integer(expr, f)).transpose()?.unwrap_or(2);
        check_multiplicative(expr, a as f64, b as f64, factor as f64)?;

        let mut values = Vec::new();
        let mut next = Some(a);
        while let Some(v) = next.filter(|v| *v <= b) {
            values.push(Value::Int(v));
            next = v.checked_mul(factor);
        }
        return Ok(VariableDomain::Range(values));
    }

    let (a, b) = (number(expr, start)?, number(expr, end)?);
    let factor = factor.map(|f| number(expr, f)).transpose()?.unwrap_or(2.0);
    check_multiplicative(expr, a, b, factor)?;

    let mut values = Vec::new();
    let mut v = a;
    while v <= b {
        values.push(Value::Float(round_to_step(v)));
        v *= factor;
    }
    Ok(VariableDomain::Range(values))
}

fn check_multiplicative(expr: &str, a: f64, b: f64, factor: f64) -> Result<(), GrammarError> {
    if factor <= 1.0 {
        return Err(invalid(expr, "factor must be greater than 1"));
    }
    if a <= 0.0 {
        return Err(invalid(expr, "multiplicative range must start above 0"));
    }
    if a > b {
        return Err(invalid(expr, "empty range"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ints(values: &[i64]) -> VariableDomain {
        VariableDomain::Range(values.iter().map(|v| Value::Int(*v)).collect())
    }

    #[test]
    fn test_additive_range() {
        assert_eq!(parse_value("[1-4]").unwrap(), ints(&[1, 2, 3, 4]));
        assert_eq!(parse_value("[0-10#5]").unwrap(), ints(&[0, 5, 10]));
        assert_eq!(parse_value("[ 2 - 7 # 2 ]").unwrap(), ints(&[2, 4, 6]));
    }

    #[test]
    fn test_float_range() {
        let d = parse_value("[0-1#0.25]").unwrap();
        assert_eq!(d.count(), 5);
        assert_eq!(d.values()[1], Value::Float(0.25));
        assert_eq!(d.values()[4].to_string(), "1.0");
    }

    #[test]
    fn test_multiplicative_range() {
        assert_eq!(parse_value("[1*16]").unwrap(), ints(&[1, 2, 4, 8, 16]));
        assert_eq!(parse_value("[64*1500#4]").unwrap(), ints(&[64, 256, 1024]));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(parse_value("[5-1]").is_err());
        assert!(parse_value("[1-5#0]").is_err());
        assert!(parse_value("[1*8#1]").is_err());
        assert!(parse_value("[0*8]").is_err());
    }

    #[test]
    fn test_extreme_bounds_are_rejected() {
        let err = parse_value("[-9223372036854775807-9223372036854775807]").unwrap_err();
        assert!(matches!(err, GrammarError::InvalidValue { .. }));
        assert!(parse_value("[1*100000000000000000000]").is_err());
        assert!(parse_value("[0-9223372036854775807]").is_err());
    }

    #[test]
    fn test_multiplicative_range_stops_before_overflow() {
        let d = parse_value("[1*9223372036854775807]").unwrap();
        let values = d.values();
        assert_eq!(values.len(), 63);
        assert_eq!(values.last(), Some(&Value::Int(1 << 62)));
        let distinct: std::collections::BTreeSet<String> =
            values.iter().map(|v| v.to_string()).collect();
        assert_eq!(distinct.len(), values.len());
    }

    #[test]
    fn test_lists() {
        assert_eq!(
            parse_value("{tcp, udp}").unwrap(),
            VariableDomain::List(vec![Value::text("tcp"), Value::text("udp")])
        );
        assert_eq!(
            parse_value("{}").unwrap(),
            VariableDomain::List(vec![Value::text("")])
        );
        let labelled = parse_value("{64:small,1500:large}").unwrap();
        assert_eq!(labelled.count(), 2);
        assert_eq!(labelled.values()[1].label(), Some("large"));
        assert_eq!(labelled.values()[1].to_string(), "1500");
    }

    #[test]
    fn test_scalar_keeps_text() {
        assert_eq!(
            parse_value(" 007 ").unwrap(),
            VariableDomain::Simple(Value::text("007"))
        );
        assert_eq!(
            parse_value("[abc]").unwrap(),
            VariableDomain::Simple(Value::text("[abc]"))
        );
    }
}
