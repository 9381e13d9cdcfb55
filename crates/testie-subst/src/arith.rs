//! Restricted arithmetic evaluator
//!
//! Evaluates the `$(...)` spans of testie text. The grammar is deliberately
//! small: numeric and boolean literals, the usual operators, parentheses and a
//! fixed allow-list of functions. There are no names, assignments or
//! statements, so evaluating untrusted text cannot do anything but compute.
//!
//! ```text
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := "not" not_expr | comparison
//! comparison := arith (("=="|"!="|"<="|">="|"<"|">") arith)?
//! arith      := term (("+"|"-") term)*
//! term       := factor (("*"|"/"|"//"|"%") factor)*
//! factor     := ("+"|"-") factor | power
//! power      := atom ("**" factor)?
//! atom       := number | "True" | "False" | call | "(" or_expr ")"
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value},
    error::{convert_error, ContextError, ErrorKind, ParseError as NomParseError, VerboseError},
    multi::{fold_many0, many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use std::cmp::Ordering;
use std::fmt;
use testie_types::{format_float, Value};

use crate::error::ExprError;

// ============================================================================
// Public API
// ============================================================================

/// Parse and evaluate one arithmetic expression
pub fn evaluate(input: &str) -> Result<Number, ExprError> {
    parse_expr(input)?.eval()
}

/// Parse an expression into its AST
pub fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    match all_consuming(delimited(
        multispace0,
        or_expr::<VerboseError<&str>>,
        multispace0,
    ))(input)
    {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ExprError::Parse {
            expr: input.to_string(),
            message: convert_error(input, e),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ExprError::Parse {
            expr: input.to_string(),
            message: "incomplete input".to_string(),
        }),
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Name(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Result of an evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Number {
    fn as_int(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Bool(b) => Some(b as i64),
            Number::Float(_) => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
            Number::Bool(b) => b as i64 as f64,
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Number::Int(i) => i != 0,
            Number::Float(f) => f != 0.0,
            Number::Bool(b) => b,
        }
    }

    fn compare(self, other: Number) -> Option<Ordering> {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(n) => write!(f, "{}", format_float(*n)),
            Number::Bool(true) => write!(f, "True"),
            Number::Bool(false) => write!(f, "False"),
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
            Number::Bool(b) => Value::Bool(b),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl Expr {
    pub fn eval(&self) -> Result<Number, ExprError> {
        match self {
            Expr::Int(i) => Ok(Number::Int(*i)),
            Expr::Float(f) => Ok(Number::Float(*f)),
            Expr::Bool(b) => Ok(Number::Bool(*b)),
            Expr::Name(name) => Err(ExprError::UnknownName(name.clone())),
            Expr::Unary(op, operand) => unary(*op, operand.eval()?),
            // and/or short-circuit and yield an operand, not a bool
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let l = lhs.eval()?;
                if l.truthy() {
                    rhs.eval()
                } else {
                    Ok(l)
                }
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let l = lhs.eval()?;
                if l.truthy() {
                    Ok(l)
                } else {
                    rhs.eval()
                }
            }
            Expr::Binary(op, lhs, rhs) => binary(*op, lhs.eval()?, rhs.eval()?),
            Expr::Call(name, args) => {
                let args = args.iter().map(Expr::eval).collect::<Result<Vec<_>, _>>()?;
                call(name, &args)
            }
        }
    }
}

fn unary(op: UnaryOp, v: Number) -> Result<Number, ExprError> {
    Ok(match op {
        UnaryOp::Not => Number::Bool(!v.truthy()),
        UnaryOp::Pos => match v {
            Number::Bool(b) => Number::Int(b as i64),
            other => other,
        },
        UnaryOp::Neg => match v.as_int() {
            Some(i) => i
                .checked_neg()
                .map(Number::Int)
                .unwrap_or(Number::Float(-(i as f64))),
            None => Number::Float(-v.as_f64()),
        },
    })
}

fn binary(op: BinaryOp, a: Number, b: Number) -> Result<Number, ExprError> {
    use BinaryOp::*;

    if let Eq | Ne | Lt | Le | Gt | Ge = op {
        let ord = a.compare(b);
        let result = match op {
            Eq => ord == Some(Ordering::Equal),
            Ne => ord != Some(Ordering::Equal),
            Lt => ord == Some(Ordering::Less),
            Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            Gt => ord == Some(Ordering::Greater),
            _ => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        };
        return Ok(Number::Bool(result));
    }

    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => int_binary(op, x, y),
        _ => float_binary(op, a.as_f64(), b.as_f64()),
    }
}

// Integer arithmetic stays integral; overflow falls back to floats.
fn int_binary(op: BinaryOp, x: i64, y: i64) -> Result<Number, ExprError> {
    let promote = |checked: Option<i64>| -> Result<Number, ExprError> {
        match checked {
            Some(v) => Ok(Number::Int(v)),
            None => float_binary(op, x as f64, y as f64),
        }
    };
    match op {
        BinaryOp::Add => promote(x.checked_add(y)),
        BinaryOp::Sub => promote(x.checked_sub(y)),
        BinaryOp::Mul => promote(x.checked_mul(y)),
        BinaryOp::Div => {
            if y == 0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(Number::Float(x as f64 / y as f64))
        }
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(ExprError::DivisionByZero);
            }
            promote(x.checked_div(y).map(|q| {
                if x % y != 0 && ((x < 0) != (y < 0)) {
                    q - 1
                } else {
                    q
                }
            }))
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(ExprError::DivisionByZero);
            }
            // The remainder takes the sign of the divisor
            promote(x.checked_rem(y).map(|r| {
                if r != 0 && ((r < 0) != (y < 0)) {
                    r + y
                } else {
                    r
                }
            }))
        }
        BinaryOp::Pow => {
            if y >= 0 {
                promote(u32::try_from(y).ok().and_then(|e| x.checked_pow(e)))
            } else {
                float_binary(op, x as f64, y as f64)
            }
        }
        _ => float_binary(op, x as f64, y as f64),
    }
}

fn float_binary(op: BinaryOp, x: f64, y: f64) -> Result<Number, ExprError> {
    let v = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if y == 0.0 => {
            return Err(ExprError::DivisionByZero)
        }
        BinaryOp::Div => x / y,
        BinaryOp::FloorDiv => (x / y).floor(),
        BinaryOp::Mod => x - y * (x / y).floor(),
        BinaryOp::Pow => {
            let v = x.powf(y);
            if v.is_nan() && !x.is_nan() && !y.is_nan() {
                return Err(ExprError::Domain("pow".to_string()));
            }
            v
        }
        _ => return Err(ExprError::Domain(format!("{:?}", op).to_lowercase())),
    };
    Ok(Number::Float(v))
}

/// `None` for NaN, infinities and values outside the i64 range
fn float_to_int(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX as f64 rounds up to it
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.is_finite() && f >= -LIMIT && f < LIMIT).then_some(f as i64)
}

fn call(name: &str, args: &[Number]) -> Result<Number, ExprError> {
    let arity = |expected: &'static str, ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(ExprError::Arity {
                function: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    let domain = || ExprError::Domain(name.to_string());

    match name {
        "abs" => {
            arity("1", args.len() == 1)?;
            Ok(match args[0] {
                Number::Float(f) => Number::Float(f.abs()),
                other => {
                    let i = other.as_int().unwrap_or_default();
                    i.checked_abs()
                        .map(Number::Int)
                        .unwrap_or(Number::Float((i as f64).abs()))
                }
            })
        }
        "min" | "max" => {
            arity("at least 1", !args.is_empty())?;
            let mut best = args[0];
            for &candidate in &args[1..] {
                let ord = candidate.compare(best);
                let better = if name == "min" {
                    ord == Some(Ordering::Less)
                } else {
                    ord == Some(Ordering::Greater)
                };
                if better {
                    best = candidate;
                }
            }
            Ok(best)
        }
        "round" => {
            arity("1 or 2", matches!(args.len(), 1 | 2))?;
            let x = args[0];
            match args.get(1) {
                None => match x {
                    Number::Float(f) => float_to_int(f.round_ties_even())
                        .map(Number::Int)
                        .ok_or_else(domain),
                    other => Ok(Number::Int(other.as_int().unwrap_or_default())),
                },
                Some(digits) => {
                    let digits = digits.as_int().ok_or_else(domain)?;
                    match x {
                        Number::Float(f) => {
                            let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
                            let scaled = f * scale;
                            // Past 2^52 a float has no fractional digits left to round
                            if scaled.is_finite() && scaled.abs() < 4_503_599_627_370_496.0 {
                                Ok(Number::Float(scaled.round_ties_even() / scale))
                            } else {
                                Ok(Number::Float(f))
                            }
                        }
                        other => Ok(Number::Int(other.as_int().unwrap_or_default())),
                    }
                }
            }
        }
        "int" => {
            arity("1", args.len() == 1)?;
            match args[0] {
                Number::Float(f) => float_to_int(f.trunc()).map(Number::Int).ok_or_else(domain),
                other => Ok(Number::Int(other.as_int().unwrap_or_default())),
            }
        }
        "float" => {
            arity("1", args.len() == 1)?;
            Ok(Number::Float(args[0].as_f64()))
        }
        "floor" | "ceil" => {
            arity("1", args.len() == 1)?;
            if let Some(i) = args[0].as_int() {
                return Ok(Number::Int(i));
            }
            let x = args[0].as_f64();
            let v = if name == "floor" { x.floor() } else { x.ceil() };
            float_to_int(v).map(Number::Int).ok_or_else(domain)
        }
        "sqrt" => {
            arity("1", args.len() == 1)?;
            let x = args[0].as_f64();
            if x < 0.0 {
                return Err(domain());
            }
            Ok(Number::Float(x.sqrt()))
        }
        "pow" => {
            arity("2", args.len() == 2)?;
            binary(BinaryOp::Pow, args[0], args[1])
        }
        "log" => {
            arity("1 or 2", matches!(args.len(), 1 | 2))?;
            let x = args[0].as_f64();
            if x <= 0.0 {
                return Err(domain());
            }
            match args.get(1) {
                None => Ok(Number::Float(x.ln())),
                Some(base) => {
                    let base = base.as_f64();
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain());
                    }
                    Ok(Number::Float(x.ln() / base.ln()))
                }
            }
        }
        "log2" | "log10" => {
            arity("1", args.len() == 1)?;
            let x = args[0].as_f64();
            if x <= 0.0 {
                return Err(domain());
            }
            Ok(Number::Float(if name == "log2" { x.log2() } else { x.log10() }))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

// ============================================================================
// Internal Parsers
// ============================================================================

fn ws<'a, O, E, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    E: NomParseError<&'a str>,
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a, E: NomParseError<&'a str>>(
    kw: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    terminated(tag(kw), not(satisfy(|c: char| c.is_alphanumeric() || c == '_')))
}

fn binary_node(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

fn or_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(ws(keyword("or")), and_expr::<E>),
        move || first.clone(),
        |acc, rhs| binary_node(BinaryOp::Or, acc, rhs),
    )(input)
}

fn and_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = not_expr(input)?;
    fold_many0(
        preceded(ws(keyword("and")), not_expr::<E>),
        move || first.clone(),
        |acc, rhs| binary_node(BinaryOp::And, acc, rhs),
    )(input)
}

fn not_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    alt((
        map(preceded(ws(keyword("not")), not_expr::<E>), |e| {
            Expr::Unary(UnaryOp::Not, Box::new(e))
        }),
        comparison,
    ))(input)
}

fn comparison_op<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, BinaryOp, E> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
    ))(input)
}

fn comparison<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, lhs) = arith(input)?;
    let (input, rhs) = opt(pair(ws(comparison_op), arith::<E>))(input)?;
    Ok((
        input,
        match rhs {
            Some((op, rhs)) => binary_node(op, lhs, rhs),
            None => lhs,
        },
    ))
}

fn arith<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = term(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::Add, char('+')),
                value(BinaryOp::Sub, char('-')),
            ))),
            term::<E>,
        ),
        move || first.clone(),
        |acc, (op, rhs)| binary_node(op, acc, rhs),
    )(input)
}

fn term<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = factor(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::FloorDiv, tag("//")),
                value(BinaryOp::Div, char('/')),
                value(BinaryOp::Mod, char('%')),
                value(BinaryOp::Mul, terminated(char('*'), not(char('*')))),
            ))),
            factor::<E>,
        ),
        move || first.clone(),
        |acc, (op, rhs)| binary_node(op, acc, rhs),
    )(input)
}

fn factor<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    ws(alt((
        map(preceded(char('-'), factor::<E>), |e| {
            Expr::Unary(UnaryOp::Neg, Box::new(e))
        }),
        map(preceded(char('+'), factor::<E>), |e| {
            Expr::Unary(UnaryOp::Pos, Box::new(e))
        }),
        power,
    )))(input)
}

// `**` binds tighter than a unary minus on its left, looser on its right
fn power<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, base) = atom(input)?;
    let (input, exponent) = opt(preceded(ws(tag("**")), factor::<E>))(input)?;
    Ok((
        input,
        match exponent {
            Some(exp) => binary_node(BinaryOp::Pow, base, exp),
            None => base,
        },
    ))
}

fn atom<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    ws(alt((
        number,
        call_or_name,
        delimited(char('('), or_expr::<E>, cut(char(')'))),
    )))(input)
}

fn number<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (rest, text) = recognize(tuple((
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let parsed = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(Expr::Float)
    } else {
        text.parse::<i64>()
            .ok()
            .map(Expr::Int)
            .or_else(|| text.parse::<f64>().ok().map(Expr::Float))
    };

    match parsed {
        Some(expr) => Ok((rest, expr)),
        None => Err(nom::Err::Error(E::from_error_kind(input, ErrorKind::Float))),
    }
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn call_or_name<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), or_expr::<E>),
        cut(char(')')),
    ))(input)?;

    let expr = match (name, args) {
        (_, Some(args)) => Expr::Call(name.to_string(), args),
        ("True" | "true", None) => Expr::Bool(true),
        ("False" | "false", None) => Expr::Bool(false),
        (_, None) => Expr::Name(name.to_string()),
    };
    Ok((input, expr))
}

// ============================================================================
// Tests
// ============================================================================
