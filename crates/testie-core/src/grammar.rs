//! Header grammar
//!
//! One header line (the text after `%`) becomes a [`Header`]: an optional tag
//! expression and a [`HeaderKind`]. The leading keyword selects a per-kind
//! `nom` matcher for the rest of the line.
//!
//! ```text
//! [tags:]info | config | variables | pyexit | late_variables | require
//! [tags:]include <path>
//! [tags:]file[@role] <name> [noparse]
//! [tags:]init-file[@role] <name> [noparse]
//! [tags:]import[@role] [<module>] [key=value]*
//! [tags:]script[@role] [key=value]*
//! [tags:]init[@role] [key=value]*
//! ```

use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{alphanumeric1, char, space0, space1},
    combinator::{all_consuming, map, opt, recognize, verify},
    error::{ContextError, ParseError as NomParseError, VerboseError},
    multi::many0,
    sequence::{pair, preceded, separated_pair, terminated},
    IResult,
};
use std::collections::BTreeMap;

use crate::error::GrammarError;

/// `key=value` arguments of script and import headers
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Tag expression guarding the section, without the trailing `:`
    pub tags: Option<String>,
    pub kind: HeaderKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderKind {
    Info,
    Config,
    Variables,
    Pyexit,
    LateVariables,
    Require,
    Include {
        path: String,
    },
    File {
        role: Option<String>,
        name: String,
        noparse: bool,
        init: bool,
    },
    Import {
        role: Option<String>,
        module: Option<String>,
        params: Params,
    },
    Script {
        role: Option<String>,
        params: Params,
        init: bool,
    },
}

impl HeaderKind {
    /// Section name as written in the header
    pub fn name(&self) -> &'static str {
        match self {
            HeaderKind::Info => "info",
            HeaderKind::Config => "config",
            HeaderKind::Variables => "variables",
            HeaderKind::Pyexit => "pyexit",
            HeaderKind::LateVariables => "late_variables",
            HeaderKind::Require => "require",
            HeaderKind::Include { .. } => "include",
            HeaderKind::File { init: false, .. } => "file",
            HeaderKind::File { init: true, .. } => "init-file",
            HeaderKind::Import { .. } => "import",
            HeaderKind::Script { init: false, .. } => "script",
            HeaderKind::Script { init: true, .. } => "init",
        }
    }

    /// Kinds a testie may hold at most once
    pub fn is_singleton(&self) -> bool {
        matches!(
            self,
            HeaderKind::Info
                | HeaderKind::Config
                | HeaderKind::Variables
                | HeaderKind::Pyexit
        )
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Parse one header line (without its leading `%`)
pub fn parse_header(line: &str) -> Result<Header, GrammarError> {
    let line = line.trim();
    let unknown = || GrammarError::UnknownSection(line.to_string());

    let (rest, tags) = tag_prefix::<VerboseError<&str>>(line).map_err(|_| unknown())?;
    let (rest, keyword) = keyword::<VerboseError<&str>>(rest).map_err(|_| unknown())?;

    let kind = match keyword {
        "info" => bare(line, keyword, rest, HeaderKind::Info)?,
        "config" => bare(line, keyword, rest, HeaderKind::Config)?,
        "variables" => bare(line, keyword, rest, HeaderKind::Variables)?,
        "pyexit" => bare(line, keyword, rest, HeaderKind::Pyexit)?,
        "late_variables" => bare(line, keyword, rest, HeaderKind::LateVariables)?,
        "require" => bare(line, keyword, rest, HeaderKind::Require)?,
        "include" => {
            let path = leading(line, keyword, include_body, rest)?;
            HeaderKind::Include {
                path: path.to_string(),
            }
        }
        "file" | "init-file" => {
            let (role, name, noparse) = leading(line, keyword, file_body, rest)?;
            HeaderKind::File {
                role,
                name: name.to_string(),
                noparse,
                init: keyword == "init-file",
            }
        }
        "import" => {
            let (_, (role, module, params)) = run(import_body, rest).ok_or_else(unknown)?;
            HeaderKind::Import {
                role,
                module,
                params,
            }
        }
        "script" | "init" => {
            let (_, (role, params)) = run(script_body, rest).ok_or_else(unknown)?;
            HeaderKind::Script {
                role,
                params,
                init: keyword == "init",
            }
        }
        _ => return Err(unknown()),
    };

    Ok(Header {
        tags: tags.map(str::to_string),
        kind,
    })
}

fn bare(
    line: &str,
    keyword: &str,
    rest: &str,
    kind: HeaderKind,
) -> Result<HeaderKind, GrammarError> {
    trailing(line, keyword, rest)?;
    Ok(kind)
}

// Kinds with fixed operands: parse them, then reject whatever follows
fn leading<'a, O>(
    line: &str,
    keyword: &str,
    parser: fn(&'a str) -> IResult<&'a str, O, VerboseError<&'a str>>,
    input: &'a str,
) -> Result<O, GrammarError> {
    let (rest, out) =
        parser(input).map_err(|_| GrammarError::UnknownSection(line.to_string()))?;
    trailing(line, keyword, rest)?;
    Ok(out)
}

// Only script and import take key=value pairs. Trailing pairs elsewhere get a
// dedicated error, anything else is an unknown line.
fn trailing(line: &str, keyword: &str, rest: &str) -> Result<(), GrammarError> {
    if rest.trim().is_empty() {
        return Ok(());
    }
    if run(params_only, rest).is_some() {
        return Err(GrammarError::UnexpectedArguments {
            section: keyword.to_string(),
            arguments: rest.trim().to_string(),
        });
    }
    Err(GrammarError::UnknownSection(line.to_string()))
}

fn run<'a, O>(
    parser: fn(&'a str) -> IResult<&'a str, O, VerboseError<&'a str>>,
    input: &'a str,
) -> Option<(&'a str, O)> {
    all_consuming(terminated(parser, space0))(input).ok()
}

// ============================================================================
// Internal Parsers
// ============================================================================

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ',' | '|' | '-')
}

fn is_value_char(c: char) -> bool {
    !c.is_whitespace()
}

fn tag_prefix<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Option<&'a str>, E> {
    opt(terminated(take_while(is_tag_char), char(':')))(input)
}

fn keyword<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    take_while1(|c: char| c.is_ascii_lowercase() || c == '_' || c == '-')(input)
}

fn role<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Option<String>, E> {
    opt(map(preceded(char('@'), alphanumeric1), str::to_string))(input)
}

fn param<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, (String, String), E> {
    map(
        separated_pair(
            take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-')),
            char('='),
            take_while(is_value_char),
        ),
        |(k, v): (&str, &str)| (k.to_string(), v.to_string()),
    )(input)
}

fn params<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Params, E> {
    map(many0(preceded(space1, param)), |pairs| {
        pairs.into_iter().collect()
    })(input)
}

fn params_only<'a>(input: &'a str) -> IResult<&'a str, Params, VerboseError<&'a str>> {
    verify(params, |p: &Params| !p.is_empty())(input)
}

fn include_body<'a>(input: &'a str) -> IResult<&'a str, &'a str, VerboseError<&'a str>> {
    preceded(
        space1,
        take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')),
    )(input)
}

fn file_body<'a>(
    input: &'a str,
) -> IResult<&'a str, (Option<String>, &'a str, bool), VerboseError<&'a str>> {
    let (input, role) = role(input)?;
    let (input, name) = preceded(
        space1,
        take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')),
    )(input)?;
    let (input, noparse) = opt(preceded(space1, tag("noparse")))(input)?;
    Ok((input, (role, name, noparse.is_some())))
}

fn import_body<'a>(
    input: &'a str,
) -> IResult<&'a str, (Option<String>, Option<String>, Params), VerboseError<&'a str>> {
    let (input, role) = role(input)?;
    let (input, module) = opt(preceded(
        space1,
        recognize(pair(
            take_while1(|c: char| is_value_char(c) && c != '='),
            // a bare word followed by '=' is the first parameter, not a module
            verify(take_while(|c: char| is_value_char(c)), |s: &str| {
                !s.starts_with('=')
            }),
        )),
    ))(input)?;
    let (input, params) = params(input)?;
    Ok((input, (role, module.map(str::to_string), params)))
}

fn script_body<'a>(
    input: &'a str,
) -> IResult<&'a str, (Option<String>, Params), VerboseError<&'a str>> {
    pair(role, params)(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kind(line: &str) -> HeaderKind {
        parse_header(line).unwrap().kind
    }

    #[test]
    fn test_bare_sections() {
        assert_eq!(kind("info"), HeaderKind::Info);
        assert_eq!(kind("late_variables"), HeaderKind::LateVariables);
        assert_eq!(kind("require"), HeaderKind::Require);
        assert_eq!(kind("config  "), HeaderKind::Config);
    }

    #[test]
    fn test_tag_prefix() {
        let header = parse_header("dpdk,-fast|netmap:variables").unwrap();
        assert_eq!(header.tags.as_deref(), Some("dpdk,-fast|netmap"));
        assert_eq!(header.kind, HeaderKind::Variables);

        let header = parse_header(":script").unwrap();
        assert_eq!(header.tags.as_deref(), Some(""));
    }

    #[test]
    fn test_script_and_init() {
        let header = parse_header("script@client delay=2 name=gen").unwrap();
        let mut params = Params::new();
        params.insert("delay".into(), "2".into());
        params.insert("name".into(), "gen".into());
        assert_eq!(
            header.kind,
            HeaderKind::Script {
                role: Some("client".into()),
                params,
                init: false
            }
        );

        assert_eq!(
            kind("init"),
            HeaderKind::Script {
                role: None,
                params: Params::new(),
                init: true
            }
        );
    }

    #[test]
    fn test_file_and_init_file() {
        assert_eq!(
            kind("file@server conf.click noparse"),
            HeaderKind::File {
                role: Some("server".into()),
                name: "conf.click".into(),
                noparse: true,
                init: false
            }
        );
        assert_eq!(
            kind("init-file setup.sh"),
            HeaderKind::File {
                role: None,
                name: "setup.sh".into(),
                noparse: false,
                init: true
            }
        );
    }

    #[test]
    fn test_import_forms() {
        assert_eq!(
            kind("import@client fastclick-play-single-mt trace=/tmp/x.pcap"),
            HeaderKind::Import {
                role: Some("client".into()),
                module: Some("fastclick-play-single-mt".into()),
                params: [("trace".to_string(), "/tmp/x.pcap".to_string())].into(),
            }
        );
        assert_eq!(
            kind("import testie=other.testie"),
            HeaderKind::Import {
                role: None,
                module: None,
                params: [("testie".to_string(), "other.testie".to_string())].into(),
            }
        );
    }

    #[test]
    fn test_include() {
        assert_eq!(
            kind("include common/base.testie"),
            HeaderKind::Include {
                path: "common/base.testie".into()
            }
        );
    }

    #[test]
    fn test_arguments_on_bare_section() {
        assert_eq!(
            parse_header("config n=3"),
            Err(GrammarError::UnexpectedArguments {
                section: "config".into(),
                arguments: "n=3".into()
            })
        );
    }

    #[test]
    fn test_arguments_on_file_and_include() {
        let unexpected = |section: &str, arguments: &str| GrammarError::UnexpectedArguments {
            section: section.into(),
            arguments: arguments.into(),
        };
        assert_eq!(parse_header("file a.txt k=v"), Err(unexpected("file", "k=v")));
        assert_eq!(
            parse_header("init-file@client a.txt noparse k=v"),
            Err(unexpected("init-file", "k=v"))
        );
        assert_eq!(parse_header("include p k=v"), Err(unexpected("include", "k=v")));
        assert!(matches!(
            parse_header("file a.txt bogus"),
            Err(GrammarError::UnknownSection(_))
        ));
    }

    #[test]
    fn test_unknown_sections() {
        assert!(matches!(
            parse_header("scripts"),
            Err(GrammarError::UnknownSection(_))
        ));
        assert!(matches!(
            parse_header("file"),
            Err(GrammarError::UnknownSection(_))
        ));
        assert!(matches!(
            parse_header("info extra"),
            Err(GrammarError::UnknownSection(_))
        ));
        assert!(matches!(
            parse_header("Config"),
            Err(GrammarError::UnknownSection(_))
        ));
    }
}
