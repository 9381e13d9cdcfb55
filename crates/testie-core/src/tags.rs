//! Tag expressions
//!
//! Headers and assignments may be prefixed with `expr:` so they only apply
//! when the run's tags satisfy `expr`. `|` separates alternatives, `,` joins
//! terms that must all hold, and `-tag` requires `tag` to be absent.

use std::collections::BTreeSet;

pub type Tags = BTreeSet<String>;

/// Evaluate a tag expression against the active tags.
///
/// An empty expression or a lone `:` always matches.
pub fn matches(expression: &str, tags: &Tags) -> bool {
    let expression = expression.strip_suffix(':').unwrap_or(expression);
    if expression.is_empty() {
        return true;
    }
    expression.split('|').any(|group| {
        group
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .all(|term| term_holds(term, tags))
    })
}

fn term_holds(term: &str, tags: &Tags) -> bool {
    if tags.contains(term) {
        return true;
    }
    match term.strip_prefix('-') {
        Some(negated) => !tags.contains(negated),
        None => false,
    }
}

/// Split a comma separated tag list, ignoring blanks
pub fn parse_tags(list: &str) -> Tags {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
