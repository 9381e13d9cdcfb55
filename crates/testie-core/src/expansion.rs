//! Matrix expansion
//!
//! Turns a variable container into concrete rows, one value per variable.
//! Brute mode builds the cross product in a stable order; shuffle mode builds
//! the same rows and permutes them.

use rand::seq::SliceRandom;
use rand::Rng;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use testie_types::Row;
use tracing::debug;

use crate::variable::VariableContainer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpandMode {
    #[default]
    Brute,
    Shuffle,
}

impl FromStr for ExpandMode {
    type Err = Infallible;

    /// `shuffle`, `rand` and `random` shuffle; any other name is brute
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "shuffle" | "rand" | "random" => ExpandMode::Shuffle,
            _ => ExpandMode::Brute,
        })
    }
}

impl fmt::Display for ExpandMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpandMode::Brute => f.write_str("brute"),
            ExpandMode::Shuffle => f.write_str("shuffle"),
        }
    }
}

/// Expand with the thread-local RNG
pub fn expand(container: &VariableContainer, mode: ExpandMode) -> Vec<Row> {
    expand_with_rng(container, mode, &mut rand::thread_rng())
}

/// Expand with a caller-supplied RNG so shuffled order can be reproduced
pub fn expand_with_rng<R: Rng + ?Sized>(
    container: &VariableContainer,
    mode: ExpandMode,
    rng: &mut R,
) -> Vec<Row> {
    let mut rows = brute(container);
    if mode == ExpandMode::Shuffle {
        rows.shuffle(rng);
    }
    debug!(rows = rows.len(), %mode, "expanded matrix");
    rows
}

// Each variable multiplies the partial rows built so far. An empty container
// yields a single empty row.
fn brute(container: &VariableContainer) -> Vec<Row> {
    let mut rows = vec![Row::new()];
    for (name, domain) in container.iter() {
        let values = domain.values();
        let mut next = Vec::with_capacity(rows.len() * values.len());
        for value in &values {
            for row in &rows {
                let mut extended = row.clone();
                extended.insert(name.to_string(), value.clone());
                next.push(extended);
            }
        }
        rows = next;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableDomain;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use testie_types::Value;

    fn sample() -> VariableContainer {
        let mut c = VariableContainer::new();
        c.insert(
            "A",
            VariableDomain::List(vec![Value::text("1"), Value::text("2")]),
        );
        c.insert(
            "B",
            VariableDomain::List(vec![Value::text("x"), Value::text("y"), Value::text("z")]),
        );
        c
    }

    fn keys(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.values().map(|v| v.to_string()).collect::<Vec<_>>().join(""))
            .collect()
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("rand".parse::<ExpandMode>(), Ok(ExpandMode::Shuffle));
        assert_eq!("Random".parse::<ExpandMode>(), Ok(ExpandMode::Shuffle));
        assert_eq!("full".parse::<ExpandMode>(), Ok(ExpandMode::Brute));
    }

    #[test]
    fn test_brute_cross_product() {
        let rows = expand(&sample(), ExpandMode::Brute);
        assert_eq!(keys(&rows), vec!["1x", "2x", "1y", "2y", "1z", "2z"]);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut shuffled = keys(&expand_with_rng(&sample(), ExpandMode::Shuffle, &mut rng));
        let mut brute = keys(&expand(&sample(), ExpandMode::Brute));
        shuffled.sort();
        brute.sort();
        assert_eq!(shuffled, brute);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let a = expand_with_rng(&sample(), ExpandMode::Shuffle, &mut SmallRng::seed_from_u64(1));
        let b = expand_with_rng(&sample(), ExpandMode::Shuffle, &mut SmallRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_container_runs_once() {
        let c = VariableContainer::new();
        assert_eq!(expand(&c, ExpandMode::Brute), vec![Row::new()]);
        assert_eq!(c.matrix_size(), 0);
    }

    proptest! {
        #[test]
        fn prop_rows_are_distinct_and_complete(
            counts in prop::collection::vec(1usize..4, 1..5),
            seed in any::<u64>(),
        ) {
            let mut c = VariableContainer::new();
            for (i, n) in counts.iter().enumerate() {
                let values = (0..*n).map(|v| Value::Int(v as i64)).collect();
                c.insert(format!("V{}", i), VariableDomain::List(values));
            }

            let brute = expand(&c, ExpandMode::Brute);
            prop_assert_eq!(brute.len(), c.matrix_size());
            let mut distinct = brute.clone();
            distinct.sort_by_key(|r| format!("{:?}", r));
            distinct.dedup();
            prop_assert_eq!(distinct.len(), brute.len());

            let mut shuffled = expand_with_rng(&c, ExpandMode::Shuffle, &mut SmallRng::seed_from_u64(seed));
            shuffled.sort_by_key(|r| format!("{:?}", r));
            prop_assert_eq!(shuffled, distinct);
        }
    }
}
