//! Keyed Children Diff
//!
//! Plans how to turn one keyed sibling sequence into another with the fewest
//! document operations.
//!
//! # Algorithm
//!
//! 1. Trim the common prefix and suffix (compared by key). Those nodes are
//!    patched in place and never move.
//! 2. Map the keys of the old middle to their old positions.
//! 3. For every key of the new middle, look up its old position (`None` means
//!    the node has to be created).
//! 4. The longest increasing subsequence of those old positions is the
//!    largest set of reused nodes already in the right relative order. They
//!    stay put; every other reused node costs exactly one move.
//! 5. Old middle nodes nobody claimed are removed.

use std::collections::HashMap;
use std::hash::Hash;

/// Result of [`plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyedPlan {
    /// Length of the common prefix.
    pub prefix: usize,
    /// Length of the common suffix.
    pub suffix: usize,
    /// For every node of the new middle, the old index it reuses.
    pub sources: Vec<Option<usize>>,
    /// For every node of the new middle, whether it keeps its place.
    pub stable: Vec<bool>,
    /// Old indices that are not reused, ascending.
    pub removed: Vec<usize>,
}

impl KeyedPlan {
    /// Number of reused nodes that have to move.
    pub fn moves(&self) -> usize {
        self.sources
            .iter()
            .zip(&self.stable)
            .filter(|(source, stable)| source.is_some() && !**stable)
            .count()
    }

    pub fn insertions(&self) -> usize {
        self.sources.iter().filter(|source| source.is_none()).count()
    }
}

pub(crate) fn plan<K: Eq + Hash>(old: &[K], new: &[K]) -> KeyedPlan {
    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let old_middle = prefix..old.len() - suffix;
    let new_middle = &new[prefix..new.len() - suffix];

    let positions: HashMap<&K, usize> = old_middle.clone().map(|index| (&old[index], index)).collect();
    let mut claimed = vec![false; old.len()];
    let sources: Vec<Option<usize>> = new_middle
        .iter()
        .map(|key| {
            let index = positions.get(key).copied()?;
            // Duplicate keys are a caller error; reuse each old node once.
            if claimed[index] {
                return None;
            }
            claimed[index] = true;
            Some(index)
        })
        .collect();

    let mut stable = vec![false; sources.len()];
    for position in longest_increasing(&sources) {
        stable[position] = true;
    }

    let removed = old_middle.filter(|index| !claimed[*index]).collect();

    KeyedPlan {
        prefix,
        suffix,
        sources,
        stable,
        removed,
    }
}

/// Positions (into `sequence`) of one longest strictly increasing
/// subsequence of the present values.
fn longest_increasing(sequence: &[Option<usize>]) -> Vec<usize> {
    // tails[k]: position of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];

    for (position, value) in sequence.iter().enumerate() {
        let Some(value) = *value else {
            continue;
        };
        let length = tails.partition_point(|&tail| sequence[tail].is_some_and(|t| t < value));
        if length > 0 {
            previous[position] = Some(tails[length - 1]);
        }
        if length == tails.len() {
            tails.push(position);
        } else {
            tails[length] = position;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        result.push(position);
        cursor = previous[position];
    }
    result.reverse();
    result
}
