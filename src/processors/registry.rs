//! Beam-tilt classes and their dense group numbering.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Errors raised when looking up a class that was never registered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("beam-tilt class '{0}' has no assigned group")]
    UnknownClass(String),
}

/// Token identifying the beam-tilt setting of one exposure.
///
/// Ordered by the literal token string, so `"1000000"` sorts before `"999999"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeamTiltClass(String);

impl BeamTiltClass {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BeamTiltClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bijection from the distinct classes of a run onto `1..=K`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupAssignment {
    groups: BTreeMap<BeamTiltClass, u32>,
}

impl GroupAssignment {
    /// Number the distinct classes 1..=K in ascending string order.
    ///
    /// Encounter order of `classes` has no influence on the result.
    pub fn build<'a, I>(classes: I) -> Self
    where
        I: IntoIterator<Item = &'a BeamTiltClass>,
    {
        let mut groups: BTreeMap<BeamTiltClass, u32> = BTreeMap::new();
        for class in classes {
            if !groups.contains_key(class) {
                groups.insert(class.clone(), 0);
            }
        }
        for (n, id) in groups.values_mut().enumerate() {
            *id = n as u32 + 1;
        }
        Self { groups }
    }

    /// Number of distinct classes (K).
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, class: &BeamTiltClass) -> Option<u32> {
        self.groups.get(class).copied()
    }

    /// Group id of `class`, failing if it was not part of the run.
    pub fn group_of(&self, class: &BeamTiltClass) -> Result<u32, RegistryError> {
        self.get(class)
            .ok_or_else(|| RegistryError::UnknownClass(class.to_string()))
    }

    /// `(class, group id)` pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&BeamTiltClass, u32)> {
        self.groups.iter().map(|(class, &id)| (class, id))
    }

    pub fn classes(&self) -> impl Iterator<Item = &BeamTiltClass> {
        self.groups.keys()
    }

    /// Map every class of `classes` to its group id.
    pub fn map_all(&self, classes: &[BeamTiltClass]) -> Result<Vec<u32>, RegistryError> {
        classes.iter().map(|class| self.group_of(class)).collect()
    }
}

/// Per-group record counts for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub class: BeamTiltClass,
    pub group_id: u32,
    pub records: usize,
}

/// Count how many records fell into each group, in id order.
pub fn summarize(assignment: &GroupAssignment, classes: &[BeamTiltClass]) -> Vec<GroupSummary> {
    let mut counts: BTreeMap<&BeamTiltClass, usize> = BTreeMap::new();
    for class in classes {
        *counts.entry(class).or_insert(0) += 1;
    }

    assignment
        .iter()
        .map(|(class, group_id)| GroupSummary {
            class: class.clone(),
            group_id,
            records: counts.get(class).copied().unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(tokens: &[&str]) -> Vec<BeamTiltClass> {
        tokens.iter().map(|t| BeamTiltClass::new(*t)).collect()
    }

    #[test]
    fn test_build_assigns_sorted_dense_ids() {
        let input = classes(&["30970980", "30970979", "30970980", "30970981"]);
        let assignment = GroupAssignment::build(&input);

        assert_eq!(assignment.len(), 3);
        assert_eq!(assignment.get(&BeamTiltClass::new("30970979")), Some(1));
        assert_eq!(assignment.get(&BeamTiltClass::new("30970980")), Some(2));
        assert_eq!(assignment.get(&BeamTiltClass::new("30970981")), Some(3));
    }

    #[test]
    fn test_build_is_order_independent() {
        let forward = classes(&["a", "30970980", "1", "30970979", "1"]);
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut rotated = forward.clone();
        rotated.rotate_left(2);

        let expected = GroupAssignment::build(&forward);
        assert_eq!(GroupAssignment::build(&reversed), expected);
        assert_eq!(GroupAssignment::build(&rotated), expected);
    }

    #[test]
    fn test_ids_are_contiguous() {
        let input = classes(&["5", "3", "9", "3", "5", "12"]);
        let assignment = GroupAssignment::build(&input);

        let ids: Vec<u32> = assignment.iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_string_order() {
        let input = classes(&["10", "1a", "9", "100", "009"]);
        let assignment = GroupAssignment::build(&input);

        let order: Vec<&str> = assignment.classes().map(|c| c.as_str()).collect();
        assert_eq!(order, vec!["009", "10", "100", "1a", "9"]);
    }

    #[test]
    fn test_mixed_width_tokens_sort_as_strings() {
        let input = classes(&["999999", "1000000", "30970980"]);
        let assignment = GroupAssignment::build(&input);

        assert_eq!(assignment.get(&BeamTiltClass::new("1000000")), Some(1));
        assert_eq!(assignment.get(&BeamTiltClass::new("30970980")), Some(2));
        assert_eq!(assignment.get(&BeamTiltClass::new("999999")), Some(3));
    }

    #[test]
    fn test_single_class() {
        let input = classes(&["1", "1", "1"]);
        let assignment = GroupAssignment::build(&input);

        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.group_of(&BeamTiltClass::new("1")), Ok(1));
    }

    #[test]
    fn test_unknown_class() {
        let assignment = GroupAssignment::build(&classes(&["1"]));
        assert_eq!(
            assignment.group_of(&BeamTiltClass::new("2")),
            Err(RegistryError::UnknownClass("2".to_string()))
        );
    }

    #[test]
    fn test_empty_input() {
        let assignment = GroupAssignment::build(&Vec::<BeamTiltClass>::new());
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_map_all_and_summary() {
        let input = classes(&["20", "10", "20", "20"]);
        let assignment = GroupAssignment::build(&input);

        assert_eq!(assignment.map_all(&input).unwrap(), vec![2, 1, 2, 2]);

        let summary = summarize(&assignment, &input);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].class.as_str(), "10");
        assert_eq!(summary[0].records, 1);
        assert_eq!(summary[1].group_id, 2);
        assert_eq!(summary[1].records, 3);
    }
}
