//! Bookkeeping of measurements shared between pairs of entities.
//!
//! For every entity `e0` the registry keeps an ordered map `e1 -> {measurement ids}`
//! of the measurements that constrain both entities. Each distinct `(e0, e1)` key
//! becomes one off-diagonal block of the block-sparse Hessian, so
//! [`JointMeasurements::num_blocks`] is what a model uses to pre-size it.
//!
//! Registration is one-directional: `add_measurement_for_entity(e0, e1, m)` only
//! touches `e0`'s map. Models in this crate register each pair once, under the
//! smaller entity index, which yields the upper-triangular half of the Hessian;
//! callers that want lookups from both sides register both orderings.

use crate::error::{SolverError, SolverResult};
use std::collections::{BTreeMap, BTreeSet};

/// Measurement ids jointly constraining one pair of entities.
pub type MeasurementSet = BTreeSet<usize>;

#[derive(Debug, Clone, Default)]
pub struct JointMeasurements {
    entities: Vec<BTreeMap<usize, MeasurementSet>>,
    num_blocks: usize,
}

impl JointMeasurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(num_entities: usize) -> Self {
        let mut joint = Self::new();
        joint.resize(num_entities);
        joint
    }

    /// Set the entity count and forget every registered pair.
    pub fn resize(&mut self, num_entities: usize) {
        self.entities.clear();
        self.entities.resize_with(num_entities, BTreeMap::new);
        self.num_blocks = 0;
    }

    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    /// Number of distinct `(e0, e1)` pairs registered since the last resize.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn check_entity(&self, entity: usize) -> SolverResult<()> {
        if entity < self.entities.len() {
            Ok(())
        } else {
            Err(SolverError::Configuration(format!(
                "entity {entity} is out of range for {} entities",
                self.entities.len()
            )))
        }
    }

    /// Register measurement `measurement` under `e0`'s entry for `e1`.
    pub fn add_measurement_for_entity(
        &mut self,
        e0: usize,
        e1: usize,
        measurement: usize,
    ) -> SolverResult<()> {
        self.check_entity(e0)?;
        self.check_entity(e1)?;

        let partners = &mut self.entities[e0];
        match partners.get_mut(&e1) {
            Some(set) => {
                set.insert(measurement);
            }
            None => {
                partners.insert(e1, MeasurementSet::from([measurement]));
                self.num_blocks += 1;
            }
        }
        Ok(())
    }

    /// Measurements registered under `e0` for partner `e1`.
    pub fn measurements(&self, e0: usize, e1: usize) -> Option<&MeasurementSet> {
        self.entities.get(e0)?.get(&e1)
    }

    /// Partners of `entity` in ascending order, with their measurement sets.
    pub fn partners(
        &self,
        entity: usize,
    ) -> SolverResult<impl Iterator<Item = (usize, &MeasurementSet)>> {
        self.check_entity(entity)?;
        Ok(self.entities[entity]
            .iter()
            .map(|(&other, set)| (other, set)))
    }

    /// Every registered pair as `(e0, e1, measurements)`, ordered by `e0` then `e1`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, &MeasurementSet)> {
        self.entities.iter().enumerate().flat_map(|(e0, partners)| {
            partners.iter().map(move |(&e1, set)| (e0, e1, set))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_resets_everything() {
        let mut joint = JointMeasurements::with_entities(3);
        joint.add_measurement_for_entity(0, 1, 7).unwrap();
        joint.resize(5);

        assert_eq!(joint.num_entities(), 5);
        assert_eq!(joint.num_blocks(), 0);
        assert!(joint.measurements(0, 1).is_none());
    }

    #[test]
    fn test_same_pair_counts_once() {
        let mut joint = JointMeasurements::with_entities(4);
        for m in 0..10 {
            joint.add_measurement_for_entity(1, 3, m).unwrap();
        }
        assert_eq!(joint.num_blocks(), 1);
        assert_eq!(joint.measurements(1, 3).map(|s| s.len()), Some(10));
    }

    #[test]
    fn test_new_pair_increments_by_one() {
        let mut joint = JointMeasurements::with_entities(4);
        joint.add_measurement_for_entity(0, 1, 0).unwrap();
        assert_eq!(joint.num_blocks(), 1);
        joint.add_measurement_for_entity(0, 2, 1).unwrap();
        assert_eq!(joint.num_blocks(), 2);
        joint.add_measurement_for_entity(0, 1, 2).unwrap();
        assert_eq!(joint.num_blocks(), 2);
    }

    #[test]
    fn test_registration_is_one_directional() {
        let mut joint = JointMeasurements::with_entities(3);
        joint.add_measurement_for_entity(0, 2, 5).unwrap();
        assert!(joint.measurements(0, 2).is_some());
        assert!(joint.measurements(2, 0).is_none());

        // The reverse ordering is a distinct pair
        joint.add_measurement_for_entity(2, 0, 5).unwrap();
        assert_eq!(joint.num_blocks(), 2);
    }

    #[test]
    fn test_duplicate_measurement_ids_collapse() {
        let mut joint = JointMeasurements::with_entities(2);
        joint.add_measurement_for_entity(0, 1, 4).unwrap();
        joint.add_measurement_for_entity(0, 1, 4).unwrap();
        assert_eq!(joint.measurements(0, 1).map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_partners_are_ordered() {
        let mut joint = JointMeasurements::with_entities(6);
        joint.add_measurement_for_entity(2, 5, 0).unwrap();
        joint.add_measurement_for_entity(2, 3, 1).unwrap();
        joint.add_measurement_for_entity(2, 4, 2).unwrap();
        joint.add_measurement_for_entity(2, 3, 3).unwrap();

        let partners: Vec<(usize, Vec<usize>)> = joint
            .partners(2)
            .unwrap()
            .map(|(other, set)| (other, set.iter().copied().collect()))
            .collect();
        assert_eq!(
            partners,
            vec![(3, vec![1, 3]), (4, vec![2]), (5, vec![0])]
        );
        assert_eq!(joint.partners(0).unwrap().count(), 0);
    }

    #[test]
    fn test_pairs_enumerates_all_blocks() {
        let mut joint = JointMeasurements::with_entities(3);
        joint.add_measurement_for_entity(1, 2, 0).unwrap();
        joint.add_measurement_for_entity(0, 1, 1).unwrap();
        joint.add_measurement_for_entity(0, 2, 2).unwrap();

        let pairs: Vec<(usize, usize)> = joint.pairs().map(|(a, b, _)| (a, b)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
        assert_eq!(pairs.len(), joint.num_blocks());
    }

    #[test]
    fn test_out_of_range_entity() {
        let mut joint = JointMeasurements::with_entities(2);
        assert!(matches!(
            joint.add_measurement_for_entity(0, 2, 0),
            Err(SolverError::Configuration(_))
        ));
        assert!(joint.add_measurement_for_entity(9, 0, 0).is_err());
        assert!(joint.partners(2).is_err());
        assert_eq!(joint.num_blocks(), 0);
    }
}
