use super::SliceVisitor;
use crate::bytecode::{InstructionIndex, MethodId};
use crate::dependence::Variable;
use crate::error::Result;
use crate::trace::InstructionInstance;
use std::collections::{BTreeMap, BTreeSet};

/// Collects the instances on the slice with their minimal distance to a
/// criterion instance
#[derive(Debug, Default, Clone)]
pub struct SliceInstructionsCollector {
    instances: BTreeMap<u64, (InstructionInstance, u32)>,
}

impl SliceInstructionsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, instance: &InstructionInstance, distance: u32) {
        self.instances
            .entry(instance.instance_nr)
            .and_modify(|(_, known)| *known = (*known).min(distance))
            .or_insert_with(|| (instance.clone(), distance));
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Collected instances in walk order, with their distance
    pub fn instances(&self) -> impl Iterator<Item = (&InstructionInstance, u32)> {
        self.instances
            .values()
            .map(|(instance, distance)| (instance, *distance))
    }

    /// Static instructions of the slice
    pub fn instructions(&self) -> BTreeSet<(MethodId, InstructionIndex)> {
        self.instances
            .values()
            .map(|(instance, _)| (instance.method, instance.index))
            .collect()
    }
}

impl SliceVisitor for SliceInstructionsCollector {
    fn visit_matched_instance(&mut self, instance: &InstructionInstance) -> Result<()> {
        self.record(instance, 0);
        Ok(())
    }

    fn visit_slice_dependence(
        &mut self,
        _from: &InstructionInstance,
        to: &InstructionInstance,
        _variable: Option<Variable>,
        distance: u32,
    ) -> Result<()> {
        self.record(to, distance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::InstanceInfo;

    fn instance(nr: u64, index: usize) -> InstructionInstance {
        InstructionInstance {
            method: MethodId::new(0),
            index: InstructionIndex::new(index),
            stack_depth: 1,
            instance_nr: nr,
            occurrence: 1,
            frame: 1,
            info: InstanceInfo::None,
        }
    }

    #[test]
    fn test_keeps_minimal_distance() {
        let mut collector = SliceInstructionsCollector::new();
        collector.visit_matched_instance(&instance(0, 5)).unwrap();
        collector
            .visit_slice_dependence(&instance(0, 5), &instance(3, 2), None, 4)
            .unwrap();
        collector
            .visit_slice_dependence(&instance(1, 4), &instance(3, 2), None, 2)
            .unwrap();
        collector
            .visit_slice_dependence(&instance(3, 2), &instance(7, 2), None, 3)
            .unwrap();

        let distances: Vec<_> = collector
            .instances()
            .map(|(instance, distance)| (instance.instance_nr, distance))
            .collect();
        assert_eq!(distances, vec![(0, 0), (3, 2), (7, 3)]);
        assert_eq!(collector.instructions().len(), 2);
    }
}
