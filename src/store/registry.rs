use super::types::*;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::ProcessObject;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use smallvec::{smallvec, SmallVec};
use std::collections::HashSet;

/// Per-node input slots. Most filters have one or two inputs.
pub type InputSlots = SmallVec<[Option<NodeId>; 2]>;

/// Owns every node of a pipeline. Edges are plain `NodeId`s; a node never owns
/// its inputs.
#[derive(Default)]
pub struct NodeRegistry {
    // Columnar Arrays
    objects: Vec<Box<dyn ProcessObject>>,
    meta: Vec<NodeMetadata>,
    inputs: Vec<InputSlots>,

    // Producer -> consumer edges weighted by input slot, for cycle checks and
    // downstream lookups. Node indices mirror `NodeId`s; nodes are never removed.
    topology: StableDiGraph<(), usize>,

    used_names: HashSet<String>,
}

impl NodeRegistry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.objects.len() }

    pub fn contains(&self, id: NodeId) -> bool { id.index() < self.objects.len() }

    pub fn add_node(&mut self, object: Box<dyn ProcessObject>, mut meta: NodeMetadata) -> NodeId {
        let id = NodeId::new(self.objects.len());

        // --- Unique Name Enforcement ---
        let original_name = if meta.name.is_empty() { object.type_name().to_string() } else { meta.name.clone() };
        let mut candidate_name = original_name.clone();
        let mut counter = 1;

        while self.used_names.contains(&candidate_name) {
            candidate_name = format!("{}_{}", original_name, counter);
            counter += 1;
        }
        self.used_names.insert(candidate_name.clone());
        meta.name = candidate_name;
        // -------------------------------

        let slots: InputSlots = smallvec![None; object.number_of_inputs()];
        self.inputs.push(slots);
        self.objects.push(object);
        self.meta.push(meta);
        self.topology.add_node(());

        id
    }

    /// Wires `producer` into input `slot` of `consumer`, replacing any previous
    /// producer on that slot. Rejects edges that would close a cycle.
    pub fn set_input(&mut self, consumer: NodeId, slot: usize, producer: NodeId) -> PipelineResult<()> {
        self.check(consumer)?;
        self.check(producer)?;
        let count = self.inputs[consumer.index()].len();
        if slot >= count {
            return Err(PipelineError::InputSlotOutOfRange { node_name: self.name(consumer).to_string(), slot, count });
        }
        if consumer == producer
            || petgraph::algo::has_path_connecting(&self.topology, Self::ix(consumer), Self::ix(producer), None)
        {
            return Err(PipelineError::CycleDetected {
                producer: self.name(producer).to_string(),
                consumer: self.name(consumer).to_string(),
            });
        }

        self.remove_edge(consumer, slot);
        self.topology.add_edge(Self::ix(producer), Self::ix(consumer), slot);
        self.inputs[consumer.index()][slot] = Some(producer);
        Ok(())
    }

    /// Leaves input `slot` of `consumer` unset. Returns the producer that was there.
    pub fn clear_input(&mut self, consumer: NodeId, slot: usize) -> PipelineResult<Option<NodeId>> {
        self.check(consumer)?;
        let count = self.inputs[consumer.index()].len();
        if slot >= count {
            return Err(PipelineError::InputSlotOutOfRange { node_name: self.name(consumer).to_string(), slot, count });
        }
        self.remove_edge(consumer, slot);
        Ok(self.inputs[consumer.index()][slot].take())
    }

    fn remove_edge(&mut self, consumer: NodeId, slot: usize) {
        let stale = self
            .topology
            .edges_directed(Self::ix(consumer), Direction::Incoming)
            .find(|e| *e.weight() == slot)
            .map(|e| e.id());
        if let Some(edge) = stale {
            self.topology.remove_edge(edge);
        }
    }

    #[inline(always)]
    pub fn get_inputs(&self, id: NodeId) -> &[Option<NodeId>] {
        &self.inputs[id.index()]
    }

    /// Nodes that read `id`'s output (each listed once per connected slot).
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.topology
            .neighbors_directed(Self::ix(id), Direction::Outgoing)
            .map(|ix| NodeId::new(ix.index()))
            .collect()
    }

    pub fn name(&self, id: NodeId) -> &str { &self.meta[id.index()].name }
    pub fn meta(&self, id: NodeId) -> &NodeMetadata { &self.meta[id.index()] }

    pub fn object(&self, id: NodeId) -> &dyn ProcessObject { self.objects[id.index()].as_ref() }
    pub fn object_mut(&mut self, id: NodeId) -> &mut dyn ProcessObject { self.objects[id.index()].as_mut() }

    /// Name and object together, for callers that need both while mutating the object.
    pub fn entry_mut(&mut self, id: NodeId) -> (&str, &mut dyn ProcessObject) {
        (&self.meta[id.index()].name, self.objects[id.index()].as_mut())
    }

    /// Typed access to a node's parameters.
    pub fn downcast_ref<T: ProcessObject + 'static>(&self, id: NodeId) -> Option<&T> {
        self.objects.get(id.index())?.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ProcessObject + 'static>(&mut self, id: NodeId) -> Option<&mut T> {
        self.objects.get_mut(id.index())?.as_any_mut().downcast_mut::<T>()
    }

    pub fn check(&self, id: NodeId) -> PipelineResult<()> {
        if self.contains(id) { Ok(()) } else { Err(PipelineError::UnknownNode(id)) }
    }

    #[inline(always)]
    fn ix(id: NodeId) -> NodeIndex { NodeIndex::new(id.index()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingSource;

    fn make_meta(name: &str) -> NodeMetadata {
        NodeMetadata { name: name.into() }
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let mut reg = NodeRegistry::new();
        let a = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta("src"));
        let b = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta("src"));
        let c = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta(""));
        assert_eq!(reg.name(a), "src");
        assert_eq!(reg.name(b), "src_1");
        assert_eq!(reg.name(c), "CountingSource");
    }

    #[test]
    fn test_set_input_rejects_cycles() {
        let mut reg = NodeRegistry::new();
        let a = reg.add_node(Box::new(CountingSource::with_inputs(&[2], 1)), make_meta("A"));
        let b = reg.add_node(Box::new(CountingSource::with_inputs(&[2], 1)), make_meta("B"));
        reg.set_input(b, 0, a).unwrap();
        let err = reg.set_input(a, 0, b).unwrap_err();
        assert!(matches!(err, PipelineError::CycleDetected { .. }), "got {:?}", err);
        assert!(matches!(reg.set_input(a, 0, a), Err(PipelineError::CycleDetected { .. })));
    }

    #[test]
    fn test_rewiring_replaces_the_slot_edge() {
        let mut reg = NodeRegistry::new();
        let a = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta("A"));
        let b = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta("B"));
        let c = reg.add_node(Box::new(CountingSource::with_inputs(&[2], 1)), make_meta("C"));
        reg.set_input(c, 0, a).unwrap();
        reg.set_input(c, 0, b).unwrap();
        assert_eq!(reg.get_inputs(c), &[Some(b)]);
        assert!(reg.consumers(a).is_empty());
        assert_eq!(reg.consumers(b), vec![c]);
        assert_eq!(reg.clear_input(c, 0).unwrap(), Some(b));
        assert!(reg.consumers(b).is_empty());
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut reg = NodeRegistry::new();
        let a = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta("A"));
        let b = reg.add_node(Box::new(CountingSource::new(&[2])), make_meta("B"));
        assert!(matches!(reg.set_input(b, 0, a), Err(PipelineError::InputSlotOutOfRange { .. })));
        assert!(matches!(reg.set_input(NodeId(9), 0, a), Err(PipelineError::UnknownNode(_))));
    }

    #[test]
    fn test_downcast_to_concrete_node() {
        let mut reg = NodeRegistry::new();
        let a = reg.add_node(Box::new(CountingSource::new(&[3])), make_meta("A"));
        assert!(reg.downcast_ref::<CountingSource>(a).is_some());
        reg.downcast_mut::<CountingSource>(a).unwrap().set_value(4.0);
        assert_eq!(reg.downcast_ref::<CountingSource>(a).unwrap().value(), 4.0);
    }
}
