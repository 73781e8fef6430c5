use crate::error::{PipelineError, PipelineResult};
use crate::store::{NodeId, NodeRegistry};
use std::collections::{HashSet, VecDeque};

/// Orders the upstream closure of `targets` so every producer precedes its consumers.
///
/// Uses a DFS post-order over input edges. Each node appears once even when several
/// targets or consumers share it. Fails on the first unset input slot met on the way.
pub fn upstream_order(registry: &NodeRegistry, targets: &[NodeId]) -> PipelineResult<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut state = vec![VisitState::None; registry.count()];

    for &target in targets {
        registry.check(target)?;
        visit(target, registry, &mut state, &mut order)?;
    }

    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // Used for cycle detection
    Visited,
}

fn visit(
    node: NodeId,
    registry: &NodeRegistry,
    state: &mut Vec<VisitState>,
    order: &mut Vec<NodeId>,
) -> PipelineResult<()> {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return Ok(()),
        VisitState::Visiting => {
            let name = registry.name(node).to_string();
            return Err(PipelineError::CycleDetected { producer: name.clone(), consumer: name });
        }
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    for (slot, input) in registry.get_inputs(node).iter().enumerate() {
        match input {
            Some(parent) => visit(*parent, registry, state, order)?,
            None => {
                return Err(PipelineError::MissingInput {
                    node_id: node,
                    node_name: registry.name(node).to_string(),
                    slot,
                })
            }
        }
    }

    state[idx] = VisitState::Visited;
    order.push(node);
    Ok(())
}

/// Identifies all nodes downstream from the given start nodes, including themselves.
/// Used for invalidation when a node is marked modified from outside.
pub fn downstream_from(registry: &NodeRegistry, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.consumers(node));
        }
    }
    visited
}
