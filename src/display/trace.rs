use crate::compute::ledger::Ledger;
use crate::store::{NodeId, NodeRegistry};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the upstream tree of `target` with each node's kind, last known
/// information and cache state. Shared producers are printed once and referenced
/// by level afterwards.
pub fn describe(registry: &NodeRegistry, ledger: &Ledger, target: NodeId) -> String {
    let mut tracer = Tracer { registry, ledger, visited_at_level: HashMap::new(), output: String::new() };

    if registry.contains(target) {
        let _ = writeln!(tracer.output, "PIPELINE for node '{}':", registry.name(target));
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_node(target, 1, "");
    } else {
        let _ = writeln!(tracer.output, "Error: Invalid Node ID {:?}", target);
    }
    tracer.output
}

struct Tracer<'a> {
    registry: &'a NodeRegistry,
    ledger: &'a Ledger,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}-> {} (Ref to L{})", prefix, self.registry.name(node_id), first_seen);
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let object = self.registry.object(node_id);
        let _ = writeln!(
            self.output,
            "{}[L{}] {} ({}) {} {}",
            prefix,
            level,
            self.registry.name(node_id),
            object.type_name(),
            self.format_information(node_id),
            self.format_output(node_id),
        );

        let stem = self.build_child_stem(prefix);
        let inputs = self.registry.get_inputs(node_id);
        for (slot, input) in inputs.iter().enumerate() {
            let connector = if slot == inputs.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{}", stem, connector);
            match input {
                Some(parent) => self.trace_node(*parent, level + 1, &full_prefix),
                None => {
                    let _ = writeln!(self.output, "{}[slot {}: unset]", full_prefix, slot);
                }
            }
        }
    }

    fn format_information(&self, id: NodeId) -> String {
        match self.ledger.information(id) {
            Some(info) => format!(
                "largest={} spacing={:?} origin={:?} mtime={}",
                info.metadata.largest_region(),
                info.metadata.spacing(),
                info.metadata.origin(),
                info.pipeline_mtime.value()
            ),
            None => "largest=[?]".to_string(),
        }
    }

    fn format_output(&self, id: NodeId) -> String {
        match self.ledger.output(id) {
            Some(out) => format!(
                "buffered={} {} @{}",
                out.data.buffered_region(),
                out.data.scalar_type(),
                out.generated_at.value()
            ),
            None => "buffered=[none]".to_string(),
        }
    }

    fn build_child_stem(&self, current_prefix: &str) -> String {
        current_prefix.replace("`--", "   ").replace("|--", "|  ")
    }
}
