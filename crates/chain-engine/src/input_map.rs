//! Resolved input sources for every node
//!
//! Built once per execution, after optimization. The executor never looks
//! at edges directly: it asks the map where each input slot reads from.

use std::collections::HashMap;

use crate::chain::Chain;
use crate::error::GraphError;
use crate::types::{NodeId, Value};

/// Where one input slot takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Output `from_index` (declaration position) of another node
    Edge { from_node: NodeId, from_index: usize },
    /// A literal bound at submission time
    Value(Value),
    /// An optional slot left unbound; reads as `null`
    Unset,
}

/// Input sources of every node, in slot declaration order
#[derive(Debug, Clone, Default)]
pub struct InputMap {
    inputs: HashMap<NodeId, Vec<InputSource>>,
}

impl InputMap {
    /// Resolve every input slot of every node
    ///
    /// A required slot with neither an edge nor a literal is an error.
    pub fn build(chain: &Chain) -> Result<Self, GraphError> {
        let mut inputs = HashMap::with_capacity(chain.len());

        for node in chain.nodes() {
            let mut sources = Vec::with_capacity(node.inputs.len());
            for slot in &node.inputs {
                let source = if let Some(edge) = chain.edge_to(&node.id, slot.id) {
                    let from_index = chain
                        .node(&edge.source.node_id)
                        .and_then(|source| source.output_index(edge.source.output_id))
                        .ok_or_else(|| GraphError::UnknownOutput {
                            node_id: edge.source.node_id.clone(),
                            output_id: edge.source.output_id,
                        })?;
                    InputSource::Edge {
                        from_node: edge.source.node_id.clone(),
                        from_index,
                    }
                } else if let Some(value) = chain.literal(&node.id, slot.id) {
                    InputSource::Value(value.clone())
                } else if slot.optional {
                    InputSource::Unset
                } else {
                    return Err(GraphError::UnresolvedInput {
                        node_id: node.id.clone(),
                        input_id: slot.id,
                    });
                };
                sources.push(source);
            }
            inputs.insert(node.id.clone(), sources);
        }

        Ok(Self { inputs })
    }

    /// Input sources of a node; empty for unknown nodes
    pub fn get(&self, node_id: &str) -> &[InputSource] {
        self.inputs
            .get(node_id)
            .map(|sources| sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
