//! Submitted chains
//!
//! Clients submit a flat node list. Inputs are positional: the n-th entry
//! feeds the n-th input slot of the node's schema, and an edge names its
//! source output by position too.
//!
//! ```json
//! [
//!   {"id": "a", "schemaId": "num:const", "nodeType": "regular",
//!    "inputs": [{"type": "value", "value": 2}]},
//!   {"id": "out", "schemaId": "io:print", "nodeType": "regular",
//!    "inputs": [{"type": "edge", "id": "a", "index": 0}]}
//! ]
//! ```

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::{GraphError, Result};
use crate::registry::NodeRegistry;
use crate::types::{Edge, EdgeSource, EdgeTarget, NodeId, NodeKind, OutputId, Value};

/// One node of a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedNode {
    pub id: NodeId,
    pub schema_id: String,
    #[serde(default)]
    pub inputs: Vec<SubmittedInput>,
    pub node_type: NodeKind,
}

/// Source of one submitted input slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubmittedInput {
    /// Literal value; `null` leaves the slot unbound
    Value {
        #[serde(default)]
        value: Value,
    },
    /// Output `index` (by position) of node `id`
    Edge { id: NodeId, index: usize },
}

/// Build a chain from submitted nodes
///
/// Every node's `nodeType` must match its schema's kind. Submitting fewer
/// inputs than the schema declares leaves the trailing slots unbound.
pub fn parse_submission(
    nodes: &[SubmittedNode],
    registry: &NodeRegistry,
) -> std::result::Result<Chain, GraphError> {
    let mut chain = Chain::new();

    for submitted in nodes {
        let schema =
            registry
                .schema(&submitted.schema_id)
                .ok_or_else(|| GraphError::UnknownSchema {
                    node_id: submitted.id.clone(),
                    schema_id: submitted.schema_id.clone(),
                })?;
        if submitted.node_type != schema.kind {
            return Err(GraphError::KindMismatch {
                node_id: submitted.id.clone(),
                submitted: submitted.node_type,
                declared: schema.kind,
            });
        }
        if submitted.inputs.len() > schema.inputs.len() {
            return Err(GraphError::InputCountMismatch {
                node_id: submitted.id.clone(),
                expected: schema.inputs.len(),
                actual: submitted.inputs.len(),
            });
        }
        chain.add_node(schema.instantiate(submitted.id.clone()))?;
    }

    for submitted in nodes {
        let input_ids: Vec<_> = chain
            .node(&submitted.id)
            .map(|node| node.inputs.iter().map(|slot| slot.id).collect())
            .unwrap_or_default();

        for (input, input_id) in submitted.inputs.iter().zip(input_ids) {
            match input {
                SubmittedInput::Value { value } if value.is_null() => {}
                SubmittedInput::Value { value } => {
                    chain.set_literal(&submitted.id, input_id, value.clone())?;
                }
                SubmittedInput::Edge { id, index } => {
                    let source = chain
                        .node(id)
                        .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
                    let output_id = source
                        .outputs
                        .get(*index)
                        .map(|slot| slot.id)
                        .ok_or_else(|| GraphError::UnknownOutput {
                            node_id: id.clone(),
                            output_id: OutputId(*index as u32),
                        })?;
                    chain.add_edge(Edge::new(
                        EdgeSource::new(id.clone(), output_id),
                        EdgeTarget::new(submitted.id.clone(), input_id),
                    ))?;
                }
            }
        }
    }

    Ok(chain)
}

impl Chain {
    /// Parse a JSON submission into a chain
    pub fn from_submission(json: &str, registry: &NodeRegistry) -> Result<Self> {
        let nodes: Vec<SubmittedNode> = serde_json::from_str(json)?;
        Ok(parse_submission(&nodes, registry)?)
    }
}
