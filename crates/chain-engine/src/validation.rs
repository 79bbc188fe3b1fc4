//! Chain validation
//!
//! Checks schemas, required inputs, cycles and stream usage before
//! anything runs.

use crate::chain::Chain;
use crate::error::GraphError;
use crate::lineage::StreamLineage;
use crate::registry::NodeRegistry;
use crate::types::EdgeTarget;

/// Validate a chain
///
/// Returns all validation errors found (not just the first). Pass a
/// registry to check nodes against their schemas. Stream usage is only
/// checked on acyclic chains.
pub fn validate_chain(chain: &Chain, registry: Option<&NodeRegistry>) -> Vec<GraphError> {
    let mut errors = Vec::new();

    if let Some(reg) = registry {
        validate_schemas(chain, reg, &mut errors);
    }
    validate_required_inputs(chain, &mut errors);

    match chain.topological_order() {
        Ok(_) => {
            if let Err(err) = StreamLineage::analyze(chain) {
                errors.push(err);
            }
        }
        Err(err) => errors.push(err),
    }

    errors
}

/// Check that every node's schema exists and agrees on the node kind
fn validate_schemas(chain: &Chain, registry: &NodeRegistry, errors: &mut Vec<GraphError>) {
    for node in chain.nodes() {
        match registry.schema(&node.schema_id) {
            None => errors.push(GraphError::UnknownSchema {
                node_id: node.id.clone(),
                schema_id: node.schema_id.clone(),
            }),
            Some(schema) if schema.kind != node.kind => errors.push(GraphError::KindMismatch {
                node_id: node.id.clone(),
                submitted: node.kind,
                declared: schema.kind,
            }),
            Some(_) => {}
        }
    }
}

/// Check that required inputs have an edge or a literal
fn validate_required_inputs(chain: &Chain, errors: &mut Vec<GraphError>) {
    for node in chain.nodes() {
        for slot in node.inputs.iter().filter(|slot| !slot.optional) {
            if !chain.is_bound(&EdgeTarget::new(node.id.clone(), slot.id)) {
                errors.push(GraphError::UnresolvedInput {
                    node_id: node.id.clone(),
                    input_id: slot.id,
                });
            }
        }
    }
}
