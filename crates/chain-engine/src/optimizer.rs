//! Chain rewrites applied before execution
//!
//! Passes run until none of them changes the chain:
//!
//! - dead nodes (no consumers, no side effects) are removed
//! - passthrough nodes are bypassed, their consumers reading the
//!   passthrough's own input instead
//! - switches with a constant selector, or whose branches all read the
//!   same output, are bypassed the same way
//!
//! A rewrite that cannot be applied safely is skipped for that node. That
//! includes any bypass that would move consumers into or out of a stream
//! region, since it changes how often they run.

use crate::chain::Chain;
use crate::error::GraphError;
use crate::lineage::stream_fed_nodes;
use crate::types::{Edge, EdgeSource, InputId, NodeBehavior, NodeKind, Value};

/// Optimize a chain in place, returning the number of nodes removed
///
/// Running it again on its own result changes nothing.
pub fn optimize(chain: &mut Chain) -> Result<usize, GraphError> {
    let initial = chain.len();
    let max_passes = initial + 1;

    let mut passes = 0;
    while passes < max_passes {
        passes += 1;
        let mut changed = remove_dead_nodes(chain);
        changed |= elide_passthroughs(chain)?;
        changed |= fold_switches(chain)?;
        if !changed {
            break;
        }
    }

    let removed = initial - chain.len();
    if removed > 0 {
        log::info!(
            "Optimizer removed {} of {} nodes in {} passes",
            removed,
            initial,
            passes
        );
    }
    Ok(removed)
}

/// Remove nodes whose outputs nobody reads
fn remove_dead_nodes(chain: &mut Chain) -> bool {
    let dead: Vec<String> = chain
        .nodes()
        .filter(|node| !node.side_effects && chain.out_degree(&node.id) == 0)
        .map(|node| node.id.clone())
        .collect();

    for node_id in &dead {
        log::debug!("Removing dead node '{}'", node_id);
        chain.remove_node(node_id);
    }
    !dead.is_empty()
}

fn elide_passthroughs(chain: &mut Chain) -> Result<bool, GraphError> {
    let candidates: Vec<(String, InputId)> = chain
        .nodes()
        .filter(|node| node.behavior == NodeBehavior::Passthrough && node.inputs.len() == 1)
        .map(|node| (node.id.clone(), node.inputs[0].id))
        .collect();

    let mut changed = false;
    for (node_id, input_id) in candidates {
        changed |= try_bypass(chain, &node_id, input_id)?;
    }
    Ok(changed)
}

fn fold_switches(chain: &mut Chain) -> Result<bool, GraphError> {
    let candidates: Vec<(String, InputId, Vec<InputId>)> = chain
        .nodes()
        .filter_map(|node| match &node.behavior {
            NodeBehavior::Switch { selector, branches } => {
                Some((node.id.clone(), *selector, branches.clone()))
            }
            _ => None,
        })
        .collect();

    let mut changed = false;
    for (node_id, selector, branches) in candidates {
        if let Some(branch) = selected_branch(chain, &node_id, selector, &branches) {
            changed |= try_bypass(chain, &node_id, branch)?;
        }
    }
    Ok(changed)
}

/// Branch a switch will always forward, if known before execution
fn selected_branch(
    chain: &Chain,
    node_id: &str,
    selector: InputId,
    branches: &[InputId],
) -> Option<InputId> {
    if let Some(value) = chain.literal(node_id, selector) {
        let index = usize::try_from(value.as_u64()?).ok()?;
        return branches.get(index).copied();
    }

    // Every branch reads the same output: the selector does not matter
    let first = branches.first()?;
    let source = &chain.edge_to(node_id, *first)?.source;
    branches[1..]
        .iter()
        .all(|branch| chain.edge_to(node_id, *branch).map(|e| &e.source) == Some(source))
        .then_some(*first)
}

enum Replacement {
    Edge(EdgeSource),
    Literal(Value),
}

/// Remove a node, rewiring its consumers to whatever feeds `input_id`
///
/// Returns false (and leaves the chain untouched) when the rewrite is
/// not safe for this node.
fn try_bypass(chain: &mut Chain, node_id: &str, input_id: InputId) -> Result<bool, GraphError> {
    let Some(node) = chain.node(node_id) else {
        return Ok(false);
    };
    if node.side_effects || node.kind != NodeKind::Regular || node.outputs.len() != 1 {
        return Ok(false);
    }

    let replacement = if let Some(edge) = chain.edge_to(node_id, input_id) {
        if edge.source.node_id == node_id {
            return Ok(false);
        }
        Replacement::Edge(edge.source.clone())
    } else if let Some(value) = chain.literal(node_id, input_id) {
        Replacement::Literal(value.clone())
    } else {
        return Ok(false);
    };

    let stream_fed = stream_fed_nodes(chain);
    let carries_items = |node_id: &str| {
        stream_fed.contains(node_id)
            || chain
                .node(node_id)
                .is_some_and(|node| node.kind.is_stream_source())
    };
    let replacement_carries_items = match &replacement {
        Replacement::Edge(source) => carries_items(&source.node_id),
        Replacement::Literal(_) => false,
    };
    if replacement_carries_items != carries_items(node_id) {
        return Ok(false);
    }

    let consumers = chain.edges_from(node_id).to_vec();
    let conflict = consumers.iter().any(|edge| {
        edge.target.node_id == node_id
            || chain
                .literal(&edge.target.node_id, edge.target.input_id)
                .is_some()
    });
    if conflict {
        return Ok(false);
    }

    chain.remove_node(node_id);
    for consumer in consumers {
        match &replacement {
            Replacement::Edge(source) => {
                chain.add_edge(Edge::new(source.clone(), consumer.target))?;
            }
            Replacement::Literal(value) => {
                chain.set_literal(
                    &consumer.target.node_id,
                    consumer.target.input_id,
                    value.clone(),
                )?;
            }
        }
    }

    log::debug!("Bypassed node '{}' through input {}", node_id, input_id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ChainBuilder;
    use crate::lineage::StreamLineage;
    use crate::test_support::{stream_registry, test_registry};
    use serde_json::json;

    #[test]
    fn test_passthrough_elided() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("a", "num:const")
            .literal("a", 0, json!(1))
            .add_node("pass", "util:pass")
            .add_node("b", "io:sink")
            .connect("a", 0, "pass", 0)
            .connect("pass", 0, "b", 0)
            .build()
            .unwrap();

        assert_eq!(optimize(&mut chain).unwrap(), 1);
        assert!(!chain.contains("pass"));
        let edge = chain.edge_to("b", InputId(0)).unwrap();
        assert_eq!(edge.source.node_id, "a");
    }

    #[test]
    fn test_passthrough_of_literal() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("pass", "util:pass")
            .literal("pass", 0, json!("hello"))
            .add_node("b", "io:sink")
            .connect("pass", 0, "b", 0)
            .build()
            .unwrap();

        optimize(&mut chain).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.literal("b", InputId(0)), Some(&json!("hello")));
    }

    #[test]
    fn test_dead_nodes_cascade() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("a", "num:const")
            .literal("a", 0, json!(1))
            .add_node("b", "num:add")
            .literal("b", 1, json!(2))
            .add_node("kept", "io:sink")
            .literal("kept", 0, json!(3))
            .connect("a", 0, "b", 0)
            .build()
            .unwrap();

        assert_eq!(optimize(&mut chain).unwrap(), 2);
        assert_eq!(chain.node_ids().collect::<Vec<_>>(), vec!["kept"]);
    }

    #[test]
    fn test_switch_with_constant_selector() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("x", "num:const")
            .literal("x", 0, json!(10))
            .add_node("y", "num:const")
            .literal("y", 0, json!(20))
            .add_node("sw", "util:switch")
            .literal("sw", 0, json!(0))
            .add_node("out", "io:sink")
            .connect("x", 0, "sw", 1)
            .connect("y", 0, "sw", 2)
            .connect("sw", 0, "out", 0)
            .build()
            .unwrap();

        optimize(&mut chain).unwrap();
        assert!(!chain.contains("sw"));
        assert!(!chain.contains("y"));
        assert_eq!(chain.edge_to("out", InputId(0)).unwrap().source.node_id, "x");
    }

    #[test]
    fn test_switch_with_shared_branches() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("x", "num:const")
            .literal("x", 0, json!(10))
            .add_node("sel", "num:const")
            .literal("sel", 0, json!(1))
            .add_node("sw", "util:switch")
            .add_node("out", "io:sink")
            .connect("sel", 0, "sw", 0)
            .connect("x", 0, "sw", 1)
            .connect("x", 0, "sw", 2)
            .connect("sw", 0, "out", 0)
            .build()
            .unwrap();

        optimize(&mut chain).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.edge_to("out", InputId(0)).unwrap().source.node_id, "x");
    }

    #[test]
    fn test_unsafe_switches_kept() {
        let registry = test_registry();
        for selector in [json!(5), json!("zero"), json!(-1)] {
            let mut chain = ChainBuilder::new(&registry)
                .add_node("x", "num:const")
                .literal("x", 0, json!(10))
                .add_node("y", "num:const")
                .literal("y", 0, json!(20))
                .add_node("sw", "util:switch")
                .literal("sw", 0, selector)
                .add_node("out", "io:sink")
                .connect("x", 0, "sw", 1)
                .connect("y", 0, "sw", 2)
                .connect("sw", 0, "out", 0)
                .build()
                .unwrap();

            assert_eq!(optimize(&mut chain).unwrap(), 0);
            assert!(chain.contains("sw"));
        }
    }

    #[test]
    fn test_switch_in_stream_keeps_its_region() {
        let registry = stream_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("x", "num:const")
            .literal("x", 0, json!(10))
            .add_node("gen", "stream:range")
            .literal("gen", 0, json!(3))
            .add_node("sw", "util:switch")
            .literal("sw", 0, json!(0))
            .add_node("sum", "stream:sum")
            .add_node("out", "io:sink")
            .connect("x", 0, "sw", 1)
            .connect("gen", 0, "sw", 2)
            .connect("sw", 0, "sum", 0)
            .connect("sum", 0, "out", 0)
            .build()
            .unwrap();

        assert_eq!(optimize(&mut chain).unwrap(), 0);
        assert!(chain.contains("sw"));
        assert!(chain.contains("gen"));
        assert!(StreamLineage::analyze(&chain).is_ok());
    }

    #[test]
    fn test_passthrough_inside_stream_elided() {
        let registry = stream_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("gen", "stream:range")
            .literal("gen", 0, json!(3))
            .add_node("pass", "util:pass")
            .add_node("sum", "stream:sum")
            .add_node("out", "io:sink")
            .connect("gen", 0, "pass", 0)
            .connect("pass", 0, "sum", 0)
            .connect("sum", 0, "out", 0)
            .build()
            .unwrap();

        assert_eq!(optimize(&mut chain).unwrap(), 1);
        assert_eq!(chain.edge_to("sum", InputId(0)).unwrap().source.node_id, "gen");
        assert!(StreamLineage::analyze(&chain).is_ok());
    }

    #[test]
    fn test_switch_with_unset_branch_kept() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("x", "num:const")
            .literal("x", 0, json!(10))
            .add_node("sw", "util:switch")
            .literal("sw", 0, json!(1))
            .add_node("out", "io:sink")
            .connect("x", 0, "sw", 1)
            .connect("sw", 0, "out", 0)
            .build()
            .unwrap();

        optimize(&mut chain).unwrap();
        assert!(chain.contains("sw"));
    }

    #[test]
    fn test_side_effect_nodes_never_removed() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("s1", "io:sink")
            .literal("s1", 0, json!(1))
            .add_node("s2", "io:sink")
            .literal("s2", 0, json!(2))
            .build()
            .unwrap();

        assert_eq!(optimize(&mut chain).unwrap(), 0);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let registry = test_registry();
        let mut chain = ChainBuilder::new(&registry)
            .add_node("a", "num:const")
            .literal("a", 0, json!(1))
            .add_node("p1", "util:pass")
            .add_node("p2", "util:pass")
            .add_node("unused", "num:const")
            .literal("unused", 0, json!(0))
            .add_node("out", "io:sink")
            .connect("a", 0, "p1", 0)
            .connect("p1", 0, "p2", 0)
            .connect("p2", 0, "out", 0)
            .build()
            .unwrap();

        optimize(&mut chain).unwrap();
        let once = chain.clone();
        assert_eq!(optimize(&mut chain).unwrap(), 0);
        assert_eq!(chain, once);
        assert_eq!(chain.len(), 2);
    }
}
