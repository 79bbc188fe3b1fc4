//! Stream regions of a chain
//!
//! Every generator and transformer is a *stream source*. A regular node
//! reading (directly or transitively) from a source without an intervening
//! collector belongs to that source's region and is evaluated once per
//! item. Collectors and transformers terminate the region they consume.
//!
//! A transformer starts a nested region; the generator at the top of that
//! nesting is the region's root and is what the executor drives.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::chain::Chain;
use crate::error::GraphError;
use crate::types::{NodeId, NodeKind};

/// Regular nodes evaluated once per stream item
///
/// Tolerates malformed chains; use [`StreamLineage::analyze`] to validate.
pub fn stream_fed_nodes(chain: &Chain) -> HashSet<NodeId> {
    let mut fed = HashSet::new();
    let mut queue: VecDeque<&str> = chain
        .nodes()
        .filter(|node| node.kind.is_stream_source())
        .map(|node| node.id.as_str())
        .collect();

    while let Some(node_id) = queue.pop_front() {
        for edge in chain.edges_from(node_id) {
            let target = edge.target.node_id.as_str();
            let is_regular = chain
                .node(target)
                .is_some_and(|node| node.kind == NodeKind::Regular);
            if is_regular && fed.insert(target.to_string()) {
                queue.push_back(target);
            }
        }
    }
    fed
}

/// Stream region membership of every node
#[derive(Debug, Clone, Default)]
pub struct StreamLineage {
    /// Source whose items a node consumes
    input_lineage: HashMap<NodeId, NodeId>,
    /// Source whose items a node's outputs belong to
    output_lineage: HashMap<NodeId, NodeId>,
    /// Source -> generator at the top of its nesting
    roots: HashMap<NodeId, NodeId>,
    /// Source -> nodes evaluated once per item to drive the region
    terminals: HashMap<NodeId, Vec<NodeId>>,
    /// Generator -> collectors and transformers anywhere below it
    stream_nodes: HashMap<NodeId, Vec<NodeId>>,
}

impl StreamLineage {
    /// Analyze a chain, rejecting ill-formed stream usage
    pub fn analyze(chain: &Chain) -> Result<Self, GraphError> {
        let order = chain.topological_order()?;
        let mut lineage = Self::default();

        for node_id in &order {
            let Some(node) = chain.node(node_id) else {
                continue;
            };

            let sources: BTreeSet<&NodeId> = chain
                .edges_to(node_id)
                .into_iter()
                .filter_map(|edge| lineage.output_lineage.get(&edge.source.node_id))
                .collect();
            if sources.len() > 1 {
                return Err(GraphError::MixedStreams {
                    node_id: node_id.clone(),
                });
            }
            let input = sources.into_iter().next().cloned();

            match (node.kind, input) {
                (NodeKind::Generator, Some(_)) => {
                    return Err(GraphError::NestedGenerator {
                        node_id: node_id.clone(),
                    });
                }
                (NodeKind::Generator, None) => {
                    lineage.output_lineage.insert(node_id.clone(), node_id.clone());
                    lineage.roots.insert(node_id.clone(), node_id.clone());
                    lineage.stream_nodes.entry(node_id.clone()).or_default();
                }
                (NodeKind::Collector | NodeKind::Transformer, None) => {
                    return Err(GraphError::MissingStream {
                        node_id: node_id.clone(),
                        kind: node.kind,
                    });
                }
                (kind @ (NodeKind::Collector | NodeKind::Transformer), Some(source)) => {
                    let root = lineage
                        .roots
                        .get(&source)
                        .cloned()
                        .unwrap_or_else(|| source.clone());
                    lineage
                        .terminals
                        .entry(source.clone())
                        .or_default()
                        .push(node_id.clone());
                    lineage
                        .stream_nodes
                        .entry(root.clone())
                        .or_default()
                        .push(node_id.clone());
                    lineage.input_lineage.insert(node_id.clone(), source);
                    if kind == NodeKind::Transformer {
                        lineage.output_lineage.insert(node_id.clone(), node_id.clone());
                        lineage.roots.insert(node_id.clone(), root);
                    }
                }
                (NodeKind::Regular, Some(source)) => {
                    if chain.out_degree(node_id) == 0 || node.side_effects {
                        lineage
                            .terminals
                            .entry(source.clone())
                            .or_default()
                            .push(node_id.clone());
                    }
                    lineage.input_lineage.insert(node_id.clone(), source.clone());
                    lineage.output_lineage.insert(node_id.clone(), source);
                }
                (NodeKind::Regular, None) => {}
            }
        }

        lineage.check_collector_feedback(chain)?;
        Ok(lineage)
    }

    /// A collector's result must not flow back into its own stream
    fn check_collector_feedback(&self, chain: &Chain) -> Result<(), GraphError> {
        for nodes in self.stream_nodes.values() {
            for collector in nodes {
                if chain.node(collector).map(|n| n.kind) != Some(NodeKind::Collector) {
                    continue;
                }
                let Some(root) = self.root_of_input(collector) else {
                    continue;
                };

                let mut seen = HashSet::new();
                let mut queue: VecDeque<&str> = VecDeque::from([collector.as_str()]);
                while let Some(current) = queue.pop_front() {
                    for edge in chain.edges_from(current) {
                        let target = edge.target.node_id.as_str();
                        if !seen.insert(target) {
                            continue;
                        }
                        if self.root_of_input(target) == Some(root) {
                            return Err(GraphError::StreamFeedback {
                                node_id: collector.clone(),
                            });
                        }
                        queue.push_back(target);
                    }
                }
            }
        }
        Ok(())
    }

    fn root_of_input(&self, node_id: &str) -> Option<&NodeId> {
        self.input_lineage
            .get(node_id)
            .and_then(|source| self.roots.get(source))
    }

    /// Stream source whose items a node consumes
    pub fn input_lineage(&self, node_id: &str) -> Option<&NodeId> {
        self.input_lineage.get(node_id)
    }

    /// Stream source whose items a node's outputs belong to
    ///
    /// `None` means the outputs live in the execution's root scope.
    pub fn output_lineage(&self, node_id: &str) -> Option<&NodeId> {
        self.output_lineage.get(node_id)
    }

    /// Generator at the top of a source's nesting
    pub fn root_generator(&self, source: &str) -> Option<&NodeId> {
        self.roots.get(source)
    }

    /// Nodes to evaluate for every item of a source, in topological order
    pub fn terminals(&self, source: &str) -> &[NodeId] {
        self.terminals
            .get(source)
            .map(|nodes| nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Collectors and transformers driven by a generator, in topological order
    pub fn stream_nodes(&self, generator: &str) -> &[NodeId] {
        self.stream_nodes
            .get(generator)
            .map(|nodes| nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Generator a node's stream work is driven by, if any
    pub fn driving_generator(&self, node_id: &str) -> Option<&NodeId> {
        self.output_lineage
            .get(node_id)
            .or_else(|| self.input_lineage.get(node_id))
            .and_then(|source| self.roots.get(source))
    }

    /// Whether an edge from this node carries one value per item
    pub fn is_iterated_source(&self, node_id: &str) -> bool {
        self.output_lineage.contains_key(node_id)
    }
}
