//! Fluent builder for chains
//!
//! Nodes are instantiated from registry schemas, so callers only name the
//! schema and wire slots by their numeric ids.

use crate::chain::Chain;
use crate::error::GraphError;
use crate::registry::NodeRegistry;
use crate::types::{Edge, EdgeSource, EdgeTarget, InputId, Node, NodeId, OutputId, Value};

/// Fluent builder for constructing chains
///
/// # Example
///
/// ```ignore
/// let chain = ChainBuilder::new(&registry)
///     .add_node("a", "num:const")
///     .literal("a", 0, serde_json::json!(2))
///     .add_node("out", "io:print")
///     .connect("a", 0, "out", 0)
///     .build()?;
/// ```
pub struct ChainBuilder<'a> {
    registry: &'a NodeRegistry,
    nodes: Vec<(NodeId, String)>,
    instances: Vec<Node>,
    literals: Vec<(NodeId, InputId, Value)>,
    edges: Vec<Edge>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            instances: Vec::new(),
            literals: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a node instantiated from a registered schema
    pub fn add_node(mut self, id: impl Into<NodeId>, schema_id: impl Into<String>) -> Self {
        self.nodes.push((id.into(), schema_id.into()));
        self
    }

    /// Add an already instantiated node
    pub fn add_instance(mut self, node: Node) -> Self {
        self.instances.push(node);
        self
    }

    /// Bind a literal to an input slot
    pub fn literal(mut self, node_id: impl Into<NodeId>, input: u32, value: Value) -> Self {
        self.literals.push((node_id.into(), InputId(input), value));
        self
    }

    /// Connect an output slot to an input slot
    pub fn connect(
        mut self,
        from: impl Into<NodeId>,
        output: u32,
        to: impl Into<NodeId>,
        input: u32,
    ) -> Self {
        self.edges.push(Edge::new(
            EdgeSource::new(from, OutputId(output)),
            EdgeTarget::new(to, InputId(input)),
        ));
        self
    }

    /// Build the chain
    ///
    /// Nodes are added first, then literals, then edges, so call order
    /// between them does not matter. Stops at the first structural error.
    pub fn build(self) -> Result<Chain, GraphError> {
        let mut chain = Chain::new();

        for (node_id, schema_id) in self.nodes {
            let schema = self
                .registry
                .schema(&schema_id)
                .ok_or_else(|| GraphError::UnknownSchema {
                    node_id: node_id.clone(),
                    schema_id: schema_id.clone(),
                })?;
            chain.add_node(schema.instantiate(node_id))?;
        }
        for node in self.instances {
            chain.add_node(node)?;
        }
        for (node_id, input_id, value) in self.literals {
            chain.set_literal(&node_id, input_id, value)?;
        }
        for edge in self.edges {
            chain.add_edge(edge)?;
        }

        Ok(chain)
    }
}
