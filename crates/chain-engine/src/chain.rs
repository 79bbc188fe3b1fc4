//! The chain: nodes, edges and literal inputs of one submitted graph
//!
//! Edges are indexed both by source node and by target slot so traversal
//! in either direction is O(1) or O(out-degree).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::GraphError;
use crate::types::{Edge, EdgeTarget, InputId, Node, NodeId, OutputId, Value};

/// A node/edge/literal-input graph
#[derive(Debug, Clone, Default)]
pub struct Chain {
    nodes: BTreeMap<NodeId, Node>,
    edges_by_source: HashMap<NodeId, Vec<Edge>>,
    edges_by_target: HashMap<EdgeTarget, Edge>,
    literal_inputs: HashMap<EdgeTarget, Value>,
}

impl Chain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; ids must be unique
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node together with its incident edges and literals
    pub fn remove_node(&mut self, node_id: &str) -> Option<Node> {
        let node = self.nodes.remove(node_id)?;

        if let Some(outgoing) = self.edges_by_source.remove(node_id) {
            for edge in outgoing {
                self.edges_by_target.remove(&edge.target);
            }
        }

        for slot in &node.inputs {
            let target = EdgeTarget::new(node_id, slot.id);
            if let Some(edge) = self.edges_by_target.remove(&target) {
                self.unindex_source(&edge);
            }
            self.literal_inputs.remove(&target);
        }

        Some(node)
    }

    /// Add an edge
    ///
    /// Both endpoints must exist and the target slot must be free: at most
    /// one edge or literal may feed an input.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let source = self
            .nodes
            .get(&edge.source.node_id)
            .ok_or_else(|| GraphError::UnknownNode(edge.source.node_id.clone()))?;
        if !source.has_output(edge.source.output_id) {
            return Err(GraphError::UnknownOutput {
                node_id: edge.source.node_id.clone(),
                output_id: edge.source.output_id,
            });
        }

        let target = self
            .nodes
            .get(&edge.target.node_id)
            .ok_or_else(|| GraphError::UnknownNode(edge.target.node_id.clone()))?;
        if target.input(edge.target.input_id).is_none() {
            return Err(GraphError::UnknownInput {
                node_id: edge.target.node_id.clone(),
                input_id: edge.target.input_id,
            });
        }

        if self.is_bound(&edge.target) {
            return Err(GraphError::InputOccupied {
                node_id: edge.target.node_id.clone(),
                input_id: edge.target.input_id,
            });
        }

        self.edges_by_source
            .entry(edge.source.node_id.clone())
            .or_default()
            .push(edge.clone());
        self.edges_by_target.insert(edge.target.clone(), edge);
        Ok(())
    }

    /// Remove an edge, returning whether it existed
    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        match self.edges_by_target.get(&edge.target) {
            Some(existing) if existing == edge => {}
            _ => return false,
        }
        self.edges_by_target.remove(&edge.target);
        self.unindex_source(edge);
        true
    }

    fn unindex_source(&mut self, edge: &Edge) {
        if let Some(outgoing) = self.edges_by_source.get_mut(&edge.source.node_id) {
            outgoing.retain(|e| e != edge);
            if outgoing.is_empty() {
                self.edges_by_source.remove(&edge.source.node_id);
            }
        }
    }

    /// Bind a literal value to an input slot
    pub fn set_literal(
        &mut self,
        node_id: &str,
        input_id: InputId,
        value: Value,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        if node.input(input_id).is_none() {
            return Err(GraphError::UnknownInput {
                node_id: node_id.to_string(),
                input_id,
            });
        }

        let target = EdgeTarget::new(node_id, input_id);
        if self.edges_by_target.contains_key(&target) {
            return Err(GraphError::InputOccupied {
                node_id: node_id.to_string(),
                input_id,
            });
        }
        self.literal_inputs.insert(target, value);
        Ok(())
    }

    /// Literal bound to an input slot
    pub fn literal(&self, node_id: &str, input_id: InputId) -> Option<&Value> {
        self.literal_inputs.get(&EdgeTarget::new(node_id, input_id))
    }

    pub fn remove_literal(&mut self, node_id: &str, input_id: InputId) -> Option<Value> {
        self.literal_inputs.remove(&EdgeTarget::new(node_id, input_id))
    }

    /// Whether an input slot already has an edge or a literal
    pub fn is_bound(&self, target: &EdgeTarget) -> bool {
        self.edges_by_target.contains_key(target) || self.literal_inputs.contains_key(target)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All edges, sorted for stable comparison
    pub fn edges(&self) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges_by_target.values().collect();
        edges.sort();
        edges
    }

    /// Edges reading any output of a node
    pub fn edges_from(&self, node_id: &str) -> &[Edge] {
        self.edges_by_source
            .get(node_id)
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    /// Edges reading one output of a node
    pub fn edges_from_output<'a>(
        &'a self,
        node_id: &str,
        output_id: OutputId,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges_from(node_id)
            .iter()
            .filter(move |edge| edge.source.output_id == output_id)
    }

    /// Edges feeding a node, in input declaration order
    pub fn edges_to(&self, node_id: &str) -> Vec<&Edge> {
        let Some(node) = self.nodes.get(node_id) else {
            return Vec::new();
        };
        node.inputs
            .iter()
            .filter_map(|slot| self.edge_to(node_id, slot.id))
            .collect()
    }

    /// The edge feeding one input slot
    pub fn edge_to(&self, node_id: &str, input_id: InputId) -> Option<&Edge> {
        self.edges_by_target.get(&EdgeTarget::new(node_id, input_id))
    }

    pub fn out_degree(&self, node_id: &str) -> usize {
        self.edges_from(node_id).len()
    }

    /// Nodes instantiating a schema
    pub fn nodes_with_schema_id<'a>(
        &'a self,
        schema_id: &'a str,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |node| node.schema_id == schema_id)
    }

    /// Topological order of all nodes (Kahn's algorithm)
    ///
    /// Ties are broken by node id so the order is deterministic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), 0))
            .collect();
        for edge in self.edges_by_target.values() {
            *in_degree.entry(edge.target.node_id.as_str()).or_insert(0) += 1;
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node_id) = ready.pop_first() {
            order.push(node_id.to_string());
            for edge in self.edges_from(node_id) {
                if let Some(deg) = in_degree.get_mut(edge.target.node_id.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(edge.target.node_id.as_str());
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(GraphError::Cycle);
        }
        Ok(order)
    }
}

impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.edges() == other.edges()
            && self.literal_inputs == other.literal_inputs
    }
}
