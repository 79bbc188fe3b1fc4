//! Core types for chains
//!
//! These types describe the nodes, slots and edges of a submitted chain.
//! Nodes are created once when a chain is parsed and never mutated; the
//! optimizer may only delete them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Value flowing along edges and stored as literals
pub type Value = serde_json::Value;

/// Outputs of one node invocation, one value per declared output slot
///
/// Shared between every reader of the node; never mutated once produced.
pub type Outputs = Arc<[Value]>;

/// Identifier of an input slot, unique within its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputId(pub u32);

/// Identifier of an output slot, unique within its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(pub u32);

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a node relates to streams of items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Produces one set of outputs per invocation
    Regular,
    /// Produces a stream of items
    Generator,
    /// Folds a stream into regular outputs
    Collector,
    /// Maps each item of a stream to zero or more items
    Transformer,
}

impl NodeKind {
    /// Whether nodes of this kind start a new stream lineage
    pub fn is_stream_source(&self) -> bool {
        matches!(self, NodeKind::Generator | NodeKind::Transformer)
    }
}

/// Rewrites the optimizer may apply to a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeBehavior {
    /// Nothing is known about the body
    #[default]
    Opaque,
    /// Single input, single output, output is the input unchanged
    Passthrough,
    /// Forwards `branches[selector]` unchanged to its single output
    Switch {
        selector: InputId,
        branches: Vec<InputId>,
    },
}

/// An input slot of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSlot {
    pub id: InputId,
    /// Optional inputs may be left without an edge or literal
    #[serde(default)]
    pub optional: bool,
}

/// An output slot of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSlot {
    pub id: OutputId,
}

/// A node instance in a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// Names the node body implementation to invoke
    pub schema_id: String,
    pub kind: NodeKind,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<OutputSlot>,
    /// Side-effecting nodes are execution roots and are never optimized away
    pub side_effects: bool,
    #[serde(default)]
    pub behavior: NodeBehavior,
}

impl Node {
    /// Position of an input slot in declaration order
    pub fn input_index(&self, input_id: InputId) -> Option<usize> {
        self.inputs.iter().position(|slot| slot.id == input_id)
    }

    /// Position of an output slot in declaration order
    pub fn output_index(&self, output_id: OutputId) -> Option<usize> {
        self.outputs.iter().position(|slot| slot.id == output_id)
    }

    pub fn input(&self, input_id: InputId) -> Option<&InputSlot> {
        self.inputs.iter().find(|slot| slot.id == input_id)
    }

    pub fn has_output(&self, output_id: OutputId) -> bool {
        self.output_index(output_id).is_some()
    }
}

/// Where an edge reads from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSource {
    pub node_id: NodeId,
    pub output_id: OutputId,
}

impl EdgeSource {
    pub fn new(node_id: impl Into<NodeId>, output_id: OutputId) -> Self {
        Self {
            node_id: node_id.into(),
            output_id,
        }
    }
}

/// Where an edge writes to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTarget {
    pub node_id: NodeId,
    pub input_id: InputId,
}

impl EdgeTarget {
    pub fn new(node_id: impl Into<NodeId>, input_id: InputId) -> Self {
        Self {
            node_id: node_id.into(),
            input_id,
        }
    }
}

/// An edge connecting an output slot to an input slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: EdgeSource,
    pub target: EdgeTarget,
}

impl Edge {
    pub fn new(source: EdgeSource, target: EdgeTarget) -> Self {
        Self { source, target }
    }
}
