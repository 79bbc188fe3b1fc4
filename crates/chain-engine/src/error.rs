//! Error types for the chain engine
//!
//! Errors fall into three groups: graph errors (malformed chains, detected
//! before anything runs), node execution errors (a node body failed), and
//! cancellation. Only node errors inside a non-fail-fast stream are ever
//! recovered locally.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{InputId, NodeId, NodeKind, OutputId};

/// Result type alias using ChainError
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors that can occur while building, optimizing or executing a chain
#[derive(Debug, Error)]
pub enum ChainError {
    /// The chain is malformed
    #[error("Invalid chain: {0}")]
    Graph(#[from] GraphError),

    /// A node body failed
    #[error("{0}")]
    Node(Box<NodeExecutionError>),

    /// One or more items of a non-fail-fast stream failed
    #[error("Errors occurred while iterating '{node_id}': {}", join_messages(.errors))]
    Iteration {
        node_id: NodeId,
        errors: Vec<NodeExecutionError>,
    },

    /// The execution was aborted through its progress controller
    #[error("Execution aborted")]
    Aborted,

    /// The executor has already been run
    #[error("Executor has already been started")]
    AlreadyStarted,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChainError {
    /// Whether this error is the cancellation signal
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<NodeExecutionError> for ChainError {
    fn from(err: NodeExecutionError) -> Self {
        Self::Node(Box::new(err))
    }
}

fn join_messages(errors: &[NodeExecutionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Structural problems with a chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Unknown node '{0}'")]
    UnknownNode(NodeId),

    #[error("Duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    #[error("Unknown schema '{schema_id}' for node '{node_id}'")]
    UnknownSchema { node_id: NodeId, schema_id: String },

    #[error("Node '{node_id}' has no input {input_id}")]
    UnknownInput { node_id: NodeId, input_id: InputId },

    #[error("Node '{node_id}' has no output {output_id}")]
    UnknownOutput { node_id: NodeId, output_id: OutputId },

    #[error("Input {input_id} of node '{node_id}' already has a source")]
    InputOccupied { node_id: NodeId, input_id: InputId },

    #[error("Required input {input_id} of node '{node_id}' is not connected")]
    UnresolvedInput { node_id: NodeId, input_id: InputId },

    #[error("Node '{node_id}' declares {expected} inputs but {actual} were submitted")]
    InputCountMismatch {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Node '{node_id}' was submitted as {submitted:?} but its schema is {declared:?}")]
    KindMismatch {
        node_id: NodeId,
        submitted: NodeKind,
        declared: NodeKind,
    },

    #[error("Cycle detected in chain")]
    Cycle,

    #[error("Node '{node_id}' consumes items from more than one stream")]
    MixedStreams { node_id: NodeId },

    #[error("{kind:?} node '{node_id}' is not fed by a stream")]
    MissingStream { node_id: NodeId, kind: NodeKind },

    #[error("Generator '{node_id}' cannot consume items of another stream")]
    NestedGenerator { node_id: NodeId },

    #[error("Result of collector '{node_id}' feeds back into the stream it collects")]
    StreamFeedback { node_id: NodeId },
}

/// Error returned by a node body
///
/// Bodies only describe what went wrong; the executor attaches the node
/// context when it wraps this into a [`NodeExecutionError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NodeError {
    pub message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A node failure with enough context to render a precise message
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("Node '{node_id}' ({schema_id}) failed: {message}")]
pub struct NodeExecutionError {
    pub node_id: NodeId,
    pub schema_id: String,
    /// Inputs resolved before the failure; `None` for slots never reached
    pub inputs: Vec<Option<serde_json::Value>>,
    pub message: String,
}

impl NodeExecutionError {
    pub fn new(
        node_id: impl Into<NodeId>,
        schema_id: impl Into<String>,
        inputs: Vec<Option<serde_json::Value>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            schema_id: schema_id.into(),
            inputs,
            message: message.into(),
        }
    }
}
