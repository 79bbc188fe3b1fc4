//! Event types for streaming execution progress
//!
//! Events are sent from the executor to any consumer (a client transport,
//! a test, a log) to report node lifecycle, item progress and errors.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::NodeExecutionError;
use crate::types::{NodeId, Value};

/// Trait for sending execution events
///
/// This abstracts over the transport mechanism so the executor can be
/// used in different contexts.
pub trait EventSink: Send + Sync {
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during chain execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        execution_id: String,
        node_count: usize,
    },

    #[serde(rename_all = "camelCase")]
    NodeStarted {
        execution_id: String,
        node_id: NodeId,
        schema_id: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeFinished {
        execution_id: String,
        node_id: NodeId,
        duration_ms: u64,
    },

    /// One item of a stream has been fully processed
    #[serde(rename_all = "camelCase")]
    NodeProgress {
        execution_id: String,
        node_id: NodeId,
        index: usize,
        length: usize,
    },

    /// A node body failed
    #[serde(rename_all = "camelCase")]
    ExecutionError {
        execution_id: String,
        node_id: NodeId,
        schema_id: String,
        inputs: Vec<Option<Value>>,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionFinished {
        execution_id: String,
        duration_ms: u64,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionAborted { execution_id: String },
}

impl ExecutionEvent {
    pub fn node_progress(execution_id: &str, node_id: &str, index: usize, length: usize) -> Self {
        Self::NodeProgress {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            index,
            length,
        }
    }

    pub fn execution_error(execution_id: &str, error: &NodeExecutionError) -> Self {
        Self::ExecutionError {
            execution_id: execution_id.to_string(),
            node_id: error.node_id.clone(),
            schema_id: error.schema_id.clone(),
            inputs: error.inputs.clone(),
            message: error.message.clone(),
        }
    }

    /// Node the event is about, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeFinished { node_id, .. }
            | Self::NodeProgress { node_id, .. }
            | Self::ExecutionError { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ExecutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into an unbounded tokio channel
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(ExecutionEvent::node_progress("exec1", "gen", 2, 5))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ExecutionEvent::NodeProgress { node_id, index, length, .. } => {
                assert_eq!(node_id, "gen");
                assert_eq!(*index, 2);
                assert_eq!(*length, 5);
            }
            _ => panic!("Expected NodeProgress event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = ExecutionEvent::NodeFinished {
            execution_id: "exec1".to_string(),
            node_id: "n1".to_string(),
            duration_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeFinished");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(event.node_id(), Some("n1"));
    }

    #[test]
    fn test_error_event_from_node_error() {
        let error = NodeExecutionError::new("n1", "num:add", vec![Some(1.into()), None], "boom");
        let event = ExecutionEvent::execution_error("exec1", &error);
        match event {
            ExecutionEvent::ExecutionError { inputs, message, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(message, "boom");
            }
            _ => panic!("Expected ExecutionError event"),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (sink, mut receiver) = ChannelEventSink::channel();
        sink.send(ExecutionEvent::ExecutionAborted {
            execution_id: "exec1".to_string(),
        })
        .unwrap();
        assert!(matches!(
            receiver.recv().await,
            Some(ExecutionEvent::ExecutionAborted { .. })
        ));

        drop(receiver);
        let err = sink
            .send(ExecutionEvent::ExecutionAborted {
                execution_id: "exec1".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.message, "Channel closed");
    }
}
