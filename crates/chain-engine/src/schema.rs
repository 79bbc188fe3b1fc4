//! Node schemas
//!
//! A schema is the static description of one node body implementation:
//! its slots, its kind, whether it has side effects, and which optimizer
//! rewrites are safe for it. Nodes in a chain are instances of a schema.

use serde::{Deserialize, Serialize};

use crate::types::{InputId, InputSlot, Node, NodeBehavior, NodeId, NodeKind, OutputId, OutputSlot};

/// Complete metadata for a node body implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSchema {
    /// Unique schema identifier (e.g., "image:blur")
    pub schema_id: String,
    /// Human-readable label
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub kind: NodeKind,
    pub inputs: Vec<InputDescriptor>,
    pub outputs: Vec<OutputDescriptor>,
    #[serde(default)]
    pub side_effects: bool,
    #[serde(default)]
    pub behavior: NodeBehavior,
}

impl NodeSchema {
    /// Create a regular schema with no slots
    pub fn new(schema_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            schema_id: schema_id.into(),
            label: label.into(),
            description: String::new(),
            kind: NodeKind::Regular,
            inputs: Vec::new(),
            outputs: Vec::new(),
            side_effects: false,
            behavior: NodeBehavior::Opaque,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_input(mut self, input: InputDescriptor) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: OutputDescriptor) -> Self {
        self.outputs.push(output);
        self
    }

    /// Mark the schema as side-effecting (its nodes are always executed)
    pub fn with_side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }

    pub fn with_behavior(mut self, behavior: NodeBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Create a node instance of this schema
    pub fn instantiate(&self, node_id: impl Into<NodeId>) -> Node {
        Node {
            id: node_id.into(),
            schema_id: self.schema_id.clone(),
            kind: self.kind,
            inputs: self
                .inputs
                .iter()
                .map(|input| InputSlot {
                    id: input.id,
                    optional: input.optional,
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|output| OutputSlot { id: output.id })
                .collect(),
            side_effects: self.side_effects,
            behavior: self.behavior.clone(),
        }
    }
}

/// Metadata for an input slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub id: InputId,
    pub label: String,
    /// Whether the slot may be left unbound
    pub optional: bool,
}

impl InputDescriptor {
    /// Create a required input
    pub fn required(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: InputId(id),
            label: label.into(),
            optional: false,
        }
    }

    /// Create an optional input
    pub fn optional(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: InputId(id),
            label: label.into(),
            optional: true,
        }
    }
}

/// Metadata for an output slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    pub id: OutputId,
    pub label: String,
}

impl OutputDescriptor {
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: OutputId(id),
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_descriptors() {
        let required = InputDescriptor::required(0, "Image");
        assert_eq!(required.id, InputId(0));
        assert!(!required.optional);

        let optional = InputDescriptor::optional(1, "Mask");
        assert!(optional.optional);
    }

    #[test]
    fn test_instantiate_copies_slots() {
        let schema = NodeSchema::new("util:pass", "Pass Through")
            .with_input(InputDescriptor::required(0, "Value"))
            .with_output(OutputDescriptor::new(0, "Value"))
            .with_behavior(NodeBehavior::Passthrough);

        let node = schema.instantiate("p1");
        assert_eq!(node.id, "p1");
        assert_eq!(node.schema_id, "util:pass");
        assert_eq!(node.inputs.len(), 1);
        assert_eq!(node.outputs[0].id, OutputId(0));
        assert_eq!(node.behavior, NodeBehavior::Passthrough);
        assert!(!node.side_effects);
    }

    #[test]
    fn test_schema_serialization() {
        let schema = NodeSchema::new("io:save", "Save")
            .with_input(InputDescriptor::required(0, "Data"))
            .with_side_effects();

        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("schemaId")); // camelCase
        assert!(json.contains("sideEffects"));
    }
}
