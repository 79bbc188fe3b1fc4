//! Chain Engine - cache-aware, stream-aware node graph execution
//!
//! This crate executes a directed graph of processing nodes ("chain")
//! submitted by a client. It supports:
//!
//! - Memoized evaluation where each output lives exactly as long as it has readers
//! - Streams of runtime-determined length (generators, collectors, transformers)
//! - Pre-execution rewrites (dead nodes, passthroughs, constant switches)
//! - Cooperative pause, resume and abort
//!
//! # Architecture
//!
//! - [`Chain`]: nodes, edges and literal inputs with a dual edge index
//! - [`NodeRegistry`]: schemas and the [`NodeBody`] implementations behind them
//! - [`optimize`]: fixpoint rewrites applied before execution
//! - [`OutputCache`]: reference-counted cache with parent scopes
//! - [`Executor`]: the root walk, stream driving and event emission
//! - [`ProgressController`]: pause/abort token checked at every node boundary
//!
//! # Example
//!
//! ```ignore
//! use chain_engine::{Chain, Executor};
//!
//! let chain = Chain::from_submission(json, &registry)?;
//! let executor = Executor::new(chain, Arc::new(registry));
//! let report = executor.run().await?;
//! ```

pub mod builder;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod input_map;
pub mod lineage;
pub mod optimizer;
pub mod progress;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod submission;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::ChainBuilder;
pub use cache::{get_cache_strategies, CacheStrategy, OutputCache};
pub use chain::Chain;
pub use config::ExecutorConfig;
pub use error::{ChainError, GraphError, NodeError, NodeExecutionError, Result};
pub use events::{ChannelEventSink, EventSink, ExecutionEvent, NullEventSink, VecEventSink};
pub use executor::{ExecutionReport, ExecutionState, Executor};
pub use input_map::{InputMap, InputSource};
pub use lineage::StreamLineage;
pub use optimizer::optimize;
pub use progress::ProgressController;
pub use registry::{NodeBody, NodeContext, NodeOutput, NodeRegistry};
pub use schema::{InputDescriptor, NodeSchema, OutputDescriptor};
pub use stream::{Collector, Generator, Item, Transformer};
pub use submission::{parse_submission, SubmittedInput, SubmittedNode};
pub use types::{
    Edge, EdgeSource, EdgeTarget, InputId, Node, NodeBehavior, NodeId, NodeKind, OutputId,
    Outputs, Value,
};
pub use validation::validate_chain;

#[cfg(test)]
pub(crate) mod test_support {
    //! Small node catalog shared by the unit tests

    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::error::NodeError;
    use crate::registry::{NodeOutput, NodeRegistry};
    use crate::schema::{InputDescriptor, NodeSchema, OutputDescriptor};
    use crate::stream::{Collector, Generator, Transformer};
    use crate::types::{InputId, NodeBehavior, NodeKind, Value};

    pub type Recorder = Arc<Mutex<Vec<Value>>>;

    fn int(value: &Value) -> Result<i64, NodeError> {
        value
            .as_i64()
            .ok_or_else(|| NodeError::new(format!("expected an integer, got {}", value)))
    }

    fn unary(schema_id: &str, label: &str) -> NodeSchema {
        NodeSchema::new(schema_id, label)
            .with_input(InputDescriptor::required(0, "Value"))
            .with_output(OutputDescriptor::new(0, "Value"))
    }

    /// Regular nodes: constants, arithmetic, a sink, a passthrough and a switch
    pub fn test_registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();

        registry.register_blocking(unary("num:const", "Constant"), |inputs| {
            Ok(NodeOutput::Value(inputs[0].clone()))
        });
        registry.register_blocking(
            NodeSchema::new("num:add", "Add")
                .with_input(InputDescriptor::required(0, "A"))
                .with_input(InputDescriptor::required(1, "B"))
                .with_output(OutputDescriptor::new(0, "Sum")),
            |inputs| Ok(json!(int(&inputs[0])? + int(&inputs[1])?).into()),
        );
        registry.register_blocking(
            NodeSchema::new("io:sink", "Sink")
                .with_input(InputDescriptor::required(0, "Value"))
                .with_side_effects(),
            |_| Ok(NodeOutput::Value(Value::Null)),
        );
        registry.register_blocking(
            unary("util:pass", "Pass Through").with_behavior(NodeBehavior::Passthrough),
            |inputs| Ok(NodeOutput::Value(inputs[0].clone())),
        );
        registry.register_blocking(
            NodeSchema::new("util:switch", "Switch")
                .with_input(InputDescriptor::required(0, "Select"))
                .with_input(InputDescriptor::optional(1, "First"))
                .with_input(InputDescriptor::optional(2, "Second"))
                .with_output(OutputDescriptor::new(0, "Value"))
                .with_behavior(NodeBehavior::Switch {
                    selector: InputId(0),
                    branches: vec![InputId(1), InputId(2)],
                }),
            |inputs| {
                let selected = int(&inputs[0])? as usize + 1;
                inputs
                    .get(selected)
                    .cloned()
                    .map(NodeOutput::Value)
                    .ok_or_else(|| NodeError::new("selector out of range"))
            },
        );

        registry
    }

    /// [`test_registry`] plus stream nodes
    pub fn stream_registry() -> NodeRegistry {
        let mut registry = test_registry();

        registry.register_blocking(unary("num:double", "Double"), |inputs| {
            Ok(json!(int(&inputs[0])? * 2).into())
        });
        registry.register_blocking(
            unary("stream:range", "Range").with_kind(NodeKind::Generator),
            |inputs| {
                let count = int(&inputs[0])? as usize;
                Ok(Generator::from_range(count, |i| Ok(json!(i))).into())
            },
        );
        registry.register_blocking(
            NodeSchema::new("stream:checked", "Checked List")
                .with_kind(NodeKind::Generator)
                .with_input(InputDescriptor::required(0, "Values"))
                .with_input(InputDescriptor::optional(1, "Fail Fast"))
                .with_output(OutputDescriptor::new(0, "Value")),
            |inputs| {
                let values = inputs[0].as_array().cloned().unwrap_or_default();
                let fail_fast = inputs[1].as_bool().unwrap_or(true);
                let generator = Generator::from_list(values, |value: Value, _| {
                    if value.is_number() {
                        Ok(value)
                    } else {
                        Err(NodeError::new("value is not a number"))
                    }
                });
                Ok(generator.with_fail_fast(fail_fast).into())
            },
        );
        registry.register_blocking(
            unary("stream:sum", "Sum").with_kind(NodeKind::Collector),
            |_| {
                let collector = Collector::fold(
                    0i64,
                    |sum, item: Value| {
                        *sum += int(&item)?;
                        Ok(())
                    },
                    |sum| Ok(json!(sum)),
                );
                Ok(collector.into())
            },
        );
        registry.register_blocking(
            unary("stream:collect", "Collect").with_kind(NodeKind::Collector),
            |_| {
                let collector = Collector::fold(
                    Vec::new(),
                    |items: &mut Vec<Value>, item| {
                        items.push(item);
                        Ok(())
                    },
                    |items| Ok(Value::Array(items)),
                );
                Ok(collector.into())
            },
        );
        registry.register_blocking(
            unary("stream:evens", "Evens").with_kind(NodeKind::Transformer),
            |_| {
                let transformer =
                    Transformer::filter(|item: &Value| item.as_i64().is_some_and(|x| x % 2 == 0));
                Ok(transformer.into())
            },
        );
        registry.register_blocking(
            unary("stream:spread", "Spread").with_kind(NodeKind::Transformer),
            |_| {
                let transformer = Transformer::new(|item: Value| match item.as_i64() {
                    Some(x) => vec![Ok(json!(x * 10)), Ok(json!(x * 10 + 1))],
                    None => vec![Err(NodeError::new("expected an integer"))],
                });
                Ok(transformer.into())
            },
        );

        registry
    }

    /// [`stream_registry`] plus `io:record`, a side-effecting passthrough
    /// that records every value it sees, and `stream:record`, a collector
    /// that records what it collected
    pub fn recording_registry() -> (NodeRegistry, Recorder) {
        let mut registry = stream_registry();
        let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&recorder);
        registry.register_blocking(
            unary("io:record", "Record").with_side_effects(),
            move |inputs| {
                sink.lock().push(inputs[0].clone());
                Ok(NodeOutput::Value(inputs[0].clone()))
            },
        );

        let collected = Arc::clone(&recorder);
        registry.register_blocking(
            unary("stream:record", "Record All")
                .with_kind(NodeKind::Collector)
                .with_side_effects(),
            move |_| {
                let sink = Arc::clone(&collected);
                let collector = Collector::fold(
                    Vec::new(),
                    |items: &mut Vec<Value>, item| {
                        items.push(item);
                        Ok(())
                    },
                    move |items| {
                        let all = Value::Array(items);
                        sink.lock().push(all.clone());
                        Ok(all)
                    },
                );
                Ok(collector.into())
            },
        );

        (registry, recorder)
    }
}
