//! Node registry
//!
//! Maps schema ids to their [`NodeSchema`] and the [`NodeBody`] that
//! implements them. The registry is an ordinary value: build one, hand it
//! to the executor, merge others into it for plugin catalogs.
//!
//! # Usage
//!
//! ```ignore
//! use chain_engine::{NodeRegistry, NodeOutput, NodeSchema};
//!
//! let mut registry = NodeRegistry::new();
//! registry.register_blocking(double_schema(), |inputs| {
//!     let x = inputs[0].as_i64().unwrap_or_default();
//!     Ok(NodeOutput::Value((x * 2).into()))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::NodeError;
use crate::progress::ProgressController;
use crate::schema::NodeSchema;
use crate::stream::{Collector, Generator, Transformer};
use crate::types::{NodeId, Value};

/// What a node body hands back to the executor
#[derive(Debug)]
pub enum NodeOutput {
    /// Single value; split across outputs when the node declares several
    Value(Value),
    /// One value per declared output
    Tuple(Vec<Value>),
    Generator(Generator<Value>),
    Collector(Collector<Value, Value>),
    Transformer(Transformer<Value>),
}

impl NodeOutput {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Tuple(_) => "tuple",
            Self::Generator(_) => "generator",
            Self::Collector(_) => "collector",
            Self::Transformer(_) => "transformer",
        }
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Generator<Value>> for NodeOutput {
    fn from(generator: Generator<Value>) -> Self {
        Self::Generator(generator)
    }
}

impl From<Collector<Value, Value>> for NodeOutput {
    fn from(collector: Collector<Value, Value>) -> Self {
        Self::Collector(collector)
    }
}

impl From<Transformer<Value>> for NodeOutput {
    fn from(transformer: Transformer<Value>) -> Self {
        Self::Transformer(transformer)
    }
}

/// Execution context passed to every body invocation
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub schema_id: String,
    pub execution_id: String,
    /// Long-running bodies may call `suspend` to honour pause and abort
    pub progress: Arc<ProgressController>,
}

/// Implementation of one node schema
#[async_trait]
pub trait NodeBody: Send + Sync {
    /// Run the node with one value per declared input, in slot order
    async fn run(&self, ctx: &NodeContext, inputs: Vec<Value>) -> Result<NodeOutput, NodeError>;
}

/// A registration entry combining a schema with an optional body
struct RegistryEntry {
    schema: NodeSchema,
    body: Option<Arc<dyn NodeBody>>,
}

/// Registry of node schemas and their bodies
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a schema with its body
    pub fn register(&mut self, schema: NodeSchema, body: Arc<dyn NodeBody>) {
        self.entries.insert(
            schema.schema_id.clone(),
            RegistryEntry {
                schema,
                body: Some(body),
            },
        );
    }

    /// Register a schema backed by an async callback
    pub fn register_fn<F, Fut>(&mut self, schema: NodeSchema, callback: F)
    where
        F: Fn(NodeContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutput, NodeError>> + Send + 'static,
    {
        let body = Arc::new(CallbackNodeBody {
            callback: Box::new(move |ctx, inputs| Box::pin(callback(ctx, inputs))),
        });
        self.register(schema, body);
    }

    /// Register a schema backed by a synchronous function
    ///
    /// The function runs on tokio's blocking pool.
    pub fn register_blocking<F>(&mut self, schema: NodeSchema, function: F)
    where
        F: Fn(Vec<Value>) -> Result<NodeOutput, NodeError> + Send + Sync + 'static,
    {
        let body = Arc::new(BlockingNodeBody {
            function: Arc::new(function),
        });
        self.register(schema, body);
    }

    /// Register a schema without a body (listing or validation only)
    pub fn register_schema(&mut self, schema: NodeSchema) {
        self.entries.insert(
            schema.schema_id.clone(),
            RegistryEntry { schema, body: None },
        );
    }

    pub fn schema(&self, schema_id: &str) -> Option<&NodeSchema> {
        self.entries.get(schema_id).map(|e| &e.schema)
    }

    pub fn body(&self, schema_id: &str) -> Option<Arc<dyn NodeBody>> {
        self.entries
            .get(schema_id)
            .and_then(|e| e.body.as_ref())
            .map(Arc::clone)
    }

    pub fn has_schema(&self, schema_id: &str) -> bool {
        self.entries.contains_key(schema_id)
    }

    /// All registered schema ids, sorted
    pub fn schema_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn all_schemas(&self) -> Vec<&NodeSchema> {
        self.entries.values().map(|e| &e.schema).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` with the same schema id.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedBodyFuture = Pin<Box<dyn Future<Output = Result<NodeOutput, NodeError>> + Send>>;

/// Async callback wrapped as a body
struct CallbackNodeBody {
    callback: Box<dyn Fn(NodeContext, Vec<Value>) -> BoxedBodyFuture + Send + Sync>,
}

#[async_trait]
impl NodeBody for CallbackNodeBody {
    async fn run(&self, ctx: &NodeContext, inputs: Vec<Value>) -> Result<NodeOutput, NodeError> {
        (self.callback)(ctx.clone(), inputs).await
    }
}

type BlockingFn = dyn Fn(Vec<Value>) -> Result<NodeOutput, NodeError> + Send + Sync;

/// Synchronous function wrapped as a body
struct BlockingNodeBody {
    function: Arc<BlockingFn>,
}

#[async_trait]
impl NodeBody for BlockingNodeBody {
    async fn run(&self, ctx: &NodeContext, inputs: Vec<Value>) -> Result<NodeOutput, NodeError> {
        let function = Arc::clone(&self.function);
        tokio::task::spawn_blocking(move || function(inputs))
            .await
            .map_err(|e| NodeError::new(format!("Node '{}' panicked: {}", ctx.node_id, e)))?
    }
}
