//! Chain executor
//!
//! A memoized post-order walk from every execution root: nodes nobody
//! reads and nodes with side effects. Outputs live in an [`OutputCache`] for exactly as many reads as
//! the node has consumers.
//!
//! # Streams
//!
//! A generator's region is driven once: every collector and transformer
//! below it is set up, then for each item a child cache is created, the
//! item is bound as the generator's outputs and every terminal of the
//! region is evaluated against that scope. Transformers open a nested scope
//! per item they emit. After the last item each collector is completed and
//! its result cached in the root scope.
//!
//! # Cancellation
//!
//! The executor checks its [`ProgressController`] before resolving a node's
//! inputs, before invoking its body and before every stream item.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::cache::{get_cache_strategies, CacheStrategy, OutputCache};
use crate::chain::Chain;
use crate::config::ExecutorConfig;
use crate::error::{ChainError, GraphError, NodeExecutionError, Result};
use crate::events::{EventSink, ExecutionEvent, NullEventSink};
use crate::input_map::{InputMap, InputSource};
use crate::lineage::StreamLineage;
use crate::optimizer::optimize;
use crate::progress::ProgressController;
use crate::registry::{NodeContext, NodeOutput, NodeRegistry};
use crate::stream::{Collector, Transformer};
use crate::types::{Node, NodeId, NodeKind, Outputs, Value};
use crate::validation::validate_chain;

type Cache = OutputCache<Outputs>;

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Finished,
    Aborted,
    Failed,
}

/// Summary of a finished execution
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: String,
    /// Number of node body invocations
    pub nodes_executed: usize,
    /// Nodes removed by the optimizer
    pub nodes_removed: usize,
    pub duration_ms: u64,
    pub time_paused_ms: u64,
    /// Outputs of execution roots that declare outputs and run outside a stream
    pub outputs: HashMap<NodeId, Outputs>,
}

/// Runs one chain once
pub struct Executor {
    chain: Chain,
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
    execution_id: String,
    event_sink: Arc<dyn EventSink>,
    progress: Arc<ProgressController>,
    state: Mutex<ExecutionState>,
}

impl Executor {
    pub fn new(chain: Chain, registry: Arc<NodeRegistry>) -> Self {
        Self {
            chain,
            registry,
            config: ExecutorConfig::default(),
            execution_id: format!("exec-{}", uuid::Uuid::new_v4()),
            event_sink: Arc::new(NullEventSink),
            progress: Arc::new(ProgressController::new()),
            state: Mutex::new(ExecutionState::Pending),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Share an externally created progress controller
    pub fn with_progress(mut self, progress: Arc<ProgressController>) -> Self {
        self.progress = progress;
        self
    }

    /// Controller to pause, resume or abort this execution
    pub fn progress(&self) -> Arc<ProgressController> {
        Arc::clone(&self.progress)
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.lock()
    }

    /// Execute the chain
    ///
    /// Validates, optimizes (unless disabled) and runs the chain. An
    /// executor runs at most once.
    pub async fn run(&self) -> Result<ExecutionReport> {
        {
            let mut state = self.state.lock();
            if *state != ExecutionState::Pending {
                return Err(ChainError::AlreadyStarted);
            }
            *state = ExecutionState::Running;
        }

        let started = Instant::now();
        let mut result = self.execute(started).await;
        if result.is_ok() && self.progress.is_aborted() {
            result = Err(ChainError::Aborted);
        }

        let final_state = match &result {
            Ok(_) => ExecutionState::Finished,
            Err(err) if err.is_aborted() => ExecutionState::Aborted,
            Err(_) => ExecutionState::Failed,
        };
        *self.state.lock() = final_state;

        match &result {
            Ok(report) => {
                log::info!(
                    "Execution '{}' finished: {} nodes in {}ms",
                    self.execution_id,
                    report.nodes_executed,
                    report.duration_ms
                );
                self.emit(ExecutionEvent::ExecutionFinished {
                    execution_id: self.execution_id.clone(),
                    duration_ms: report.duration_ms,
                });
            }
            Err(err) if err.is_aborted() => {
                log::info!("Execution '{}' aborted", self.execution_id);
                self.emit(ExecutionEvent::ExecutionAborted {
                    execution_id: self.execution_id.clone(),
                });
            }
            Err(err) => log::error!("Execution '{}' failed: {}", self.execution_id, err),
        }
        result
    }

    async fn execute(&self, started: Instant) -> Result<ExecutionReport> {
        let mut chain = self.chain.clone();
        if let Some(err) = validate_chain(&chain, Some(&self.registry)).into_iter().next() {
            return Err(err.into());
        }
        let nodes_removed = if self.config.optimize {
            optimize(&mut chain)?
        } else {
            0
        };

        let run = ExecutionRun::prepare(self, chain)?;
        self.emit(ExecutionEvent::ExecutionStarted {
            execution_id: self.execution_id.clone(),
            node_count: run.chain.len(),
        });
        log::info!(
            "Execution '{}' started with {} nodes",
            self.execution_id,
            run.chain.len()
        );

        let outputs = run.walk_roots().await?;

        Ok(ExecutionReport {
            execution_id: self.execution_id.clone(),
            nodes_executed: run.nodes_executed.load(Ordering::Relaxed),
            nodes_removed,
            duration_ms: started.elapsed().as_millis() as u64,
            time_paused_ms: self.progress.time_paused().as_millis() as u64,
            outputs,
        })
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("Failed to send execution event: {}", e);
        }
    }
}

/// Collectors and transformers of the region being driven
#[derive(Default)]
struct Region {
    collectors: HashMap<NodeId, Collector<Value, Value>>,
    transformers: HashMap<NodeId, Transformer<Value>>,
}

/// Per-execution state
struct ExecutionRun<'a> {
    executor: &'a Executor,
    chain: Chain,
    inputs: InputMap,
    strategies: HashMap<NodeId, CacheStrategy>,
    lineage: StreamLineage,
    root_cache: Arc<Cache>,
    /// Generators whose region has been driven
    driven: Mutex<HashSet<NodeId>>,
    /// Results of collectors nobody reads
    sink_outputs: Mutex<HashMap<NodeId, Outputs>>,
    nodes_executed: AtomicUsize,
}

impl<'a> ExecutionRun<'a> {
    fn prepare(executor: &'a Executor, chain: Chain) -> Result<Self> {
        let inputs = InputMap::build(&chain)?;
        let strategies = get_cache_strategies(&chain);
        let lineage = StreamLineage::analyze(&chain)?;
        Ok(Self {
            executor,
            chain,
            inputs,
            strategies,
            lineage,
            root_cache: Arc::new(OutputCache::new()),
            driven: Mutex::new(HashSet::new()),
            sink_outputs: Mutex::new(HashMap::new()),
            nodes_executed: AtomicUsize::new(0),
        })
    }

    /// Evaluate every execution root in topological order
    ///
    /// Side-effect nodes are roots even when something reads them, so they
    /// run whether or not a consumer ever asks for their outputs.
    async fn walk_roots(&self) -> Result<HashMap<NodeId, Outputs>> {
        let roots: Vec<NodeId> = self
            .chain
            .topological_order()?
            .into_iter()
            .filter(|id| {
                self.chain.out_degree(id) == 0
                    || self.chain.node(id).is_some_and(|node| node.side_effects)
            })
            .collect();

        let mut outputs = HashMap::new();
        for root_id in roots {
            let node = self.node(&root_id)?;
            let driving = self.lineage.driving_generator(&root_id).cloned();

            match (node.kind, driving) {
                (NodeKind::Generator, _) => self.drive(root_id).await?,
                (NodeKind::Regular | NodeKind::Transformer, Some(generator)) => {
                    self.drive(generator).await?
                }
                _ => {
                    let result = self
                        .evaluate(root_id.clone(), Arc::clone(&self.root_cache))
                        .await?;
                    if !node.outputs.is_empty() && self.chain.out_degree(&root_id) == 0 {
                        outputs.insert(root_id, result);
                    }
                }
            }
        }
        Ok(outputs)
    }

    /// Outputs of a node, computing it if no cached value is visible
    fn evaluate(&self, node_id: NodeId, scope: Arc<Cache>) -> BoxFuture<'_, Result<Outputs>> {
        async move {
            let node = self.node(&node_id)?;
            // Nodes outside any stream always live in the root scope
            let cache = if self.lineage.output_lineage(&node_id).is_none() {
                Arc::clone(&self.root_cache)
            } else {
                Arc::clone(&scope)
            };

            if let Some(outputs) = cache.get(&node_id) {
                return Ok(outputs);
            }

            match node.kind {
                NodeKind::Regular => {}
                NodeKind::Collector => return self.collected(node).await,
                NodeKind::Generator | NodeKind::Transformer => {
                    return Err(self.fail(NodeExecutionError::new(
                        node.id.clone(),
                        node.schema_id.clone(),
                        Vec::new(),
                        "stream output read outside of its iteration",
                    )));
                }
            }

            self.executor.progress.suspend().await?;
            let inputs = self.resolve_inputs(node, &scope, false).await?;
            let output = self.invoke(node, inputs.clone()).await?;
            let outputs = self.normalize(node, output, &inputs)?;

            cache.set(node_id.clone(), Arc::clone(&outputs), self.strategy(&node_id));
            Ok(cache.get(&node_id).unwrap_or(outputs))
        }
        .boxed()
    }

    /// Result of a collector, driving its generator first
    async fn collected(&self, node: &Node) -> Result<Outputs> {
        if let Some(generator) = self.lineage.driving_generator(&node.id).cloned() {
            self.drive(generator).await?;
        }
        if let Some(outputs) = self.root_cache.get(&node.id) {
            return Ok(outputs);
        }
        if let Some(outputs) = self.sink_outputs.lock().get(&node.id) {
            return Ok(Arc::clone(outputs));
        }
        Err(self.fail(NodeExecutionError::new(
            node.id.clone(),
            node.schema_id.clone(),
            Vec::new(),
            "collector produced no result",
        )))
    }

    /// Drive a generator's region to exhaustion
    fn drive(&self, generator_id: NodeId) -> BoxFuture<'_, Result<()>> {
        async move {
            if !self.driven.lock().insert(generator_id.clone()) {
                return Ok(());
            }
            let node = self.node(&generator_id)?;

            let mut region = Region::default();
            for stream_node_id in self.lineage.stream_nodes(&generator_id) {
                let stream_node = self.node(stream_node_id)?;
                let inputs = self
                    .resolve_inputs(stream_node, &self.root_cache, true)
                    .await?;
                match self.invoke(stream_node, inputs.clone()).await? {
                    NodeOutput::Collector(collector) if stream_node.kind == NodeKind::Collector => {
                        region.collectors.insert(stream_node_id.clone(), collector);
                    }
                    NodeOutput::Transformer(transformer)
                        if stream_node.kind == NodeKind::Transformer =>
                    {
                        region.transformers.insert(stream_node_id.clone(), transformer);
                    }
                    other => {
                        return Err(self.fail(self.node_error(
                            stream_node,
                            &inputs,
                            format!("expected a {:?} body, got {}", stream_node.kind, other.kind_name()),
                        )));
                    }
                }
            }

            self.executor.progress.suspend().await?;
            let inputs = self.resolve_inputs(node, &self.root_cache, false).await?;
            let generator = match self.invoke(node, inputs.clone()).await? {
                NodeOutput::Generator(generator) => generator,
                other => {
                    return Err(self.fail(self.node_error(
                        node,
                        &inputs,
                        format!("expected a generator, got {}", other.kind_name()),
                    )));
                }
            };

            let length = generator.expected_length;
            log::debug!("Driving '{}' over {} items", generator_id, length);

            let mut errors = Vec::new();
            for (index, item) in generator.iter().enumerate() {
                self.executor.progress.suspend().await?;

                let result = match item {
                    Ok(value) => {
                        self.run_item(&generator_id, value, Arc::clone(&self.root_cache), &mut region)
                            .await
                    }
                    Err(err) => Err(self.fail(self.node_error(
                        node,
                        &inputs,
                        format!("item {}: {}", index, err),
                    ))),
                };

                match result {
                    Ok(()) => {}
                    Err(ChainError::Node(err)) if !generator.fail_fast => {
                        log::warn!("Item {} of '{}' failed, continuing: {}", index, generator_id, err);
                        errors.push(*err);
                    }
                    Err(err) => return Err(err),
                }

                if self.executor.config.item_progress {
                    self.executor.emit(ExecutionEvent::node_progress(
                        &self.executor.execution_id,
                        &generator_id,
                        index,
                        length,
                    ));
                }
            }

            // Collectors finish with whatever the surviving items gave them
            let completed = self.complete_collectors(&generator_id, region);
            if errors.is_empty() {
                return completed;
            }
            match completed {
                Ok(()) => {}
                Err(ChainError::Node(err)) => errors.push(*err),
                Err(err) => return Err(err),
            }
            Err(ChainError::Iteration {
                node_id: generator_id,
                errors,
            })
        }
        .boxed()
    }

    /// Finalize every collector of a driven region and store its result
    fn complete_collectors(&self, generator_id: &str, mut region: Region) -> Result<()> {
        for collector_id in self.lineage.stream_nodes(generator_id) {
            let Some(collector) = region.collectors.remove(collector_id) else {
                continue;
            };
            let collector_node = self.node(collector_id)?;
            let value = collector
                .on_complete()
                .map_err(|err| self.fail(self.node_error(collector_node, &[], err.message)))?;
            let outputs = self.normalize(collector_node, NodeOutput::Value(value), &[])?;

            let strategy = self.strategy(collector_id);
            if strategy.no_caching() {
                self.sink_outputs.lock().insert(collector_id.clone(), outputs);
            } else {
                self.root_cache.set(collector_id.clone(), outputs, strategy);
            }
        }
        Ok(())
    }

    /// Process one item emitted by a stream source
    fn run_item<'s>(
        &'s self,
        source_id: &'s str,
        value: Value,
        parent: Arc<Cache>,
        region: &'s mut Region,
    ) -> BoxFuture<'s, Result<()>> {
        async move {
            let source = self.node(source_id)?;
            let scope = parent.child();
            let item = self.normalize(source, NodeOutput::Value(value), &[])?;
            scope.set(source_id, item, self.strategy(source_id));

            for terminal_id in self.lineage.terminals(source_id) {
                let terminal = self.node(terminal_id)?;
                match terminal.kind {
                    NodeKind::Regular => {
                        self.evaluate(terminal_id.clone(), Arc::clone(&scope)).await?;
                    }
                    NodeKind::Collector => {
                        let item = self.iterated_value(terminal, &scope).await?;
                        let collector = region.collectors.get_mut(terminal_id).ok_or_else(|| {
                            self.fail(self.node_error(terminal, &[], "collector was not set up"))
                        })?;
                        collector.on_iterate(item.clone()).map_err(|err| {
                            self.fail(self.node_error(terminal, &[item], err.message))
                        })?;
                    }
                    NodeKind::Transformer => {
                        let item = self.iterated_value(terminal, &scope).await?;
                        let transformer =
                            region.transformers.get(terminal_id).cloned().ok_or_else(|| {
                                self.fail(self.node_error(terminal, &[], "transformer was not set up"))
                            })?;
                        for produced in transformer.apply(item.clone()) {
                            match produced {
                                Ok(value) => {
                                    self.run_item(terminal_id, value, Arc::clone(&scope), &mut *region)
                                        .await?
                                }
                                Err(err) => {
                                    return Err(self.fail(self.node_error(
                                        terminal,
                                        &[item],
                                        err.message,
                                    )));
                                }
                            }
                        }
                    }
                    NodeKind::Generator => {
                        return Err(GraphError::NestedGenerator {
                            node_id: terminal_id.clone(),
                        }
                        .into());
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Resolve a node's inputs in slot order
    ///
    /// With `skip_iterated`, inputs carrying stream items resolve to `null`.
    async fn resolve_inputs(
        &self,
        node: &Node,
        scope: &Arc<Cache>,
        skip_iterated: bool,
    ) -> Result<Vec<Value>> {
        let sources = self.inputs.get(&node.id);
        let mut values = Vec::with_capacity(sources.len());

        for source in sources {
            let value = match source {
                InputSource::Edge {
                    from_node,
                    from_index,
                } => {
                    if skip_iterated && self.lineage.is_iterated_source(from_node) {
                        Value::Null
                    } else {
                        let outputs = self.evaluate(from_node.clone(), Arc::clone(scope)).await?;
                        match outputs.get(*from_index) {
                            Some(value) => value.clone(),
                            None => {
                                let mut snapshot: Vec<Option<Value>> =
                                    values.into_iter().map(Some).collect();
                                snapshot.resize(sources.len(), None);
                                return Err(self.fail(NodeExecutionError::new(
                                    node.id.clone(),
                                    node.schema_id.clone(),
                                    snapshot,
                                    format!("'{}' has no output at position {}", from_node, from_index),
                                )));
                            }
                        }
                    }
                }
                InputSource::Value(value) => value.clone(),
                InputSource::Unset => Value::Null,
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Current item of a collector or transformer
    ///
    /// A single iterated input is passed as is; several are packed into an
    /// array in slot order.
    async fn iterated_value(&self, node: &Node, scope: &Arc<Cache>) -> Result<Value> {
        let mut items = Vec::new();
        for source in self.inputs.get(&node.id) {
            if let InputSource::Edge {
                from_node,
                from_index,
            } = source
            {
                if self.lineage.is_iterated_source(from_node) {
                    let outputs = self.evaluate(from_node.clone(), Arc::clone(scope)).await?;
                    items.push(outputs.get(*from_index).cloned().unwrap_or(Value::Null));
                }
            }
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Value::Array(items))
        }
    }

    /// Invoke a node body
    async fn invoke(&self, node: &Node, inputs: Vec<Value>) -> Result<NodeOutput> {
        self.executor.progress.suspend().await?;

        let body = self.executor.registry.body(&node.schema_id).ok_or_else(|| {
            self.fail(self.node_error(
                node,
                &inputs,
                format!("no body registered for schema '{}'", node.schema_id),
            ))
        })?;

        self.executor.emit(ExecutionEvent::NodeStarted {
            execution_id: self.executor.execution_id.clone(),
            node_id: node.id.clone(),
            schema_id: node.schema_id.clone(),
        });
        log::debug!("Running node '{}' ({})", node.id, node.schema_id);

        let ctx = NodeContext {
            node_id: node.id.clone(),
            schema_id: node.schema_id.clone(),
            execution_id: self.executor.execution_id.clone(),
            progress: Arc::clone(&self.executor.progress),
        };
        let started = Instant::now();
        let result = body.run(&ctx, inputs.clone()).await;
        self.nodes_executed.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(output) => {
                self.executor.emit(ExecutionEvent::NodeFinished {
                    execution_id: self.executor.execution_id.clone(),
                    node_id: node.id.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(output)
            }
            Err(err) => Err(self.fail(self.node_error(node, &inputs, err.message))),
        }
    }

    /// Shape a body result into one value per declared output
    fn normalize(&self, node: &Node, output: NodeOutput, inputs: &[Value]) -> Result<Outputs> {
        let arity = node.outputs.len();
        let values = match output {
            NodeOutput::Value(_) if arity == 0 => Vec::new(),
            NodeOutput::Value(value) if arity == 1 => vec![value],
            NodeOutput::Value(Value::Array(values)) if values.len() == arity => values,
            NodeOutput::Tuple(values) if values.len() == arity => values,
            other => {
                let shape = match &other {
                    NodeOutput::Tuple(values) => format!("{} values", values.len()),
                    NodeOutput::Value(_) => "a single value".to_string(),
                    stream => format!("a {}", stream.kind_name()),
                };
                return Err(self.fail(self.node_error(
                    node,
                    inputs,
                    format!("expected {} outputs, body returned {}", arity, shape),
                )));
            }
        };
        Ok(Outputs::from(values))
    }

    fn node(&self, node_id: &str) -> Result<&Node> {
        self.chain
            .node(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()).into())
    }

    fn strategy(&self, node_id: &str) -> CacheStrategy {
        self.strategies
            .get(node_id)
            .copied()
            .unwrap_or(CacheStrategy::NO_CACHING)
    }

    fn node_error(
        &self,
        node: &Node,
        inputs: &[Value],
        message: impl Into<String>,
    ) -> NodeExecutionError {
        NodeExecutionError::new(
            node.id.clone(),
            node.schema_id.clone(),
            inputs.iter().cloned().map(Some).collect(),
            message,
        )
    }

    /// Report a node failure and turn it into an execution error
    fn fail(&self, error: NodeExecutionError) -> ChainError {
        log::error!("{}", error);
        self.executor.emit(ExecutionEvent::execution_error(
            &self.executor.execution_id,
            &error,
        ));
        error.into()
    }
}
