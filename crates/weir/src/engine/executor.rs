//! The scheduler: instantiates nodes, wires pipes, and supervises workers.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::report::NodeCounters;
use super::{EngineConfig, PipelineContext, RunReport};
use crate::definition::{NodeId, NodeKind, PipelineGraph};
use crate::error::{Error, Result};
use crate::handler::{
    BoundedDeadLetterSink, FailFastHandler, FailPipelineHandler, ItemErrorHandler, NodeRef,
    PipelineDecision, PipelineErrorHandler, TracingDeadLetterSink,
};
use crate::node::{NodeFactory, NodeInstance};
use crate::observe::{NodeMetricsSink, ResolvedSinks};
use crate::pipe::{DataPipe, Item, merge, pump};
use crate::strategy::{self, NodeRuntime};

/// Tracing target for scheduler operations.
const TRACING_TARGET: &str = "weir::engine";

pub(crate) struct Executor {
    pub(crate) graph: Arc<PipelineGraph>,
    pub(crate) ctx: PipelineContext,
    pub(crate) factory: Arc<dyn NodeFactory>,
    pub(crate) config: EngineConfig,
}

impl Executor {
    pub(crate) async fn execute(self) -> Result<RunReport> {
        let Self {
            graph,
            ctx,
            factory,
            config,
        } = self;

        let started_at = Timestamp::now();
        let sinks = ResolvedSinks::resolve(ctx.observability_factory().as_ref());
        if let Some(metrics) = &sinks.pipeline_metrics {
            metrics.run_started(ctx.run_id());
        }
        if let Some(lineage) = &sinks.pipeline_lineage {
            lineage.run_structure(ctx.run_id(), &graph.summary());
        }

        let pipeline_handler: Arc<dyn PipelineErrorHandler> = ctx
            .pipeline_error_handler()
            .or_else(|| graph.pipeline_handler())
            .or_else(|| {
                ctx.error_handler_factory()
                    .and_then(|f| f.pipeline_handler())
            })
            .unwrap_or_else(|| Arc::new(FailPipelineHandler));

        let dead_letter_sink = ctx
            .dead_letter_sink()
            .or_else(|| graph.dead_letter())
            .unwrap_or_else(|| Arc::new(TracingDeadLetterSink));
        let dead_letter = Arc::new(BoundedDeadLetterSink::new(
            dead_letter_sink,
            graph.options().dead_letter_capacity,
        ));

        let counters: HashMap<NodeId, Arc<NodeCounters>> = graph
            .nodes()
            .map(|node| (node.id(), Arc::new(NodeCounters::default())))
            .collect();

        let order = graph.topological_order()?;
        tracing::debug!(
            target: TRACING_TARGET,
            run_id = %ctx.run_id(),
            node_count = order.len(),
            "Starting pipeline execution"
        );

        // One bounded channel per edge; workers of upstream nodes feed the
        // senders, downstream nodes consume the receivers. Keyed by the
        // edge's index in declaration order.
        let mut edge_pipes: HashMap<usize, DataPipe> = HashMap::new();
        let mut workers: JoinSet<(NodeId, Result<()>)> = JoinSet::new();

        for node_id in order {
            let node = graph
                .node(node_id)
                .ok_or_else(|| Error::Internal(format!("node {node_id} missing from graph")))?;
            let node_counters = counters
                .get(&node_id)
                .expect("counters exist for every node")
                .clone();

            // Bounded output channel per outgoing edge.
            let mut edge_txs: Vec<mpsc::Sender<Item>> = Vec::new();
            for (index, _) in graph
                .edges()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.from == node_id)
            {
                let element = node.output().ok_or_else(|| {
                    Error::Internal(format!("node {node_id} has outgoing edges but no output"))
                })?;
                let (tx, rx) = mpsc::channel(config.channel_capacity);
                edge_pipes.insert(index, DataPipe::from_channel(element, rx));
                edge_txs.push(tx);
            }

            // Input pipes, in edge declaration order.
            let mut left_inputs: Vec<DataPipe> = Vec::new();
            let mut right_inputs: Vec<DataPipe> = Vec::new();
            for (index, edge) in graph
                .edges()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.to == node_id)
            {
                let pipe = edge_pipes.remove(&index).ok_or_else(|| {
                    Error::Internal(format!("edge {index} has no wired pipe"))
                })?;
                if node.kind() == NodeKind::Join && edge.targets_join_right() {
                    right_inputs.push(pipe);
                } else {
                    left_inputs.push(pipe);
                }
            }

            match node.kind() {
                NodeKind::Source => {
                    let ctx = ctx.clone();
                    let graph = graph.clone();
                    let factory = factory.clone();
                    let metrics = sinks.node_metrics.clone();
                    let name = node.name().to_owned();
                    workers.spawn(async move {
                        ctx.set_current_node(Some(node_id));
                        let result = run_source(
                            node_id, &name, &ctx, &graph, &factory, node_counters, metrics,
                            edge_txs,
                        )
                        .await;
                        (node_id, result)
                    });
                }
                NodeKind::Transform if node.is_pipe_based() => {
                    let input = merged_input(
                        left_inputs,
                        node,
                        &node_counters,
                        &sinks.node_metrics,
                        &ctx,
                    )?;
                    let ctx = ctx.clone();
                    let graph = graph.clone();
                    let factory = factory.clone();
                    let metrics = sinks.node_metrics.clone();
                    let name = node.name().to_owned();
                    workers.spawn(async move {
                        ctx.set_current_node(Some(node_id));
                        let result = run_pipe_transform(
                            node_id, &name, &ctx, &graph, &factory, node_counters, metrics,
                            input, edge_txs,
                        )
                        .await;
                        (node_id, result)
                    });
                }
                NodeKind::Transform => {
                    let handler: Arc<dyn ItemErrorHandler> = node
                        .error_handler()
                        .or_else(|| {
                            ctx.error_handler_factory().and_then(|f| {
                                f.node_handler(NodeRef {
                                    id: node_id,
                                    name: node.name(),
                                })
                            })
                        })
                        .unwrap_or_else(|| Arc::new(FailFastHandler));
                    let rt = Arc::new(NodeRuntime {
                        node_id,
                        name: node.name().to_owned(),
                        ctx: ctx.clone(),
                        graph: graph.clone(),
                        factory: factory.clone(),
                        counters: node_counters,
                        metrics: sinks.node_metrics.clone(),
                        lineage: sinks.item_lineage.clone(),
                        pipeline_metrics: sinks.pipeline_metrics.clone(),
                        handler,
                        pipeline_handler: pipeline_handler.clone(),
                        dead_letter: dead_letter.clone(),
                        retry: graph.effective_retry(node_id),
                    });
                    let kind = node.strategy().clone();
                    let input = merge(left_inputs, node.options().merge_order, &ctx)?;
                    let fan_out_capacity = config.fan_out_capacity;
                    let ctx = ctx.clone();
                    workers.spawn(async move {
                        ctx.set_current_node(Some(node_id));
                        let result =
                            run_item_transform(rt, kind, input, edge_txs, fan_out_capacity).await;
                        (node_id, result)
                    });
                }
                NodeKind::Join => {
                    let left = merged_input(
                        left_inputs,
                        node,
                        &node_counters,
                        &sinks.node_metrics,
                        &ctx,
                    )?;
                    let right = merge_pipes_counted(
                        right_inputs,
                        node,
                        &node_counters,
                        &sinks.node_metrics,
                        &ctx,
                    )?;
                    let ctx = ctx.clone();
                    let graph = graph.clone();
                    let factory = factory.clone();
                    let metrics = sinks.node_metrics.clone();
                    let name = node.name().to_owned();
                    workers.spawn(async move {
                        ctx.set_current_node(Some(node_id));
                        let result = run_join(
                            node_id, &name, &ctx, &graph, &factory, node_counters, metrics,
                            left, right, edge_txs,
                        )
                        .await;
                        (node_id, result)
                    });
                }
                NodeKind::Sink => {
                    let input = merged_input(
                        left_inputs,
                        node,
                        &node_counters,
                        &sinks.node_metrics,
                        &ctx,
                    )?;
                    let ctx = ctx.clone();
                    let graph = graph.clone();
                    let factory = factory.clone();
                    let name = node.name().to_owned();
                    workers.spawn(async move {
                        ctx.set_current_node(Some(node_id));
                        let result =
                            run_sink(node_id, &name, &ctx, &graph, &factory, input).await;
                        (node_id, result)
                    });
                }
            }
        }

        // Supervise: resolve node-fatal failures through the pipeline
        // handler; resilient nodes consulted it already.
        let mut fatal: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            let (node_id, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    if fatal.is_none() {
                        fatal = Some(Error::Internal(format!("node worker panicked: {join_err}")));
                    }
                    ctx.cancel();
                    continue;
                }
            };
            let Err(err) = result else { continue };
            if err.is_cancelled() {
                continue;
            }

            let is_resilient = graph
                .node(node_id)
                .map(|n| n.strategy().is_resilient())
                .unwrap_or(false);
            if is_resilient {
                // The resilient runner already exhausted its options.
                tracing::error!(
                    target: TRACING_TARGET,
                    node_id = %node_id,
                    error = %err,
                    "Resilient node failed, failing pipeline"
                );
                if fatal.is_none() {
                    fatal = Some(err);
                }
                ctx.cancel();
                continue;
            }

            match pipeline_handler
                .handle_node_failure(node_id, &err, &ctx)
                .await
            {
                PipelineDecision::ContinueWithoutNode => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        node_id = %node_id,
                        error = %err,
                        "Node terminated, pipeline continues without it"
                    );
                }
                PipelineDecision::RestartNode => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        node_id = %node_id,
                        "RestartNode requested for a non-resilient node, failing pipeline"
                    );
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                    ctx.cancel();
                }
                PipelineDecision::FailPipeline => {
                    tracing::error!(
                        target: TRACING_TARGET,
                        node_id = %node_id,
                        error = %err,
                        "Pipeline failed at node"
                    );
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                    ctx.cancel();
                }
            }
        }

        ctx.set_current_node(None);
        let cancelled = ctx.is_cancelled();
        let dispose_result = ctx.dispose().await;
        let finished_at = Timestamp::now();

        let report = RunReport {
            run_id: ctx.run_id(),
            started_at,
            finished_at,
            success: fatal.is_none() && !cancelled,
            nodes: graph
                .nodes()
                .map(|node| {
                    counters
                        .get(&node.id())
                        .expect("counters exist for every node")
                        .snapshot(node.id(), node.name().to_owned())
                })
                .collect(),
            dead_letters: dead_letter.used() as u64,
        };
        if let Some(metrics) = &sinks.pipeline_metrics {
            metrics.run_finished(&report);
        }
        tracing::debug!(
            target: TRACING_TARGET,
            run_id = %ctx.run_id(),
            success = report.success,
            "Pipeline execution finished"
        );

        if let Some(err) = fatal {
            if let Err(dispose_err) = dispose_result {
                tracing::warn!(
                    target: TRACING_TARGET,
                    error = %dispose_err,
                    "Disposal failed while handling a pipeline failure"
                );
            }
            return Err(err);
        }
        if cancelled {
            if let Err(dispose_err) = dispose_result {
                tracing::warn!(
                    target: TRACING_TARGET,
                    error = %dispose_err,
                    "Disposal failed during cancellation"
                );
            }
            return Err(Error::Cancelled);
        }
        dispose_result?;
        Ok(report)
    }
}

/// Attaches node context to failures raised inside user implementations.
fn node_failure(node_id: NodeId, name: &str, err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        Error::User(source) => match source.downcast::<Error>() {
            Ok(inner) if inner.is_cancelled() => Error::Cancelled,
            Ok(inner) => Error::NodeFailed {
                node_id,
                name: name.to_owned(),
                source: inner,
            },
            Err(source) => Error::NodeFailed {
                node_id,
                name: name.to_owned(),
                source,
            },
        },
        other => other,
    }
}

/// Merges a node's inbound pipes and counts intake items.
fn merged_input(
    pipes: Vec<DataPipe>,
    node: &crate::definition::NodeDefinition,
    counters: &Arc<NodeCounters>,
    metrics: &Option<Arc<dyn NodeMetricsSink>>,
    ctx: &PipelineContext,
) -> Result<DataPipe> {
    let merged = merge(pipes, node.options().merge_order, ctx)?;
    // Item transforms count intake in the strategy dispatcher instead.
    if node.kind() == NodeKind::Transform && !node.is_pipe_based() {
        return Ok(merged);
    }
    Ok(counting_pipe(
        merged,
        node.id(),
        counters.clone(),
        metrics.clone(),
        ctx,
    ))
}

/// Same as [`merged_input`], for a join's secondary side.
fn merge_pipes_counted(
    pipes: Vec<DataPipe>,
    node: &crate::definition::NodeDefinition,
    counters: &Arc<NodeCounters>,
    metrics: &Option<Arc<dyn NodeMetricsSink>>,
    ctx: &PipelineContext,
) -> Result<DataPipe> {
    let merged = merge(pipes, node.options().merge_order, ctx)?;
    Ok(counting_pipe(
        merged,
        node.id(),
        counters.clone(),
        metrics.clone(),
        ctx,
    ))
}

fn counting_pipe(
    mut pipe: DataPipe,
    node_id: NodeId,
    counters: Arc<NodeCounters>,
    metrics: Option<Arc<dyn NodeMetricsSink>>,
    ctx: &PipelineContext,
) -> DataPipe {
    let element = pipe.element();
    let ctx = ctx.clone();
    DataPipe::from_stream(
        element,
        stream! {
            while let Some(next) = pipe.next(&ctx).await {
                if next.is_ok() {
                    counters.item_in();
                    if let Some(metrics) = &metrics {
                        metrics.item_in(node_id);
                    }
                }
                yield next;
            }
        }
        .boxed(),
    )
}

#[allow(clippy::too_many_arguments)]
async fn run_source(
    node_id: NodeId,
    name: &str,
    ctx: &PipelineContext,
    graph: &Arc<PipelineGraph>,
    factory: &Arc<dyn NodeFactory>,
    counters: Arc<NodeCounters>,
    metrics: Option<Arc<dyn NodeMetricsSink>>,
    edge_txs: Vec<mpsc::Sender<Item>>,
) -> Result<()> {
    let definition = graph
        .node(node_id)
        .ok_or_else(|| Error::Internal(format!("node {node_id} missing from graph")))?;
    let instance = factory.create(definition, graph)?;
    let NodeInstance::Source(mut source) = instance else {
        return Err(Error::Internal(format!(
            "factory produced a non-source instance for source {name}"
        )));
    };
    let pipe = source
        .initialize(ctx)
        .await
        .map_err(|e| node_failure(node_id, name, e))?;
    pump(pipe, edge_txs, ctx, |_| {
        counters.item_out();
        if let Some(metrics) = &metrics {
            metrics.item_out(node_id);
        }
    })
    .await
    .map_err(|e| node_failure(node_id, name, e))
}

async fn run_item_transform(
    rt: Arc<NodeRuntime>,
    kind: crate::strategy::ExecutionStrategyKind,
    input: DataPipe,
    edge_txs: Vec<mpsc::Sender<Item>>,
    fan_out_capacity: usize,
) -> Result<()> {
    let transform = transform_instance(&rt)?;

    if edge_txs.len() == 1 {
        let out_tx = edge_txs.into_iter().next().expect("one sender");
        return strategy::run_transform(kind, rt, transform, input, out_tx).await;
    }

    // Zero consumers drain into nothing; several consumers fan out through
    // an internal channel so the strategy still sees a single producer.
    let element = rt
        .graph
        .node(rt.node_id)
        .and_then(|n| n.output())
        .unwrap_or_else(|| input.element());
    let (out_tx, rx) = mpsc::channel(fan_out_capacity.max(1));
    let mut internal = DataPipe::from_channel(element, rx);
    let ctx = rt.ctx.clone();
    let strategy_run = strategy::run_transform(kind, rt, transform, input, out_tx);
    let forward = async {
        if edge_txs.is_empty() {
            while let Some(next) = internal.next(&ctx).await {
                if next.is_err() {
                    break;
                }
            }
            Ok(())
        } else {
            pump(internal, edge_txs, &ctx, |_| {}).await
        }
    };
    let (run_result, forward_result) = futures::future::join(strategy_run, forward).await;
    run_result.and(forward_result)
}

/// Creates the transform instance for a runtime through its factory.
fn transform_instance(rt: &Arc<NodeRuntime>) -> Result<Arc<dyn crate::node::DynTransform>> {
    let definition = rt
        .graph
        .node(rt.node_id)
        .ok_or_else(|| Error::Internal(format!("node {} missing from graph", rt.node_id)))?;
    let instance = rt.factory.create(definition, &rt.graph)?;
    match instance {
        NodeInstance::Transform(transform) => Ok(transform),
        _ => Err(Error::Internal(format!(
            "factory produced a non-transform instance for transform {}",
            rt.name
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipe_transform(
    node_id: NodeId,
    name: &str,
    ctx: &PipelineContext,
    graph: &Arc<PipelineGraph>,
    factory: &Arc<dyn NodeFactory>,
    counters: Arc<NodeCounters>,
    metrics: Option<Arc<dyn NodeMetricsSink>>,
    input: DataPipe,
    edge_txs: Vec<mpsc::Sender<Item>>,
) -> Result<()> {
    let definition = graph
        .node(node_id)
        .ok_or_else(|| Error::Internal(format!("node {node_id} missing from graph")))?;
    let instance = factory.create(definition, graph)?;
    let NodeInstance::PipeTransform(mut transform) = instance else {
        return Err(Error::Internal(format!(
            "factory produced a non-pipe-transform instance for transform {name}"
        )));
    };
    let output = transform
        .execute_pipe(input, ctx)
        .await
        .map_err(|e| node_failure(node_id, name, e))?;
    pump(output, edge_txs, ctx, |_| {
        counters.item_out();
        if let Some(metrics) = &metrics {
            metrics.item_out(node_id);
        }
    })
    .await
    .map_err(|e| node_failure(node_id, name, e))
}

#[allow(clippy::too_many_arguments)]
async fn run_join(
    node_id: NodeId,
    name: &str,
    ctx: &PipelineContext,
    graph: &Arc<PipelineGraph>,
    factory: &Arc<dyn NodeFactory>,
    counters: Arc<NodeCounters>,
    metrics: Option<Arc<dyn NodeMetricsSink>>,
    left: DataPipe,
    right: DataPipe,
    edge_txs: Vec<mpsc::Sender<Item>>,
) -> Result<()> {
    let definition = graph
        .node(node_id)
        .ok_or_else(|| Error::Internal(format!("node {node_id} missing from graph")))?;
    let instance = factory.create(definition, graph)?;
    let NodeInstance::Join(mut join) = instance else {
        return Err(Error::Internal(format!(
            "factory produced a non-join instance for join {name}"
        )));
    };
    let output = join
        .execute(left, right, ctx)
        .await
        .map_err(|e| node_failure(node_id, name, e))?;
    pump(output, edge_txs, ctx, |_| {
        counters.item_out();
        if let Some(metrics) = &metrics {
            metrics.item_out(node_id);
        }
    })
    .await
    .map_err(|e| node_failure(node_id, name, e))
}

async fn run_sink(
    node_id: NodeId,
    name: &str,
    ctx: &PipelineContext,
    graph: &Arc<PipelineGraph>,
    factory: &Arc<dyn NodeFactory>,
    input: DataPipe,
) -> Result<()> {
    let definition = graph
        .node(node_id)
        .ok_or_else(|| Error::Internal(format!("node {node_id} missing from graph")))?;
    let instance = factory.create(definition, graph)?;
    let NodeInstance::Sink(mut sink) = instance else {
        return Err(Error::Internal(format!(
            "factory produced a non-sink instance for sink {name}"
        )));
    };
    sink.execute_pipe(input, ctx)
        .await
        .map_err(|e| node_failure(node_id, name, e))
}
