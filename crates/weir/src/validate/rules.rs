//! The default validation rule set.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::NodeIndex;

use super::{IssueCategory, ValidationReport, ValidationRule};
use crate::definition::{NodeKind, PipelineGraph};
use crate::strategy::{ExecutionStrategyKind, available_cores};

pub(super) fn default_rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(UniqueIds),
        Box::new(UniqueNames),
        Box::new(EdgeEndpointsExist),
        Box::new(HasSource),
        // Edge-shape rules scan only the declared edge list, so they can
        // safely run ahead of the fatal cycle check and still report when
        // the loop is a self-edge.
        Box::new(NoSelfLoops),
        Box::new(NoDuplicateEdges),
        Box::new(MissingInputs),
        Box::new(ReachableFromSource),
        Box::new(Acyclic),
        Box::new(HasSink),
        Box::new(TypeCompatibility),
        Box::new(JoinInputs),
        Box::new(ParallelConfigurationSanity),
        Box::new(ResilientConfigurationCompleteness),
    ]
}

struct UniqueIds;

impl ValidationRule for UniqueIds {
    fn name(&self) -> &'static str {
        "unique-ids"
    }

    fn core(&self) -> bool {
        true
    }

    fn fatal(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for node in graph.nodes() {
            if !seen.insert(node.id()) {
                report.error_at(
                    IssueCategory::IdNotUnique,
                    node.id(),
                    format!("node id {} is declared more than once", node.id()),
                );
            }
        }
    }
}

struct UniqueNames;

impl ValidationRule for UniqueNames {
    fn name(&self) -> &'static str {
        "unique-names"
    }

    fn core(&self) -> bool {
        true
    }

    fn fatal(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for node in graph.nodes() {
            *seen.entry(node.name()).or_default() += 1;
        }
        for (name, count) in seen {
            if count > 1 {
                report.error(
                    IssueCategory::NameNotUnique,
                    format!("node name \"{name}\" is used by {count} nodes"),
                );
            }
        }
    }
}

struct EdgeEndpointsExist;

impl ValidationRule for EdgeEndpointsExist {
    fn name(&self) -> &'static str {
        "edge-endpoints-exist"
    }

    fn core(&self) -> bool {
        true
    }

    fn fatal(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        for edge in graph.edges() {
            if graph.node(edge.from).is_none() {
                report.error(
                    IssueCategory::EdgeEndpoint,
                    format!("edge references unknown source node {}", edge.from),
                );
            }
            if graph.node(edge.to).is_none() {
                report.error(
                    IssueCategory::EdgeEndpoint,
                    format!("edge references unknown target node {}", edge.to),
                );
            }
        }
    }
}

struct HasSource;

impl ValidationRule for HasSource {
    fn name(&self) -> &'static str {
        "has-source"
    }

    fn core(&self) -> bool {
        true
    }

    fn fatal(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        if graph.is_empty() {
            report.error(
                IssueCategory::MissingSource,
                "pipeline must have at least one node",
            );
            return;
        }
        if graph.source_nodes().is_empty() {
            report.error(
                IssueCategory::MissingSource,
                "pipeline must have at least one source node",
            );
        }
    }
}

struct MissingInputs;

impl ValidationRule for MissingInputs {
    fn name(&self) -> &'static str {
        "missing-inputs"
    }

    fn core(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        for node in graph.nodes() {
            if node.kind() == NodeKind::Source {
                if graph.incoming_edges(node.id()).next().is_some() {
                    report.error_at(
                        IssueCategory::MissingInput,
                        node.id(),
                        format!("source {} must not have inbound edges", node.name()),
                    );
                }
                continue;
            }
            if graph.incoming_edges(node.id()).next().is_none() {
                report.error_at(
                    IssueCategory::MissingInput,
                    node.id(),
                    format!("{} {} has no inbound edge", node.kind(), node.name()),
                );
            }
        }
    }
}

struct ReachableFromSource;

impl ValidationRule for ReachableFromSource {
    fn name(&self) -> &'static str {
        "reachable-from-source"
    }

    fn core(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let inner = graph.inner();
        let mut reached: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = graph
            .source_nodes()
            .into_iter()
            .filter_map(|id| graph.node_index(id))
            .collect();
        reached.extend(queue.iter().copied());

        while let Some(index) = queue.pop_front() {
            for next in inner.neighbors_directed(index, Direction::Outgoing) {
                if reached.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        for node in graph.nodes() {
            let Some(index) = graph.node_index(node.id()) else {
                continue;
            };
            if !reached.contains(&index) {
                report.error_at(
                    IssueCategory::Unreachable,
                    node.id(),
                    format!(
                        "{} {} is not reachable from any source",
                        node.kind(),
                        node.name()
                    ),
                );
            }
        }
    }
}

struct Acyclic;

#[derive(Clone, Copy, PartialEq)]
enum DfsColor {
    White,
    Grey,
    Black,
}

impl ValidationRule for Acyclic {
    fn name(&self) -> &'static str {
        "acyclic"
    }

    fn core(&self) -> bool {
        true
    }

    fn fatal(&self) -> bool {
        true
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let inner = graph.inner();
        let mut colors: HashMap<NodeIndex, DfsColor> = inner
            .node_indices()
            .map(|i| (i, DfsColor::White))
            .collect();

        for start in inner.node_indices() {
            if colors[&start] != DfsColor::White {
                continue;
            }
            let mut path: Vec<NodeIndex> = Vec::new();
            // (node, discovered) pairs: discovered=false colors grey and
            // expands, discovered=true colors black and pops the path.
            let mut stack: Vec<(NodeIndex, bool)> = vec![(start, false)];
            while let Some((index, done)) = stack.pop() {
                if done {
                    colors.insert(index, DfsColor::Black);
                    path.pop();
                    continue;
                }
                if colors[&index] != DfsColor::White {
                    continue;
                }
                colors.insert(index, DfsColor::Grey);
                path.push(index);
                stack.push((index, true));
                for next in inner.neighbors_directed(index, Direction::Outgoing) {
                    match colors[&next] {
                        DfsColor::Grey => {
                            let names: Vec<&str> = path
                                .iter()
                                .skip_while(|i| **i != next)
                                .chain(std::iter::once(&next))
                                .filter_map(|i| graph.node_id_of(*i))
                                .filter_map(|id| graph.node(id).map(|n| n.name()))
                                .collect();
                            report.error(
                                IssueCategory::Cycles,
                                format!("cycle detected: {}", names.join(" -> ")),
                            );
                            return;
                        }
                        DfsColor::White => stack.push((next, false)),
                        DfsColor::Black => {}
                    }
                }
            }
        }
    }
}

struct HasSink;

impl ValidationRule for HasSink {
    fn name(&self) -> &'static str {
        "has-sink"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        if graph.sink_nodes().is_empty() {
            report.error(
                IssueCategory::MissingSink,
                "pipeline must have at least one sink node",
            );
        }
    }
}

struct NoSelfLoops;

impl ValidationRule for NoSelfLoops {
    fn name(&self) -> &'static str {
        "no-self-loops"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        for edge in graph.edges() {
            if edge.from == edge.to {
                report.error_at(
                    IssueCategory::SelfLoop,
                    edge.from,
                    format!("node {} connects to itself", edge.from),
                );
            }
        }
    }
}

struct NoDuplicateEdges;

impl ValidationRule for NoDuplicateEdges {
    fn name(&self) -> &'static str {
        "no-duplicate-edges"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for edge in graph.edges() {
            if !seen.insert(edge.identity()) {
                report.error(
                    IssueCategory::DuplicateEdge,
                    format!("duplicate edge {} -> {}", edge.from, edge.to),
                );
            }
        }
    }
}

struct TypeCompatibility;

impl ValidationRule for TypeCompatibility {
    fn name(&self) -> &'static str {
        "type-compatibility"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        for edge in graph.edges() {
            let (Some(from), Some(to)) = (graph.node(edge.from), graph.node(edge.to)) else {
                continue;
            };
            let Some(output) = from.output() else {
                report.error_at(
                    IssueCategory::TypeMismatch,
                    from.id(),
                    format!("{} {} produces no output to connect", from.kind(), from.name()),
                );
                continue;
            };
            let input = if edge.targets_join_right() {
                to.secondary_input()
            } else {
                to.input()
            };
            let Some(input) = input else {
                report.error_at(
                    IssueCategory::TypeMismatch,
                    to.id(),
                    format!("{} {} accepts no input", to.kind(), to.name()),
                );
                continue;
            };
            if !output.is_assignable_to(&input) {
                report.error_at(
                    IssueCategory::TypeMismatch,
                    to.id(),
                    format!(
                        "edge {} -> {} carries {} but {} expects {}",
                        from.name(),
                        to.name(),
                        output.name(),
                        to.name(),
                        input.name()
                    ),
                );
            }
        }
    }
}

struct JoinInputs;

impl ValidationRule for JoinInputs {
    fn name(&self) -> &'static str {
        "join-inputs"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        for node in graph.nodes() {
            if node.kind() != NodeKind::Join {
                continue;
            }
            let left = graph
                .incoming_edges(node.id())
                .filter(|e| !e.targets_join_right())
                .count();
            let right = graph
                .incoming_edges(node.id())
                .filter(|e| e.targets_join_right())
                .count();
            if left != 1 || right != 1 {
                report.error_at(
                    IssueCategory::MissingInput,
                    node.id(),
                    format!(
                        "join {} needs exactly one left and one right input, found {left} and {right}",
                        node.name()
                    ),
                );
            }
        }
    }
}

struct ParallelConfigurationSanity;

impl ValidationRule for ParallelConfigurationSanity {
    fn name(&self) -> &'static str {
        "parallel-configuration"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let cores = available_cores();
        for node in graph.nodes() {
            let Some(options) = node.strategy().parallel_options() else {
                continue;
            };
            let dop = options.max_degree_of_parallelism;
            if options.max_queue_length.is_none() && dop > cores {
                report.warning_at(
                    IssueCategory::ParallelConfiguration,
                    node.id(),
                    format!(
                        "{}: unbounded input queue with {dop} workers can buffer without limit",
                        node.name()
                    ),
                );
            }
            if options.preserve_ordering && dop > cores * 4 {
                report.warning_at(
                    IssueCategory::ParallelConfiguration,
                    node.id(),
                    format!(
                        "{}: order preservation with {dop} workers can hold many completed items",
                        node.name()
                    ),
                );
            }
            if options.queue_policy.drops() && options.max_queue_length.is_none() {
                report.warning_at(
                    IssueCategory::ParallelConfiguration,
                    node.id(),
                    format!(
                        "{}: {} without a bounded queue never drops and behaves as Block",
                        node.name(),
                        options.queue_policy
                    ),
                );
            }
            if dop > cores * 8 {
                report.warning_at(
                    IssueCategory::ParallelConfiguration,
                    node.id(),
                    format!(
                        "{}: {dop} workers far exceeds the {cores} available cores",
                        node.name()
                    ),
                );
            }
        }
    }
}

struct ResilientConfigurationCompleteness;

impl ValidationRule for ResilientConfigurationCompleteness {
    fn name(&self) -> &'static str {
        "resilient-configuration"
    }

    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport) {
        let mut any_resilient = false;
        for node in graph.nodes() {
            if !matches!(node.strategy(), ExecutionStrategyKind::Resilient(_)) {
                continue;
            }
            any_resilient = true;
            let retry = graph.effective_retry(node.id());
            if retry.max_node_restart_attempts == 0 {
                report.warning_at(
                    IssueCategory::ResilientConfiguration,
                    node.id(),
                    format!(
                        "{} is resilient but max_node_restart_attempts is 0; restart will not fire",
                        node.name()
                    ),
                );
            }
        }
        if any_resilient && graph.pipeline_handler().is_none() {
            report.warning(
                IssueCategory::ResilientConfiguration,
                "resilient nodes are configured but no pipeline error handler is registered \
                 on the graph; restart will not fire unless one is supplied via the builder \
                 or the run context",
            );
        }
    }
}
