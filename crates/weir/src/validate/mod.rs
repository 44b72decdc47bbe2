//! Rule-based static validation of pipeline graphs.
//!
//! Validation runs as a sequence of independently evaluable rules. Core
//! rules guard structural soundness and cannot be disabled; a fatal core
//! rule that reports an error halts the sequence so later rules never see a
//! corrupt graph. Extended rules are on by default and can be opted out per
//! rule via [`Validator::without_rule`].

mod rules;

use std::collections::HashSet;

use serde::Serialize;
use strum::Display;

use crate::definition::{NodeId, PipelineGraph};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum Severity {
    /// Advisory; the graph still builds.
    Warning,
    /// The graph is rejected.
    Error,
}

/// Stable category of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum IssueCategory {
    /// Duplicate node IDs.
    IdNotUnique,
    /// Duplicate node display names.
    NameNotUnique,
    /// An edge references a node that does not exist.
    EdgeEndpoint,
    /// The graph has no nodes or no source.
    MissingSource,
    /// The graph has no sink.
    MissingSink,
    /// A non-source node has no inbound connection, or a join is missing a
    /// side.
    MissingInput,
    /// A node cannot be reached from any source.
    Unreachable,
    /// The graph contains a cycle.
    Cycles,
    /// An edge connects a node to itself.
    SelfLoop,
    /// The same `(from, to, ports)` edge was declared twice.
    DuplicateEdge,
    /// An edge's carried type is not assignable to its target input.
    TypeMismatch,
    /// Suspicious parallel execution configuration.
    ParallelConfiguration,
    /// Incomplete resilient execution configuration.
    ResilientConfiguration,
}

impl IssueCategory {
    /// Returns the stable identifier code for this category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IdNotUnique => "NP-IdNotUnique",
            Self::NameNotUnique => "NP-NameNotUnique",
            Self::EdgeEndpoint => "NP-EdgeEndpoint",
            Self::MissingSource => "NP-MissingSource",
            Self::MissingSink => "NP-MissingSink",
            Self::MissingInput => "NP-MissingInput",
            Self::Unreachable => "NP-Unreachable",
            Self::Cycles => "NP-Cycles",
            Self::SelfLoop => "NP-SelfLoop",
            Self::DuplicateEdge => "NP-DuplicateEdge",
            Self::TypeMismatch => "NP-TypeMismatch",
            Self::ParallelConfiguration => "NP-ParallelConfiguration",
            Self::ResilientConfiguration => "NP-ResilientConfiguration",
        }
    }
}

/// A single finding reported by a validation rule.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// How bad it is.
    pub severity: Severity,
    /// What class of problem it is.
    pub category: IssueCategory,
    /// Human-readable description naming the offending entity.
    pub message: String,
    /// The node the issue anchors to, when there is one.
    pub node: Option<NodeId>,
}

/// The collected findings of a validation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Records an error.
    pub fn error(&mut self, category: IssueCategory, message: impl Into<String>) {
        self.push(Severity::Error, category, message, None);
    }

    /// Records an error anchored to a node.
    pub fn error_at(&mut self, category: IssueCategory, node: NodeId, message: impl Into<String>) {
        self.push(Severity::Error, category, message, Some(node));
    }

    /// Records a warning.
    pub fn warning(&mut self, category: IssueCategory, message: impl Into<String>) {
        self.push(Severity::Warning, category, message, None);
    }

    /// Records a warning anchored to a node.
    pub fn warning_at(
        &mut self,
        category: IssueCategory,
        node: NodeId,
        message: impl Into<String>,
    ) {
        self.push(Severity::Warning, category, message, Some(node));
    }

    fn push(
        &mut self,
        severity: Severity,
        category: IssueCategory,
        message: impl Into<String>,
        node: Option<NodeId>,
    ) {
        self.issues.push(ValidationIssue {
            severity,
            category,
            message: message.into(),
            node,
        });
    }

    /// All findings, in rule order.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Error-severity findings.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    /// Warning-severity findings.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    /// Returns whether no rule reported an error.
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub(crate) fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Consumes the report, keeping only the warnings.
    pub fn into_warnings(self) -> Vec<ValidationIssue> {
        self.issues
            .into_iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.error_count(),
            self.warnings().count()
        )?;
        for issue in &self.issues {
            write!(
                f,
                "; [{}] {}: {}",
                issue.severity,
                issue.category.code(),
                issue.message
            )?;
        }
        Ok(())
    }
}

/// One independently evaluable check over the graph.
pub trait ValidationRule: Send + Sync {
    /// Stable rule name, used for opting out.
    fn name(&self) -> &'static str;

    /// Core rules cannot be disabled.
    fn core(&self) -> bool {
        false
    }

    /// Fatal rules halt the sequence when they report an error.
    fn fatal(&self) -> bool {
        false
    }

    /// Evaluates the rule, recording findings into the report.
    fn check(&self, graph: &PipelineGraph, report: &mut ValidationReport);
}

/// The configured rule sequence.
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
    disabled: HashSet<String>,
}

impl Validator {
    /// Creates a validator with the default rule set.
    pub fn new() -> Self {
        Self {
            rules: rules::default_rules(),
            disabled: HashSet::new(),
        }
    }

    /// Opts out of an extended rule by name; core rules are unaffected.
    pub fn without_rule(mut self, name: &str) -> Self {
        self.disabled.insert(name.to_owned());
        self
    }

    /// Appends a custom rule to the sequence.
    pub fn with_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Runs the rule sequence over a graph.
    pub fn validate(&self, graph: &PipelineGraph) -> ValidationReport {
        let mut report = ValidationReport::default();
        for rule in &self.rules {
            if !rule.core() && self.disabled.contains(rule.name()) {
                continue;
            }
            let errors_before = report.error_count();
            rule.check(graph, &mut report);
            if rule.fatal() && report.error_count() > errors_before {
                break;
            }
        }
        report
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("rules", &self.rules.len())
            .field("disabled", &self.disabled)
            .finish()
    }
}
