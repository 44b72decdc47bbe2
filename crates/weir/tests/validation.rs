//! Graph validation at build time.

mod common;

use common::*;
use weir::validate::IssueCategory;
use weir::{
    Engine, Error, ExecutionStrategyKind, ParallelOptions, PipelineBuilder, PipelineContext,
    QueuePolicy,
};

fn validation_report(err: Error) -> weir::validate::ValidationReport {
    match err {
        Error::Validation(report) => report,
        other => panic!("expected a validation error, got {other}"),
    }
}

#[tokio::test]
async fn cycle_is_rejected_at_build() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let a = builder.add_transform_with("a", || Doubler);
    let b = builder.add_transform_with("b", || Doubler);
    let c = builder.add_transform_with("c", || Doubler);
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &a);
    builder.connect(&a, &b);
    builder.connect(&b, &c);
    builder.connect(&c, &a);
    builder.connect(&c, &sink);

    let report = validation_report(builder.build().unwrap_err());
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, IssueCategory::Cycles);
    assert!(errors[0].message.contains("a"));
}

#[test]
fn empty_graph_is_rejected() {
    let report = validation_report(PipelineBuilder::new().build().unwrap_err());
    assert!(
        report
            .errors()
            .any(|i| i.category == IssueCategory::MissingSource)
    );
}

#[test]
fn missing_sink_is_rejected_unless_opted_out() {
    let build = |opt_out: bool| {
        let mut builder = PipelineBuilder::new();
        if opt_out {
            builder = builder.without_rule("has-sink");
        }
        let source = builder.add_source_with("numbers", || NumberSource::new([1]));
        let a = builder.add_transform_with("a", || Doubler);
        builder.connect(&source, &a);
        builder.build()
    };

    let report = validation_report(build(false).unwrap_err());
    assert!(
        report
            .errors()
            .any(|i| i.category == IssueCategory::MissingSink)
    );
    assert!(build(true).is_ok());
}

#[test]
fn duplicate_names_are_rejected() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("dup", || NumberSource::new([1]));
    let a = builder.add_transform_with("dup", || Doubler);
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &a);
    builder.connect(&a, &sink);

    let report = validation_report(builder.build().unwrap_err());
    let issue = report.errors().next().unwrap();
    assert_eq!(issue.category, IssueCategory::NameNotUnique);
    assert_eq!(issue.category.code(), "NP-NameNotUnique");
    assert!(issue.message.contains("dup"));
}

#[test]
fn self_loop_is_rejected() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let a = builder.add_transform_with("a", || Doubler);
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &a);
    builder.connect(&a, &a);
    builder.connect(&a, &sink);

    let report = validation_report(builder.build().unwrap_err());
    assert!(
        report
            .errors()
            .any(|i| i.category == IssueCategory::SelfLoop)
    );
}

#[test]
fn duplicate_edges_are_rejected() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &sink);
    builder.connect(&source, &sink);

    let report = validation_report(builder.build().unwrap_err());
    assert!(
        report
            .errors()
            .any(|i| i.category == IssueCategory::DuplicateEdge)
    );
}

#[test]
fn type_mismatch_is_rejected_for_dynamic_connections() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let seen = shared::<String>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("words", move || CollectingSink::<String>::new(seen.clone()))
    };
    builder.connect_ids(source.id(), sink.id());

    let report = validation_report(builder.build().unwrap_err());
    let issue = report
        .errors()
        .find(|i| i.category == IssueCategory::TypeMismatch)
        .unwrap();
    assert!(issue.message.contains("u32"));
    assert!(issue.message.contains("String"));
}

#[test]
fn unconnected_transform_is_rejected() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let _orphan = builder.add_transform_with("orphan", || Doubler);
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &sink);

    let report = validation_report(builder.build().unwrap_err());
    assert!(
        report
            .errors()
            .any(|i| i.category == IssueCategory::MissingInput)
    );
}

#[test]
fn drop_policy_without_bound_warns_but_builds() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let a = builder.add_transform_with("a", || Doubler);
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &a);
    builder.connect(&a, &sink);
    builder.set_execution_strategy(
        a.id(),
        ExecutionStrategyKind::Parallel(
            ParallelOptions::builder()
                .with_queue_policy(QueuePolicy::DropOldest)
                .build()
                .unwrap(),
        ),
    );

    let graph = builder.build().unwrap();
    assert!(
        graph
            .warnings()
            .iter()
            .any(|i| i.category == IssueCategory::ParallelConfiguration)
    );
}

#[test]
fn strategy_on_a_sink_is_a_usage_error() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &sink);
    builder.set_execution_strategy(sink.id(), ExecutionStrategyKind::Sequential);

    let err = builder.build().unwrap_err();
    assert_eq!(err.code(), "InvalidConfiguration");
}

#[tokio::test]
async fn batching_invoked_item_at_a_time_is_a_configuration_error() {
    // Declaring Batching as an item transform compiles, but the runtime
    // rejects the first item.
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1]));
    let batch = builder.add_transform_with("batch", || {
        weir::node::Batching::<u32>::new(weir::BatchOptions::of_size(2).unwrap())
    });
    let seen = shared::<Vec<u32>>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &batch);
    builder.connect(&batch, &sink);
    let graph = builder.build().unwrap();

    let err = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("item-at-a-time"));
}
