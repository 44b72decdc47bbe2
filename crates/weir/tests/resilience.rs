//! Failure handling: retries, dead-lettering, drop policies, and restarts.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::{Duration, Instant};

use common::*;
use weir::definition::PipelineOptions;
use weir::handler::{AlwaysRetryHandler, DeadLetterHandler, InMemoryDeadLetterSink, RestartNodeHandler};
use weir::retry::{Backoff, Jitter, RetryOptions};
use weir::strategy::ResilientOptions;
use weir::{
    Engine, ExecutionStrategyKind, ParallelOptions, PipelineBuilder, PipelineContext, QueuePolicy,
};

fn fixed_retry(attempts: u32, delay_ms: u64) -> RetryOptions {
    RetryOptions::builder()
        .with_max_attempts(attempts)
        .with_backoff(Backoff::fixed(Duration::from_millis(delay_ms)).unwrap())
        .with_jitter(Jitter::None)
        .build()
        .unwrap()
}

#[tokio::test]
async fn retry_then_succeed_produces_the_item_once() {
    let failures = Arc::new(AtomicU32::new(2));
    let mut builder = PipelineBuilder::new()
        .with_options(PipelineOptions::new().with_retry(fixed_retry(3, 10)));
    let source = builder.add_source_with("numbers", || NumberSource::new([42]));
    let flaky = {
        let failures = failures.clone();
        builder.add_transform_with("flaky", move || Flaky::new(failures.clone()))
    };
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &flaky);
    builder.connect(&flaky, &sink);
    builder.with_error_handler(flaky.id(), Arc::new(AlwaysRetryHandler));
    let graph = builder.build().unwrap();

    let started = Instant::now();
    let report = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![42]);
    assert!(started.elapsed() >= Duration::from_millis(20));
    let flaky_report = report.node("flaky").unwrap();
    assert_eq!(flaky_report.retries, 2);
    assert_eq!(flaky_report.errors, 2);
    assert_eq!(flaky_report.items_out, 1);
}

#[tokio::test]
async fn retry_exhaustion_fails_with_a_stable_code() {
    let failures = Arc::new(AtomicU32::new(10));
    let mut builder = PipelineBuilder::new()
        .with_options(PipelineOptions::new().with_retry(fixed_retry(2, 1)));
    let source = builder.add_source_with("numbers", || NumberSource::new([7]));
    let flaky = {
        let failures = failures.clone();
        builder.add_transform_with("flaky", move || Flaky::new(failures.clone()))
    };
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &flaky);
    builder.connect(&flaky, &sink);
    builder.with_error_handler(flaky.id(), Arc::new(AlwaysRetryHandler));
    let graph = builder.build().unwrap();

    let err = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RetryLimitExhausted");
    assert!(snapshot(&seen).is_empty());
}

#[tokio::test]
async fn dead_letter_on_redirect_records_the_failed_item() {
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 42, 3]));
    let fail = builder.add_transform_with("fail", || FailOn { bad: 42 });
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &fail);
    builder.connect(&fail, &sink);
    builder.with_error_handler(fail.id(), Arc::new(DeadLetterHandler));
    builder.add_dead_letter_sink(dead_letters.clone());
    let graph = builder.build().unwrap();

    let report = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![1, 3]);
    assert_eq!(report.dead_letters, 1);

    let entries = dead_letters.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].node_id, fail.id());
    assert_eq!(entries[0].item.downcast_ref::<u32>(), Some(&42));
    assert!(entries[0].error.to_string().contains("boom on 42"));
}

#[tokio::test]
async fn dead_letter_capacity_fails_the_run() {
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
    let mut builder = PipelineBuilder::new()
        .with_options(PipelineOptions::new().with_dead_letter_capacity(1));
    let source = builder.add_source_with("numbers", || NumberSource::new([42, 42, 42]));
    let fail = builder.add_transform_with("fail", || FailOn { bad: 42 });
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &fail);
    builder.connect(&fail, &sink);
    builder.with_error_handler(fail.id(), Arc::new(DeadLetterHandler));
    builder.add_dead_letter_sink(dead_letters.clone());
    let graph = builder.build().unwrap();

    let err = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DeadLetterCapacityExceeded");
}

#[tokio::test]
async fn drop_oldest_under_burst_keeps_the_tail_without_duplicates() {
    let input: Vec<u32> = (1..=200).collect();
    let mut builder = PipelineBuilder::new();
    let values = input.clone();
    let source = builder.add_source_with("numbers", move || NumberSource::new(values.clone()));
    let slow = builder.add_transform_with("slow", || SlowIdentity { delay_ms: 2 });
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &slow);
    builder.connect(&slow, &sink);
    builder.set_execution_strategy(
        slow.id(),
        ExecutionStrategyKind::Parallel(
            ParallelOptions::builder()
                .with_max_degree_of_parallelism(2usize)
                .with_max_queue_length(4usize)
                .with_queue_policy(QueuePolicy::DropOldest)
                .build()
                .unwrap(),
        ),
    );
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    let survivors = snapshot(&seen);
    assert!(survivors.len() <= input.len());
    // No duplicates, and every survivor came from the input.
    let unique: HashSet<u32> = survivors.iter().copied().collect();
    assert_eq!(unique.len(), survivors.len());
    assert!(unique.iter().all(|v| (1..=200).contains(v)));
    // The most recent item is never the one discarded.
    assert!(unique.contains(&200));
    // A burst through a 4-slot queue with two slow workers must drop.
    assert!(survivors.len() < input.len());
}

#[tokio::test]
async fn node_restart_replays_pending_items_exactly_once() {
    let incarnations = Arc::new(AtomicU32::new(0));
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3, 4, 5]));
    let fragile = {
        let incarnations = incarnations.clone();
        builder.add_transform_with("fragile", move || Fragile::build(&incarnations, 4, false))
    };
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &fragile);
    builder.connect(&fragile, &sink);
    builder.set_execution_strategy(
        fragile.id(),
        ExecutionStrategyKind::Resilient(
            ResilientOptions::new().with_retry(
                RetryOptions::builder()
                    .with_max_attempts(1u32)
                    .with_max_node_restart_attempts(1u32)
                    .with_max_materialized_items(8usize)
                    .build()
                    .unwrap(),
            ),
        ),
    );
    builder.add_pipeline_error_handler(Arc::new(RestartNodeHandler));
    let graph = builder.build().unwrap();

    let report = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![1, 2, 3, 4, 5]);
    let fragile_report = report.node("fragile").unwrap();
    assert_eq!(fragile_report.restarts, 1);
    // Two incarnations: the original and the rebuilt one.
    assert_eq!(incarnations.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_restarts_fail_the_pipeline() {
    let incarnations = Arc::new(AtomicU32::new(0));
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3, 4, 5]));
    let fragile = {
        let incarnations = incarnations.clone();
        builder.add_transform_with("fragile", move || Fragile::build(&incarnations, 4, true))
    };
    let seen = shared::<u32>();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &fragile);
    builder.connect(&fragile, &sink);
    builder.set_execution_strategy(
        fragile.id(),
        ExecutionStrategyKind::Resilient(
            ResilientOptions::new().with_retry(
                RetryOptions::builder()
                    .with_max_attempts(1u32)
                    .with_max_node_restart_attempts(1u32)
                    .with_max_materialized_items(8usize)
                    .build()
                    .unwrap(),
            ),
        ),
    );
    builder.add_pipeline_error_handler(Arc::new(RestartNodeHandler));
    let graph = builder.build().unwrap();

    let err = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RetryLimitExhausted");
}

#[tokio::test]
async fn skip_decision_drops_the_item_and_continues() {
    struct SkipHandler;

    #[async_trait::async_trait]
    impl weir::ItemErrorHandler for SkipHandler {
        async fn handle(
            &self,
            _node: weir::handler::NodeRef<'_>,
            _item: &weir::Item,
            _error: &weir::Error,
            _ctx: &PipelineContext,
        ) -> weir::ItemDecision {
            weir::ItemDecision::Skip
        }
    }

    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 42, 3]));
    let fail = builder.add_transform_with("fail", || FailOn { bad: 42 });
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &fail);
    builder.connect(&fail, &sink);
    builder.with_error_handler(fail.id(), Arc::new(SkipHandler));
    let graph = builder.build().unwrap();

    let report = Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![1, 3]);
    assert_eq!(report.dead_letters, 0);
    assert_eq!(report.node("fail").unwrap().errors, 1);
}
