//! End-to-end execution scenarios over healthy pipelines.

mod common;

use std::sync::Arc;

use common::*;
use weir::node::NodeInstance;
use weir::{
    BatchOptions, Engine, ExecutionStrategyKind, JoinKind, ParallelOptions, PipelineBuilder,
    PipelineContext,
};

#[tokio::test]
async fn linear_sequential_pipeline_maps_in_order() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3]));
    let double = builder.add_transform_named::<Doubler>("double");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &double);
    builder.connect(&double, &sink);
    let graph = builder.build().unwrap();

    let engine = Engine::with_defaults();
    let report = engine.run(graph, PipelineContext::new()).await.unwrap();

    assert_eq!(snapshot(&seen), vec![2, 4, 6]);
    assert!(report.success);
    let double_report = report.node("double").unwrap();
    assert_eq!(double_report.items_in, 3);
    assert_eq!(double_report.items_out, 3);
    assert_eq!(double_report.errors, 0);
}

#[tokio::test]
async fn ordered_parallel_equals_sequential_map() {
    let input: Vec<u32> = (0..200).collect();
    let mut builder = PipelineBuilder::new();
    let values = input.clone();
    let source = builder.add_source_with("numbers", move || NumberSource::new(values.clone()));
    let double = builder.add_transform_named::<Doubler>("double");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &double);
    builder.connect(&double, &sink);
    builder.set_execution_strategy(
        double.id(),
        ExecutionStrategyKind::Parallel(
            ParallelOptions::builder()
                .with_max_degree_of_parallelism(4usize)
                .with_max_queue_length(8usize)
                .with_preserve_ordering(true)
                .build()
                .unwrap(),
        ),
    );
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    let expected: Vec<u32> = input.iter().map(|x| x * 2).collect();
    assert_eq!(snapshot(&seen), expected);
}

#[tokio::test]
async fn unordered_parallel_preserves_the_multiset() {
    let input: Vec<u32> = (0..100).collect();
    let mut builder = PipelineBuilder::new();
    let values = input.clone();
    let source = builder.add_source_with("numbers", move || NumberSource::new(values.clone()));
    let double = builder.add_transform_named::<Doubler>("double");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &double);
    builder.connect(&double, &sink);
    builder.set_execution_strategy(
        double.id(),
        ExecutionStrategyKind::Parallel(
            ParallelOptions::builder()
                .with_max_degree_of_parallelism(8usize)
                .with_max_queue_length(16usize)
                .build()
                .unwrap(),
        ),
    );
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    let mut result = snapshot(&seen);
    result.sort_unstable();
    let expected: Vec<u32> = input.iter().map(|x| x * 2).collect();
    assert_eq!(result, expected);
}

#[tokio::test]
async fn fan_out_duplicates_and_merge_concatenates() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3]));
    let double = builder.add_transform_named::<Doubler>("double");
    let triple = builder.add_transform_named::<Tripler>("triple");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &double);
    builder.connect(&source, &triple);
    builder.connect(&double, &sink);
    builder.connect(&triple, &sink);
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    // Concatenate merge order: the first inbound edge is drained fully
    // before the second.
    assert_eq!(snapshot(&seen), vec![2, 4, 6, 3, 6, 9]);
}

#[tokio::test]
async fn batching_groups_and_flushes_the_tail() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3, 4, 5]));
    let batch = builder.add_batching::<u32>("batch", BatchOptions::of_size(2).unwrap());
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &batch);
    builder.connect(&batch, &sink);
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test]
async fn unbatching_flattens_batches() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3, 4, 5]));
    let batch = builder.add_batching::<u32>("batch", BatchOptions::of_size(3).unwrap());
    let unbatch = builder.add_unbatching::<u32>("unbatch");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &batch);
    builder.connect(&batch, &unbatch);
    builder.connect(&unbatch, &sink);
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn inner_join_correlates_two_inputs() {
    let mut builder = PipelineBuilder::new();
    let numbers = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3]));
    let words = builder.add_source_with("words", || WordSource);
    let join = builder.add_join_with("join", JoinKind::Inner, || NumberWords);
    let seen: std::sync::Arc<std::sync::Mutex<Vec<String>>> = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&numbers, &join.left());
    builder.connect(&words, &join.right());
    builder.connect(&join, &sink);
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec!["1=one".to_owned(), "3=three".to_owned()]);
}

/// Source for the join test's right side.
struct WordSource;

#[async_trait::async_trait]
impl weir::Source for WordSource {
    type Output = (u32, String);

    async fn initialize(
        &mut self,
        _ctx: &PipelineContext,
    ) -> Result<weir::pipe::ItemStream<(u32, String)>, weir::BoxedError> {
        use futures::StreamExt;
        Ok(
            futures::stream::iter([Ok((1, "one".to_owned())), Ok((3, "three".to_owned()))])
                .boxed(),
        )
    }
}

#[tokio::test]
async fn preconfigured_instance_takes_precedence_over_the_constructor() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3]));
    let transform = builder.add_transform_named::<Doubler>("maybe-double");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &transform);
    builder.connect(&transform, &sink);
    builder.add_preconfigured_instance(transform.id(), NodeInstance::transform(Tripler));
    let graph = builder.build().unwrap();

    Engine::with_defaults()
        .run(graph, PipelineContext::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&seen), vec![3, 6, 9]);
}

#[tokio::test]
async fn context_parameters_are_visible_to_nodes() {
    struct Scaler;

    #[async_trait::async_trait]
    impl weir::Transform for Scaler {
        type Input = u32;
        type Output = u32;

        async fn execute_item(
            &self,
            item: u32,
            ctx: &PipelineContext,
        ) -> Result<u32, weir::BoxedError> {
            let factor = ctx
                .parameter("factor")
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;
            Ok(item * factor)
        }
    }

    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([1, 2, 3]));
    let scale = builder.add_transform_with("scale", || Scaler);
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &scale);
    builder.connect(&scale, &sink);
    let graph = builder.build().unwrap();

    let ctx = PipelineContext::new();
    ctx.set_parameter("factor", serde_json::json!(10));
    Engine::with_defaults().run(graph, ctx).await.unwrap();

    assert_eq!(snapshot(&seen), vec![10, 20, 30]);
}

#[tokio::test]
async fn graphs_are_reusable_across_runs() {
    let mut builder = PipelineBuilder::new();
    let source = builder.add_source_with("numbers", || NumberSource::new([5, 6]));
    let double = builder.add_transform_named::<Doubler>("double");
    let seen = shared();
    let sink = {
        let seen = seen.clone();
        builder.add_sink_with("collect", move || CollectingSink::new(seen.clone()))
    };
    builder.connect(&source, &double);
    builder.connect(&double, &sink);
    let graph = Arc::new(builder.build().unwrap());

    let engine = Engine::with_defaults();
    engine
        .run(graph.clone(), PipelineContext::new())
        .await
        .unwrap();
    engine.run(graph, PipelineContext::new()).await.unwrap();

    assert_eq!(snapshot(&seen), vec![10, 12, 10, 12]);
}
