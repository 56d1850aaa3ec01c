//! Worker pool results must not depend on the pool size.

mod common;

use annotator::models::ConfigOverrides;
use annotator::{CheckpointManager, Corpus, Document, StagePipeline, StageSelection};
use common::{Fixture, StageAware};
use std::sync::Arc;

fn corpus() -> Corpus {
    (0..1000)
        .map(|i| {
            let text = match i % 5 {
                0 => format!("hate other {i}"),
                1 => format!("none other {i}"),
                2 => format!("broken {i}"),
                3 => format!("hate stereotyping {i}"),
                _ => format!("Hate OTHER {i}"),
            };
            (format!("doc-{i:04}"), Document::new(text))
        })
        .collect()
}

async fn run_with_workers(workers: usize) -> (Vec<annotator::AnnotatedSet>, usize) {
    let mut fixture = Fixture::with_corpus(&corpus());
    fixture.config.apply(ConfigOverrides {
        workers: Some(workers),
        save_interval: Some(100),
        ..Default::default()
    });

    let classifier = Arc::new(StageAware::new());
    let pipeline = StagePipeline::new(fixture.config.clone(), classifier.clone())
        .unwrap()
        .with_progress(false);

    pipeline
        .run(&StageSelection::Only("hate".to_string()))
        .await
        .unwrap();
    pipeline
        .run(&StageSelection::Only("dehumanizing".to_string()))
        .await
        .unwrap();

    let sets = pipeline.stages()[..2]
        .iter()
        .map(|stage| {
            CheckpointManager::new(pipeline.checkpoint_path(stage))
                .load_data()
                .unwrap()
        })
        .collect();
    (sets, classifier.calls())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eight_workers_match_one_worker() {
    let (one, one_calls) = run_with_workers(1).await;
    let (eight, eight_calls) = run_with_workers(8).await;

    assert_eq!(one[0].len(), 1000);
    assert_eq!(one, eight);
    assert_eq!(one_calls, eight_calls);

    // 200 broken documents, two attempts each, recorded as null.
    assert_eq!(one[0].values().filter(|d| d.is_failed()).count(), 200);
    // hate-labelled documents: i % 5 in {0, 3, 4}.
    assert_eq!(one[1].len(), 600);
}
