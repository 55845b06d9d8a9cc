// tests/batch_scheduler.rs
// Scheduler properties: ordering, coverage, progress, isolation, the
// concurrency cap, and fail-fast config validation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use survey_insight::client::MockClient;
use survey_insight::error::BatchError;
use survey_insight::scheduler::{run_batch, ProgressSink};
use survey_insight::tokenize::{SplitMode, TokenizerRegistry};
use survey_insight::ItemAnalyzer;

fn analyzer_with(mock: Arc<MockClient>) -> Arc<ItemAnalyzer> {
    Arc::new(ItemAnalyzer::new(
        mock,
        Arc::new(TokenizerRegistry::new()),
        SplitMode::B,
        "gpt-4o-mini",
    ))
}

#[derive(Default)]
struct Recorder {
    values: Mutex<Vec<f64>>,
}

impl ProgressSink for Recorder {
    fn notify(&self, percent: f64) {
        self.values.lock().push(percent);
    }
}

#[tokio::test]
async fn results_line_up_with_inputs() {
    let mock = Arc::new(MockClient::new().with_latency(Duration::from_millis(10)));
    let texts: Vec<String> = (0..8).map(|i| format!("回答その{i}")).collect();
    let table = run_batch(analyzer_with(mock), texts.clone(), 3, None)
        .await
        .unwrap();

    assert_eq!(table.len(), texts.len());
    for (i, row) in table.rows.iter().enumerate() {
        assert_eq!(row.text, texts[i], "row {i} must match input {i}");
        assert!(!row.result.is_fallback());
    }
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_one_hundred() {
    let mock = Arc::new(MockClient::new().with_latency(Duration::from_millis(5)));
    let recorder = Arc::new(Recorder::default());
    let texts: Vec<String> = (0..7).map(|i| format!("text {i}")).collect();
    let sink: Arc<dyn ProgressSink> = recorder.clone();

    run_batch(analyzer_with(mock), texts, 2, Some(sink))
        .await
        .unwrap();

    let values = recorder.values.lock();
    assert_eq!(values.len(), 7, "one progress call per completed item");
    for pair in values.windows(2) {
        assert!(pair[1] >= pair[0], "progress must be non-decreasing");
    }
    assert_eq!(*values.last().unwrap(), 100.0);
}

#[tokio::test]
async fn empty_batch_returns_immediately_without_progress() {
    let mock = Arc::new(MockClient::new());
    let recorder = Arc::new(Recorder::default());
    let sink: Arc<dyn ProgressSink> = recorder.clone();

    let table = run_batch(analyzer_with(mock.clone()), Vec::new(), 4, Some(sink))
        .await
        .unwrap();

    assert!(table.is_empty());
    assert!(recorder.values.lock().is_empty());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn one_failing_item_does_not_poison_the_batch() {
    let mock = Arc::new(MockClient::failing_on("壊れた回答"));
    let texts = vec![
        "良い商品でした".to_string(),
        "配送が早い".to_string(),
        "壊れた回答".to_string(),
        "また買います".to_string(),
        "サポートが丁寧".to_string(),
    ];
    let table = run_batch(analyzer_with(mock), texts, 5, None).await.unwrap();

    assert_eq!(table.len(), 5);
    for (i, row) in table.rows.iter().enumerate() {
        if i == 2 {
            assert!(row.result.is_fallback(), "failing item degrades alone");
            assert!(row.result.record().moderation.flagged);
        } else {
            assert!(!row.result.is_fallback(), "row {i} should succeed");
        }
    }
}

#[tokio::test]
async fn concurrency_cap_is_respected() {
    let mock = Arc::new(MockClient::new().with_latency(Duration::from_millis(50)));
    let texts: Vec<String> = (0..10).map(|i| format!("回答 {i}")).collect();

    run_batch(analyzer_with(mock.clone()), texts, 2, None)
        .await
        .unwrap();

    assert!(
        mock.max_in_flight() <= 2,
        "observed {} concurrent item phases with a cap of 2",
        mock.max_in_flight()
    );
}

#[tokio::test]
async fn oversized_cap_runs_items_together() {
    let mock = Arc::new(MockClient::new().with_latency(Duration::from_millis(100)));
    let texts: Vec<String> = (0..6).map(|i| format!("回答 {i}")).collect();

    let table = run_batch(analyzer_with(mock.clone()), texts, 64, None)
        .await
        .unwrap();

    assert_eq!(table.len(), 6);
    assert!(
        mock.max_in_flight() >= 2,
        "a cap above the item count should not serialize the batch"
    );
}

#[tokio::test]
async fn zero_concurrency_fails_fast() {
    let mock = Arc::new(MockClient::new());
    let err = run_batch(
        analyzer_with(mock.clone()),
        vec!["意見です".to_string()],
        0,
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BatchError::Config));
    assert_eq!(mock.call_count(), 0, "batch must never begin");
}

#[tokio::test]
async fn duplicate_texts_stay_independent_items() {
    let mock = Arc::new(MockClient::new());
    let texts = vec!["同じ意見".to_string(), "同じ意見".to_string()];
    let table = run_batch(analyzer_with(mock.clone()), texts, 2, None)
        .await
        .unwrap();

    assert_eq!(table.len(), 2);
    // 3 sub-requests per item, no dedup/memoization across identical texts.
    assert_eq!(mock.call_count(), 6);
}
