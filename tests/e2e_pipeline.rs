// tests/e2e_pipeline.rs
// Full pipeline smoke test against the mock client: batch → summary →
// commentary, plus the fallback behaviors visible at the runtime surface.

use std::sync::Arc;

use survey_insight::client::MockClient;
use survey_insight::{AnalysisRuntime, AppSettings, Sentiment, COMMENTARY_FAILURE_TEXT};

fn runtime_with(mock: Arc<MockClient>) -> AnalysisRuntime {
    let settings = AppSettings {
        api_key: "test-key".into(),
        max_concurrent_tasks: 3,
        ..AppSettings::default()
    };
    AnalysisRuntime::with_client(settings, mock)
}

#[tokio::test]
async fn batch_summary_and_commentary_flow() {
    let mock = Arc::new(MockClient::new());
    let runtime = runtime_with(mock.clone());

    let texts = vec![
        "価格に満足しています".to_string(),
        "".to_string(),
        "デザインが気に入りました".to_string(),
    ];
    let table = runtime.run_batch(texts, None).await.unwrap();
    assert_eq!(table.len(), 3);
    assert!(table.rows[1].result.is_fallback(), "empty text degrades");

    let summary = runtime.summarize(&table, "「自由記述」列の回答").unwrap();
    let positive = summary
        .sentiment_counts
        .iter()
        .find(|(s, _)| *s == Sentiment::Positive)
        .map(|(_, n)| *n)
        .unwrap();
    assert_eq!(positive, 2);
    // The mock classifies everything as 価格; the empty row adds 無回答.
    assert!(summary.topic_counts.iter().any(|(t, _)| t == "価格"));
    assert!(summary.topic_counts.iter().any(|(t, _)| t == "無回答"));
    // Empty text contributes nothing to the clouds.
    assert!(summary.wordcloud.all.iter().all(|w| !w.is_empty()));

    let commentary = runtime.annotate(&summary).await;
    assert_eq!(commentary.action_items.len(), 3);
    assert_eq!(commentary.summary_text, "要約");

    // Flattened rows for the export sink keep the prefixed columns.
    let rows = table.to_rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["analysis_sentiment"], "positive");
    assert_eq!(rows[1]["fallback"], true);
}

#[tokio::test]
async fn commentary_failure_yields_placeholder_not_error() {
    // Every commentary request carries this header, so the mock always fails.
    let mock = Arc::new(MockClient::failing_on("アンケート分析結果データ"));
    let runtime = runtime_with(mock);

    let table = runtime
        .run_batch(vec!["良い商品".to_string()], None)
        .await
        .unwrap();
    let summary = runtime.summarize(&table, "回答").unwrap();
    let commentary = runtime.annotate(&summary).await;

    assert_eq!(commentary.summary_text, COMMENTARY_FAILURE_TEXT);
    assert_eq!(commentary.sentiment_commentary, COMMENTARY_FAILURE_TEXT);
    assert_eq!(commentary.topics_commentary, COMMENTARY_FAILURE_TEXT);
    assert_eq!(commentary.action_items, vec!["N/A".to_string()]);
}
