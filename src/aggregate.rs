// src/aggregate.rs
//! Batch-level aggregation and report commentary.
//!
//! `summarize` reduces a completed table into the numbers the report needs;
//! `annotate` asks the model service for narrative commentary over those
//! numbers, falling back to fixed placeholder text on any failure.

use std::collections::HashMap;

use serde_json::json;
use tracing::warn;

use crate::client::{extract, CompletionRequest, ModelClient};
use crate::error::TokenizeError;
use crate::model::{
    ReportCommentary, ResultTable, Sentiment, SummaryAggregate, WordcloudWords,
    MODERATION_CATEGORIES,
};
use crate::tokenize::{is_stopword, SplitMode, Token, TokenizerRegistry};

const COMMENTARY_SYSTEM_PROMPT: &str =
    "あなたは、データからインサイトを抽出し、分かりやすく解説する優秀なマーケティングアナリストです。";

/// Placeholder used for every commentary text field when generation fails.
pub const COMMENTARY_FAILURE_TEXT: &str = "解説の生成中にエラーが発生しました。";

/// Number of topics kept in the frequency table.
const TOP_TOPICS: usize = 15;

/// Reduce a completed batch into the report aggregate.
///
/// Fallback rows participate like any other row: their neutral sentiment,
/// sentinel topics and zero emotion scores are all counted (so a batch with
/// many fallbacks pulls the emotion means toward zero — intentional).
/// Word-cloud lists come from a separate mode-A tokenization pass over the
/// raw texts; neutral texts feed both the positive and the negative list.
pub fn summarize(
    table: &ResultTable,
    tokenizers: &TokenizerRegistry,
    analysis_target: impl Into<String>,
) -> Result<SummaryAggregate, TokenizeError> {
    // Sentiment histogram, zero-filled in display order.
    let mut by_sentiment: HashMap<Sentiment, usize> = HashMap::new();
    for item in &table.rows {
        *by_sentiment
            .entry(item.result.record().survey.sentiment)
            .or_default() += 1;
    }
    let sentiment_counts = Sentiment::DISPLAY_ORDER
        .iter()
        .map(|s| (*s, by_sentiment.get(s).copied().unwrap_or(0)))
        .collect();

    // Topic frequencies: flatten in row order, count, stable-sort descending
    // so ties keep first-seen order, then truncate.
    let mut topic_order: Vec<String> = Vec::new();
    let mut by_topic: HashMap<String, usize> = HashMap::new();
    for item in &table.rows {
        for topic in &item.result.record().survey.key_topics {
            if !by_topic.contains_key(topic) {
                topic_order.push(topic.clone());
            }
            *by_topic.entry(topic.clone()).or_default() += 1;
        }
    }
    let mut topic_counts: Vec<(String, usize)> = topic_order
        .into_iter()
        .map(|t| {
            let count = by_topic[&t];
            (t, count)
        })
        .collect();
    topic_counts.sort_by(|a, b| b.1.cmp(&a.1));
    topic_counts.truncate(TOP_TOPICS);

    // Moderation trigger totals per category.
    let mut trigger_totals: HashMap<&str, usize> = HashMap::new();
    for item in &table.rows {
        for (name, flag) in item.result.record().moderation.categories.flags() {
            if flag {
                *trigger_totals.entry(name).or_default() += 1;
            }
        }
    }
    let moderation_totals = MODERATION_CATEGORIES
        .iter()
        .map(|name| (name.to_string(), trigger_totals.get(name).copied().unwrap_or(0)))
        .collect();

    // Emotion means over all rows, fallback zeros included.
    let n = table.len();
    let axis_names = ["joy", "sadness", "fear", "surprise", "anger", "disgust"];
    let mut sums = [0.0f64; 6];
    for item in &table.rows {
        for (i, (_, value)) in item.result.record().emotions.axes().iter().enumerate() {
            sums[i] += value;
        }
    }
    let emotion_means = axis_names
        .iter()
        .zip(sums)
        .map(|(name, sum)| {
            let mean = if n == 0 { 0.0 } else { sum / n as f64 };
            (name.to_string(), mean)
        })
        .collect();

    let wordcloud = wordcloud_words(table, tokenizers)?;

    Ok(SummaryAggregate {
        sentiment_counts,
        topic_counts,
        moderation_totals,
        emotion_means,
        wordcloud,
        analysis_target: analysis_target.into(),
    })
}

/// Cloud filter for one token: POS-gated to nouns/verbs/adjectives when the
/// backend tags POS, then the length and stopword gates either way.
fn keep_for_cloud(token: &Token, pos_tagged: bool) -> bool {
    if pos_tagged && !token.pos.is_content_word() {
        return false;
    }
    token.lemma.chars().count() > 1 && !is_stopword(&token.lemma)
}

fn wordcloud_words(
    table: &ResultTable,
    tokenizers: &TokenizerRegistry,
) -> Result<WordcloudWords, TokenizeError> {
    // Finest split for cloud tokens, independent of the analysis mode.
    let tokenizer = tokenizers.get(SplitMode::A)?;
    let pos_tagged = tokenizer.tags_pos();

    let collect = |keep: &dyn Fn(Sentiment) -> bool| -> Result<Vec<String>, TokenizeError> {
        let mut words = Vec::new();
        for item in &table.rows {
            if item.text.trim().is_empty() {
                continue;
            }
            if !keep(item.result.record().survey.sentiment) {
                continue;
            }
            for token in tokenizer.tokenize(&item.text)? {
                if keep_for_cloud(&token, pos_tagged) {
                    words.push(token.lemma);
                }
            }
        }
        Ok(words)
    };

    Ok(WordcloudWords {
        all: collect(&|_| true)?,
        positive: collect(&|s| matches!(s, Sentiment::Positive | Sentiment::Neutral))?,
        negative: collect(&|s| matches!(s, Sentiment::Negative | Sentiment::Neutral))?,
    })
}

fn commentary_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary_text": {
                "type": "string",
                "description": "分析結果全体を3つのポイントで要約した総括文。"
            },
            "action_items": {
                "type": "array",
                "items": {"type": "string"},
                "description": "分析結果から考えられる具体的なネクストアクションの提案リスト。3つ提案すること。"
            },
            "sentiment_commentary": {
                "type": "string",
                "description": "感情分析の円グラフから読み取れるインサイトや注目点を解説する文章。"
            },
            "topics_commentary": {
                "type": "string",
                "description": "主要トピックの棒グラフから読み取れるインサイトや注目点を解説する文章。"
            }
        },
        "required": ["summary_text", "action_items", "sentiment_commentary", "topics_commentary"]
    })
}

fn commentary_context(aggregate: &SummaryAggregate) -> String {
    let sentiments = aggregate
        .sentiment_counts
        .iter()
        .map(|(s, n)| format!("{}: {n}", s.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    let topics = aggregate
        .topic_counts
        .iter()
        .map(|(t, n)| format!("{t}: {n}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "以下のアンケート分析結果データに基づき、プロのマーケティングアナリストとして、示唆に富んだレポート解説文を生成してください。\n\n\
# 分析対象\n{}\n\n\
# 感情分析結果 (件数)\n{sentiments}\n\n\
# 主要トピック Top {TOP_TOPICS} (件数)\n{topics}\n",
        aggregate.analysis_target
    )
}

fn fallback_commentary() -> ReportCommentary {
    ReportCommentary {
        summary_text: COMMENTARY_FAILURE_TEXT.to_string(),
        action_items: vec!["N/A".to_string()],
        sentiment_commentary: COMMENTARY_FAILURE_TEXT.to_string(),
        topics_commentary: COMMENTARY_FAILURE_TEXT.to_string(),
    }
}

/// Generate narrative commentary for an aggregate. Best effort: any client
/// failure yields the fixed fallback commentary, never an error.
pub async fn annotate(
    client: &dyn ModelClient,
    aggregate: &SummaryAggregate,
    model: &str,
) -> ReportCommentary {
    let request = CompletionRequest {
        model: model.to_string(),
        system: COMMENTARY_SYSTEM_PROMPT.to_string(),
        user: commentary_context(aggregate),
        schema_name: "report_commentary",
        schema: commentary_schema(),
        max_retries: 2,
    };
    match extract::<ReportCommentary>(client, request).await {
        Ok(commentary) => commentary,
        Err(e) => {
            warn!(error = %e, "commentary generation failed, using fallback");
            fallback_commentary()
        }
    }
}
