// src/model.rs
//! Data model for per-item analysis results and batch-level aggregates.
//!
//! Everything here is serde-serializable so the export sink can flatten rows
//! into tabular output without knowing the analysis internals.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Overall sentiment of one response. Closed set: the classification schema
/// instructs the model to pick exactly one of these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    /// Display order used by the report: positive, neutral, negative, mixed.
    pub const DISPLAY_ORDER: [Sentiment; 4] = [
        Sentiment::Positive,
        Sentiment::Neutral,
        Sentiment::Negative,
        Sentiment::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }
}

/// Structured insight extracted from a single survey response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyAnalysis {
    /// Overall sentiment, one of the four closed categories.
    pub sentiment: Sentiment,
    /// Key topics mentioned in the response, e.g. 価格 / デザイン / サポート体制.
    #[serde(default)]
    pub key_topics: Vec<String>,
    /// Representative sentence quoted from the original text.
    pub verbatim_quote: String,
    /// Whether the response contains concrete, actionable feedback.
    pub actionable_insight: bool,
}

/// The seven moderation categories, fixed by the moderation endpoint.
/// `ModerationCategories` and `ModerationScores` share this key set.
pub const MODERATION_CATEGORIES: [&str; 7] = [
    "hate",
    "hate_threatening",
    "self_harm",
    "sexual",
    "sexual_minors",
    "violence",
    "violence_graphic",
];

/// Per-category trigger flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationCategories {
    pub hate: bool,
    #[serde(alias = "hate/threatening")]
    pub hate_threatening: bool,
    #[serde(alias = "self-harm")]
    pub self_harm: bool,
    pub sexual: bool,
    #[serde(alias = "sexual/minors")]
    pub sexual_minors: bool,
    pub violence: bool,
    #[serde(alias = "violence/graphic")]
    pub violence_graphic: bool,
}

impl ModerationCategories {
    /// Flags in `MODERATION_CATEGORIES` order.
    pub fn flags(&self) -> [(&'static str, bool); 7] {
        [
            ("hate", self.hate),
            ("hate_threatening", self.hate_threatening),
            ("self_harm", self.self_harm),
            ("sexual", self.sexual),
            ("sexual_minors", self.sexual_minors),
            ("violence", self.violence),
            ("violence_graphic", self.violence_graphic),
        ]
    }
}

/// Per-category scores, parallel to the trigger flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationScores {
    pub hate: f64,
    #[serde(alias = "hate/threatening")]
    pub hate_threatening: f64,
    #[serde(alias = "self-harm")]
    pub self_harm: f64,
    pub sexual: f64,
    #[serde(alias = "sexual/minors")]
    pub sexual_minors: f64,
    pub violence: f64,
    #[serde(alias = "violence/graphic")]
    pub violence_graphic: f64,
}

/// Moderation outcome for one text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub categories: ModerationCategories,
    pub category_scores: ModerationScores,
}

/// Primary emotion scores for a text, each nominally in 0..=5. The rubric
/// instructs the model to stay in range; the engine does not clamp (external
/// trust boundary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmotionScores {
    pub joy: f64,
    pub sadness: f64,
    pub fear: f64,
    pub surprise: f64,
    pub anger: f64,
    pub disgust: f64,
    /// Free-text rationale for the scores as a whole.
    pub reason: String,
}

impl EmotionScores {
    /// The six axes in fixed report order.
    pub fn axes(&self) -> [(&'static str, f64); 6] {
        [
            ("joy", self.joy),
            ("sadness", self.sadness),
            ("fear", self.fear),
            ("surprise", self.surprise),
            ("anger", self.anger),
            ("disgust", self.disgust),
        ]
    }
}

/// Combined record produced for every item: classification, moderation and
/// emotion scoring joined together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAnalysis {
    pub survey: SurveyAnalysis,
    pub moderation: ModerationVerdict,
    pub emotions: EmotionScores,
}

/// Result for one item. Fallback still carries a fully populated record so
/// aggregation treats every row uniformly; `reason` says why the real
/// analysis was not obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PerItemResult {
    Success(ItemAnalysis),
    Fallback { reason: String, record: ItemAnalysis },
}

impl PerItemResult {
    /// The analysis record regardless of variant.
    pub fn record(&self) -> &ItemAnalysis {
        match self {
            PerItemResult::Success(record) => record,
            PerItemResult::Fallback { record, .. } => record,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PerItemResult::Fallback { .. })
    }
}

/// One row of the batch output: the raw response text paired with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedItem {
    pub text: String,
    pub result: PerItemResult,
}

/// Index-aligned batch output: `rows[i]` always corresponds to input `i`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultTable {
    pub rows: Vec<AnalyzedItem>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Flatten each row into a single JSON object with `analysis_*`,
    /// `moderation_*` and `emotion_*` prefixed columns, for the tabular
    /// export sink.
    pub fn to_rows(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|item| {
                let record = item.result.record();
                let mut row = Map::new();
                row.insert("text".into(), json!(item.text));
                row.insert("fallback".into(), json!(item.result.is_fallback()));
                row.insert(
                    "analysis_sentiment".into(),
                    json!(record.survey.sentiment.as_str()),
                );
                row.insert("analysis_key_topics".into(), json!(record.survey.key_topics));
                row.insert(
                    "analysis_verbatim_quote".into(),
                    json!(record.survey.verbatim_quote),
                );
                row.insert(
                    "analysis_actionable_insight".into(),
                    json!(record.survey.actionable_insight),
                );
                row.insert("moderation_flagged".into(), json!(record.moderation.flagged));
                for (name, flag) in record.moderation.categories.flags() {
                    row.insert(format!("moderation_categories_{name}"), json!(flag));
                }
                for (name, score) in [
                    ("hate", record.moderation.category_scores.hate),
                    (
                        "hate_threatening",
                        record.moderation.category_scores.hate_threatening,
                    ),
                    ("self_harm", record.moderation.category_scores.self_harm),
                    ("sexual", record.moderation.category_scores.sexual),
                    (
                        "sexual_minors",
                        record.moderation.category_scores.sexual_minors,
                    ),
                    ("violence", record.moderation.category_scores.violence),
                    (
                        "violence_graphic",
                        record.moderation.category_scores.violence_graphic,
                    ),
                ] {
                    row.insert(format!("moderation_category_scores_{name}"), json!(score));
                }
                for (name, score) in record.emotions.axes() {
                    row.insert(format!("emotion_{name}"), json!(score));
                }
                row.insert("emotion_reason".into(), json!(record.emotions.reason));
                Value::Object(row)
            })
            .collect()
    }
}

/// Word lists feeding the three word clouds. Neutral texts intentionally
/// appear in both the positive and negative sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordcloudWords {
    pub all: Vec<String>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

/// Read-only batch summary derived from a completed [`ResultTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryAggregate {
    /// Sentiment histogram in display order, zero-filled for absent
    /// categories.
    pub sentiment_counts: Vec<(Sentiment, usize)>,
    /// Topic frequencies, descending, truncated to the top 15. Ties keep
    /// first-seen order.
    pub topic_counts: Vec<(String, usize)>,
    /// Count of rows that triggered each moderation category.
    pub moderation_totals: Vec<(String, usize)>,
    /// Arithmetic mean per emotion axis over all rows, fallback zeros
    /// included.
    pub emotion_means: Vec<(String, f64)>,
    pub wordcloud: WordcloudWords,
    /// Label of the analyzed column, e.g. 「自由記述」列の回答.
    pub analysis_target: String,
}

/// Narrative commentary generated from a [`SummaryAggregate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCommentary {
    /// Three-point overall summary.
    pub summary_text: String,
    /// Suggested next actions (the prompt asks for exactly three).
    pub action_items: Vec<String>,
    /// Commentary on the sentiment pie chart.
    pub sentiment_commentary: String,
    /// Commentary on the key-topics bar chart.
    pub topics_commentary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(sentiment: Sentiment) -> ItemAnalysis {
        ItemAnalysis {
            survey: SurveyAnalysis {
                sentiment,
                key_topics: vec!["価格".into()],
                verbatim_quote: "値段が手頃で良い".into(),
                actionable_insight: false,
            },
            moderation: ModerationVerdict::default(),
            emotions: EmotionScores::default(),
        }
    }

    #[test]
    fn sentiment_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Sentiment::Mixed).unwrap(),
            "\"mixed\""
        );
        let back: Sentiment = serde_json::from_str("\"positive\"").unwrap();
        assert_eq!(back, Sentiment::Positive);
    }

    #[test]
    fn moderation_aliases_accept_api_key_names() {
        let raw = r#"{
            "hate": false,
            "hate/threatening": true,
            "self-harm": false,
            "sexual": false,
            "sexual/minors": false,
            "violence": false,
            "violence/graphic": false
        }"#;
        let cats: ModerationCategories = serde_json::from_str(raw).unwrap();
        assert!(cats.hate_threatening);
        assert!(!cats.violence);
    }

    #[test]
    fn flattened_row_carries_prefixed_columns() {
        let table = ResultTable {
            rows: vec![AnalyzedItem {
                text: "価格に満足しています".into(),
                result: PerItemResult::Success(sample_record(Sentiment::Positive)),
            }],
        };
        let rows = table.to_rows();
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_object().unwrap();
        assert_eq!(row["analysis_sentiment"], "positive");
        assert_eq!(row["moderation_categories_hate"], false);
        assert_eq!(row["emotion_joy"], 0.0);
        assert_eq!(row["fallback"], false);
    }
}
