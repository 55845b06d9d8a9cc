// src/analyzer.rs
//! Per-item analysis: one text in, one result out, never an error.
//!
//! Empty texts short-circuit to a no-response fallback without touching the
//! service. Otherwise three sub-requests run concurrently — structured
//! classification over the tokenized text, moderation and emotion scoring
//! over the raw text — and any one failing demotes the whole item to an
//! error fallback (all-or-nothing, flagged conservatively).

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::client::{extract, CompletionRequest, ModelClient};
use crate::model::{
    EmotionScores, ItemAnalysis, ModerationVerdict, PerItemResult, Sentiment, SurveyAnalysis,
};
use crate::tokenize::{join_surfaces, SplitMode, TokenizerRegistry};

/// Sentinel topic for empty/whitespace-only responses.
pub const NO_RESPONSE_TOPIC: &str = "無回答";
/// Sentinel topic for items whose analysis failed.
pub const ANALYSIS_ERROR_TOPIC: &str = "分析エラー";

const CLASSIFY_SYSTEM_PROMPT: &str =
    "あなたは優秀なマーケティングアナリストです。提供されたアンケートの回答を分析し、指定された形式で構造化してください。";
const EMOTION_SYSTEM_PROMPT: &str = "あなたは感情分析の専門家です。";

/// Retry budget per sub-request, matching the service client defaults.
const SUB_REQUEST_RETRIES: u32 = 2;

fn survey_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sentiment": {
                "type": "string",
                "enum": ["positive", "negative", "neutral", "mixed"],
                "description": "回答全体のセンチメント（感情極性）を4つのカテゴリのいずれかで判定します。"
            },
            "key_topics": {
                "type": "array",
                "items": {"type": "string"},
                "description": "回答で言及されている主要なトピックやテーマをリスト形式で抽出します。例：['価格', 'デザイン', 'サポート体制']"
            },
            "verbatim_quote": {
                "type": "string",
                "description": "分析内容を最もよく表している、原文からの代表的な一文を抜き出します。"
            },
            "actionable_insight": {
                "type": "boolean",
                "description": "この回答に、改善に繋がる具体的で実行可能な提案が含まれている場合はtrue、そうでなければfalseを返します。"
            }
        },
        "required": ["sentiment", "key_topics", "verbatim_quote", "actionable_insight"]
    })
}

fn emotion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "joy": {"type": "number", "description": "喜びのスコア (0-5)"},
            "sadness": {"type": "number", "description": "悲しみのスコア (0-5)"},
            "fear": {"type": "number", "description": "恐れのスコア (0-5)"},
            "surprise": {"type": "number", "description": "驚きのスコア (0-5)"},
            "anger": {"type": "number", "description": "怒りのスコア (0-5)"},
            "disgust": {"type": "number", "description": "嫌悪のスコア (0-5)"},
            "reason": {"type": "string", "description": "感情全体の理由"}
        },
        "required": ["joy", "sadness", "fear", "surprise", "anger", "disgust", "reason"]
    })
}

fn emotion_prompt(text: &str) -> String {
    format!(
        "あなたは感情分析の専門家です、文脈に注目して一次感情を抽出し、0から5の範囲で評価してください。\n\n\
【評価基準】\n\
0：感情が全く感じられない\n\
1：ごくわずかに感情が感じられる\n\
2：感情が弱めだが感じられる\n\
3：感情が明確に感じられる\n\
4：はっきりと強い感情が表出\n\
5：圧倒的で非常に強烈な感情\n\n\
【評価の重要原則】\n\
1. 純粋性：各感情は他の感情との混合ではなく、純粋な形で評価する。\n\
2. 文脈性：表現の背景にある状況や文脈を十分に考慮する。\n\
3. 総合性：言語表現と非言語的要素を総合的に判断する。\n\
4. 直接性：直接的な表現と間接的な表現の強度を適切に比較評価する。\n\
5. 文化考慮：日本語特有の遠回しな表現や皮肉、婉曲表現の文化的背景を考慮する。\n\n\
分析対象の文章:\n{text}\n\n\
各感情スコアと感情全体の理由を出力してください。"
    )
}

fn no_response_record() -> ItemAnalysis {
    ItemAnalysis {
        survey: SurveyAnalysis {
            sentiment: Sentiment::Neutral,
            key_topics: vec![NO_RESPONSE_TOPIC.to_string()],
            verbatim_quote: "N/A".to_string(),
            actionable_insight: false,
        },
        moderation: ModerationVerdict::default(),
        emotions: EmotionScores {
            reason: "N/A".to_string(),
            ..EmotionScores::default()
        },
    }
}

/// Error fallback: unanalyzable content is treated as suspect, so the
/// moderation flag is set even though every score stays zero.
fn error_record(reason: &str) -> ItemAnalysis {
    ItemAnalysis {
        survey: SurveyAnalysis {
            sentiment: Sentiment::Neutral,
            key_topics: vec![ANALYSIS_ERROR_TOPIC.to_string()],
            verbatim_quote: reason.to_string(),
            actionable_insight: false,
        },
        moderation: ModerationVerdict {
            flagged: true,
            ..ModerationVerdict::default()
        },
        emotions: EmotionScores {
            reason: reason.to_string(),
            ..EmotionScores::default()
        },
    }
}

/// Analyzes one survey response at a time. Cheap to share: holds `Arc`s to
/// the service client and tokenizer registry.
pub struct ItemAnalyzer {
    client: Arc<dyn ModelClient>,
    tokenizers: Arc<TokenizerRegistry>,
    split_mode: SplitMode,
    model: String,
}

impl ItemAnalyzer {
    pub fn new(
        client: Arc<dyn ModelClient>,
        tokenizers: Arc<TokenizerRegistry>,
        split_mode: SplitMode,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokenizers,
            split_mode,
            model: model.into(),
        }
    }

    /// Analyze one text. Infallible by design: every failure path produces a
    /// fallback record instead of an error.
    pub async fn analyze(&self, text: &str) -> PerItemResult {
        if text.trim().is_empty() {
            return PerItemResult::Fallback {
                reason: "empty response".to_string(),
                record: no_response_record(),
            };
        }

        let tokenized = match self
            .tokenizers
            .get(self.split_mode)
            .and_then(|tok| tok.tokenize(text))
        {
            Ok(tokens) => join_surfaces(&tokens),
            Err(e) => {
                warn!(error = %e, "tokenization failed, demoting item");
                return PerItemResult::Fallback {
                    reason: e.to_string(),
                    record: error_record(&e.to_string()),
                };
            }
        };

        let survey_req = CompletionRequest {
            model: self.model.clone(),
            system: CLASSIFY_SYSTEM_PROMPT.to_string(),
            user: tokenized,
            schema_name: "survey_response_analysis",
            schema: survey_schema(),
            max_retries: SUB_REQUEST_RETRIES,
        };
        let emotion_req = CompletionRequest {
            model: self.model.clone(),
            system: EMOTION_SYSTEM_PROMPT.to_string(),
            user: emotion_prompt(text),
            schema_name: "emotion_scores",
            schema: emotion_schema(),
            max_retries: SUB_REQUEST_RETRIES,
        };

        // All three must succeed; the first failure cancels the rest and
        // demotes the item.
        let joined = tokio::try_join!(
            extract::<SurveyAnalysis>(self.client.as_ref(), survey_req),
            self.client.moderate(text),
            extract::<EmotionScores>(self.client.as_ref(), emotion_req),
        );

        match joined {
            Ok((survey, moderation, emotions)) => PerItemResult::Success(ItemAnalysis {
                survey,
                moderation,
                emotions,
            }),
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "item analysis failed, using fallback");
                PerItemResult::Fallback {
                    record: error_record(&reason),
                    reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;

    fn analyzer_with(mock: Arc<MockClient>) -> ItemAnalyzer {
        ItemAnalyzer::new(
            mock,
            Arc::new(TokenizerRegistry::new()),
            SplitMode::B,
            "gpt-4o-mini",
        )
    }

    #[tokio::test]
    async fn whitespace_text_skips_the_service() {
        let mock = Arc::new(MockClient::new());
        let analyzer = analyzer_with(mock.clone());
        let result = analyzer.analyze("   ").await;
        assert!(result.is_fallback());
        assert_eq!(mock.call_count(), 0);
        let record = result.record();
        assert_eq!(record.survey.sentiment, Sentiment::Neutral);
        assert_eq!(record.survey.key_topics, vec![NO_RESPONSE_TOPIC]);
        assert_eq!(record.survey.verbatim_quote, "N/A");
        assert!(!record.moderation.flagged);
    }

    #[tokio::test]
    async fn successful_item_combines_three_requests() {
        let mock = Arc::new(MockClient::new());
        let analyzer = analyzer_with(mock.clone());
        let result = analyzer.analyze("価格に満足しています").await;
        assert!(!result.is_fallback());
        let record = result.record();
        assert_eq!(record.survey.sentiment, Sentiment::Positive);
        assert_eq!(record.emotions.joy, 3.0);
        // classification + moderation + emotion
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn failed_sub_request_demotes_whole_item() {
        let mock = Arc::new(MockClient::failing_on("サポート"));
        let analyzer = analyzer_with(mock);
        let result = analyzer.analyze("サポートの対応が遅い").await;
        assert!(result.is_fallback());
        let record = result.record();
        assert!(record.moderation.flagged, "error fallback is conservative");
        assert_eq!(record.survey.key_topics, vec![ANALYSIS_ERROR_TOPIC]);
        assert_eq!(record.emotions.joy, 0.0);
        // quote carries the error text
        assert!(record.survey.verbatim_quote.contains("500"));
    }
}
