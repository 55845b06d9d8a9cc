// src/client.rs
//! Model-service client: structured chat completions + moderation.
//!
//! The trait keeps the engine testable; `OpenAiClient` is the production
//! implementation and `MockClient` the deterministic one used by tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::model::{EmotionScores, ModerationVerdict, Sentiment, SurveyAnalysis};

/// One structured-completion request. The schema is enforced server-side via
/// `response_format: json_schema`; `max_retries` re-attempts cover transient
/// transport and throttling failures.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub schema_name: &'static str,
    pub schema: Value,
    pub max_retries: u32,
}

/// Abstract model service: typed-JSON completions and content moderation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run a structured completion and return the parsed JSON payload.
    async fn complete(&self, request: CompletionRequest) -> Result<Value, ClientError>;

    /// Moderate one text.
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, ClientError>;

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Completion + deserialization into the caller's type. Payloads that parse
/// as JSON but miss the schema surface as `ClientError::Schema`.
pub async fn extract<T: DeserializeOwned>(
    client: &dyn ModelClient,
    request: CompletionRequest,
) -> Result<T, ClientError> {
    let value = client.complete(request).await?;
    serde_json::from_value(value).map_err(|e| ClientError::Schema(e.to_string()))
}

// ------------------------------------------------------------
// OpenAI implementation
// ------------------------------------------------------------

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODERATIONS_URL: &str = "https://api.openai.com/v1/moderations";
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// OpenAI client over the Chat Completions and Moderations APIs.
/// Requires an API key.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("survey-insight/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key: api_key.into(),
        }
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<Value, ClientError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct JsonSchema<'a> {
            name: &'a str,
            schema: &'a Value,
            strict: bool,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            json_schema: JsonSchema<'a>,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat<'a>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &request.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &request.system,
                },
                Msg {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchema {
                    name: request.schema_name,
                    schema: &request.schema,
                    strict: false,
                },
            },
        };

        let resp = self
            .http
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body: Resp = decode_body(&resp.text().await?)?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        serde_json::from_str(content).map_err(|e| ClientError::Schema(e.to_string()))
    }

    async fn moderate_once(&self, text: &str) -> Result<ModerationVerdict, ClientError> {
        #[derive(Serialize)]
        struct Req<'a> {
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            results: Vec<ModerationVerdict>,
        }

        let resp = self
            .http
            .post(MODERATIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&Req { input: text })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body: Resp = decode_body(&resp.text().await?)?;
        body.results
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Schema("moderation response had no results".into()))
    }
}

/// A 2xx response whose body does not parse is a schema-class failure, not a
/// transport one, so it must not trip the retry loop.
fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    serde_json::from_str(body).map_err(|e| ClientError::Schema(e.to_string()))
}

/// Retry loop shared by both endpoints: `max_retries` re-attempts on
/// retryable failures, short fixed backoff between attempts.
async fn with_retries<T, F, Fut>(max_retries: u32, mut attempt: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Ok(out) => return Ok(out),
            Err(e) if e.is_retryable() && tries < max_retries => {
                tries += 1;
                warn!(error = %e, attempt = tries, "model call failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Value, ClientError> {
        if self.api_key.is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        debug!(model = %request.model, schema = request.schema_name, "structured completion");
        with_retries(request.max_retries, || self.complete_once(&request)).await
    }

    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, ClientError> {
        if self.api_key.is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        // Same retry budget as the instructor-style completion calls.
        with_retries(2, || self.moderate_once(text)).await
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Mock client for tests and local runs
// ------------------------------------------------------------

/// Deterministic client for tests. Counts calls, optionally fails for
/// texts containing a marker, simulates latency, and tracks how many
/// moderation calls are in flight at once (one per item phase, so the
/// high-water mark observes the scheduler's concurrency cap).
pub struct MockClient {
    pub survey: SurveyAnalysis,
    pub emotions: EmotionScores,
    pub verdict: ModerationVerdict,
    pub commentary: Value,
    /// Any request whose user content contains this marker fails with a 500.
    pub fail_marker: Option<String>,
    pub latency: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            survey: SurveyAnalysis {
                sentiment: Sentiment::Positive,
                key_topics: vec!["価格".into()],
                verbatim_quote: "価格に満足しています".into(),
                actionable_insight: false,
            },
            emotions: EmotionScores {
                joy: 3.0,
                reason: "前向きな表現が多い".into(),
                ..EmotionScores::default()
            },
            verdict: ModerationVerdict::default(),
            commentary: serde_json::json!({
                "summary_text": "要約",
                "action_items": ["a", "b", "c"],
                "sentiment_commentary": "感情の解説",
                "topics_commentary": "トピックの解説",
            }),
            fail_marker: None,
            latency: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            ..Self::default()
        }
    }

    /// Simulated per-call latency, for scheduling tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total number of service calls issued (completions + moderations).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently in-flight moderation calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, user: &str) -> bool {
        self.fail_marker
            .as_deref()
            .map(|m| user.contains(m))
            .unwrap_or(false)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ModelClient for MockClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Value, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.should_fail(&request.user) {
            return Err(ClientError::Api {
                status: 500,
                message: "mock failure".into(),
            });
        }
        let payload = match request.schema_name {
            "survey_response_analysis" => serde_json::to_value(&self.survey),
            "emotion_scores" => serde_json::to_value(&self.emotions),
            "report_commentary" => Ok(self.commentary.clone()),
            other => {
                return Err(ClientError::Schema(format!("unexpected schema {other}")));
            }
        };
        payload.map_err(|e| ClientError::Schema(e.to_string()))
    }

    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pause().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.should_fail(text) {
            return Err(ClientError::Api {
                status: 500,
                message: "mock failure".into(),
            });
        }
        Ok(self.verdict.clone())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn extract_reports_schema_mismatch() {
        let mock = Arc::new(MockClient::new());
        let req = CompletionRequest {
            model: "gpt-4o-mini".into(),
            system: "sys".into(),
            user: "user".into(),
            schema_name: "survey_response_analysis",
            schema: serde_json::json!({}),
            max_retries: 0,
        };
        // Survey payload does not deserialize as EmotionScores.
        let out: Result<EmotionScores, _> = extract(mock.as_ref(), req).await;
        assert!(matches!(out, Err(ClientError::Schema(_))));
    }

    #[tokio::test]
    async fn mock_counts_every_call() {
        let mock = MockClient::new();
        let _ = mock.moderate("問題ありません").await.unwrap();
        let _ = mock.moderate("こちらも").await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failure() {
        let attempts = AtomicUsize::new(0);
        let out = with_retries(2, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ClientError::Api {
                        status: 503,
                        message: "busy".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_budget_allows_exactly_three_attempts() {
        let attempts = AtomicUsize::new(0);
        let out: Result<(), ClientError> = with_retries(2, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClientError::Api {
                    status: 503,
                    message: "busy".into(),
                })
            }
        })
        .await;
        assert!(matches!(out, Err(ClientError::Api { status: 503, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_on_first_attempt() {
        let attempts = AtomicUsize::new(0);
        let out: Result<(), ClientError> = with_retries(2, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Schema("bad payload".into())) }
        })
        .await;
        assert!(matches!(out, Err(ClientError::Schema(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undecodable_success_body_is_schema_not_transport() {
        let out = decode_body::<ModerationVerdict>("<html>bad gateway</html>");
        let err = out.unwrap_err();
        assert!(matches!(err, ClientError::Schema(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(ClientError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ClientError::Schema("bad".into()).is_retryable());
        assert!(!ClientError::MissingApiKey.is_retryable());
    }
}
