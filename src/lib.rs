// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod aggregate;
pub mod analyzer;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod tokenize;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{annotate, summarize, COMMENTARY_FAILURE_TEXT};
pub use crate::analyzer::ItemAnalyzer;
pub use crate::bootstrap::AnalysisRuntime;
pub use crate::client::{extract, CompletionRequest, MockClient, ModelClient, OpenAiClient};
pub use crate::config::AppSettings;
pub use crate::error::{BatchError, ClientError, TokenizeError};
pub use crate::model::{
    AnalyzedItem, EmotionScores, ItemAnalysis, ModerationVerdict, PerItemResult,
    ReportCommentary, ResultTable, Sentiment, SummaryAggregate, SurveyAnalysis,
};
pub use crate::scheduler::{run_batch, ProgressSink};
pub use crate::tokenize::{SplitMode, Tokenizer, TokenizerRegistry};

/// Initialize tracing for demos and ad-hoc runs; honors RUST_LOG.
/// Safe to call more than once — later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
