// src/bootstrap.rs
//! Wires settings, client, tokenizers and analyzer into one runtime handle.
//! This is the surface the report/export collaborators call into.

use std::sync::Arc;

use tracing::info;

use crate::aggregate;
use crate::analyzer::ItemAnalyzer;
use crate::client::{ModelClient, OpenAiClient};
use crate::config::AppSettings;
use crate::error::{BatchError, TokenizeError};
use crate::model::{ReportCommentary, ResultTable, SummaryAggregate};
use crate::scheduler::{run_batch, ProgressSink};
use crate::tokenize::TokenizerRegistry;

pub struct AnalysisRuntime {
    pub settings: AppSettings,
    client: Arc<dyn ModelClient>,
    tokenizers: Arc<TokenizerRegistry>,
    analyzer: Arc<ItemAnalyzer>,
}

impl AnalysisRuntime {
    /// Build the production runtime (OpenAI-backed) from settings.
    pub fn new(settings: AppSettings) -> Self {
        let client: Arc<dyn ModelClient> = Arc::new(OpenAiClient::new(settings.api_key.clone()));
        Self::with_client(settings, client)
    }

    /// Build with an explicit client, for tests and alternative providers.
    pub fn with_client(settings: AppSettings, client: Arc<dyn ModelClient>) -> Self {
        info!(
            provider = client.provider_name(),
            model = %settings.model,
            max_concurrent_tasks = settings.max_concurrent_tasks,
            split_mode = %settings.split_mode,
            "analysis runtime ready"
        );
        let tokenizers = Arc::new(TokenizerRegistry::new());
        let analyzer = Arc::new(ItemAnalyzer::new(
            Arc::clone(&client),
            Arc::clone(&tokenizers),
            settings.split_mode,
            settings.model.clone(),
        ));
        Self {
            settings,
            client,
            tokenizers,
            analyzer,
        }
    }

    /// Analyze a batch of texts under the configured concurrency cap.
    pub async fn run_batch(
        &self,
        texts: Vec<String>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<ResultTable, BatchError> {
        run_batch(
            Arc::clone(&self.analyzer),
            texts,
            self.settings.max_concurrent_tasks,
            progress,
        )
        .await
    }

    /// Reduce a completed table into the report aggregate.
    pub fn summarize(
        &self,
        table: &ResultTable,
        analysis_target: impl Into<String>,
    ) -> Result<SummaryAggregate, TokenizeError> {
        aggregate::summarize(table, &self.tokenizers, analysis_target)
    }

    /// Best-effort commentary over an aggregate.
    pub async fn annotate(&self, summary: &SummaryAggregate) -> ReportCommentary {
        aggregate::annotate(self.client.as_ref(), summary, &self.settings.model).await
    }
}
