// src/scheduler.rs
//! Bounded-concurrency batch scheduler: the fan-out/fan-in core.
//!
//! One task per item is spawned immediately; a semaphore of
//! `max_concurrent_tasks` permits gates the network-calling phase. Tasks
//! complete in arbitrary order and the fan-in loop writes each result back
//! at its origin index, so the output table always lines up with the input.
//! Progress is reported from that single loop, which serializes sink calls
//! without the sink needing its own locking.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::analyzer::ItemAnalyzer;
use crate::error::BatchError;
use crate::model::{AnalyzedItem, PerItemResult, ResultTable};

/// Receives batch progress as a percentage in [0, 100]. Fire-and-forget;
/// invoked from the scheduler's fan-in loop, never concurrently.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, percent: f64);
}

/// Blanket impl so plain closures work as sinks.
impl<F: Fn(f64) + Send + Sync> ProgressSink for F {
    fn notify(&self, percent: f64) {
        self(percent)
    }
}

/// Analyze `texts` under a concurrency cap, preserving input order.
///
/// Item-level failures never abort the batch — the analyzer already folds
/// them into fallback rows. Errors here are structural: a zero concurrency
/// limit, or a task that could not run to completion (the only case where a
/// partial table is possible, and it is not returned).
///
/// Dropping the returned future aborts all outstanding analysis tasks.
pub async fn run_batch(
    analyzer: Arc<ItemAnalyzer>,
    texts: Vec<String>,
    max_concurrent_tasks: usize,
    progress: Option<Arc<dyn ProgressSink>>,
) -> Result<ResultTable, BatchError> {
    if max_concurrent_tasks == 0 {
        return Err(BatchError::Config);
    }

    let total = texts.len();
    if total == 0 {
        return Ok(ResultTable::default());
    }

    info!(total, max_concurrent_tasks, "starting analysis batch");

    let semaphore = Arc::new(Semaphore::new(max_concurrent_tasks));
    let mut tasks: JoinSet<Result<(usize, PerItemResult), BatchError>> = JoinSet::new();

    for (index, text) in texts.iter().cloned().enumerate() {
        let analyzer = Arc::clone(&analyzer);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            // Permit scopes exactly the network-calling phase of one item.
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| BatchError::Cancelled)?;
            let result = analyzer.analyze(&text).await;
            Ok((index, result))
        });
    }

    let mut slots: Vec<Option<PerItemResult>> = (0..total).map(|_| None).collect();
    let mut finished = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined??;
        debug!(index, fallback = result.is_fallback(), "item finished");
        slots[index] = Some(result);
        finished += 1;
        if let Some(sink) = &progress {
            sink.notify(finished as f64 * 100.0 / total as f64);
        }
    }

    let rows = texts
        .into_iter()
        .zip(slots)
        .map(|(text, slot)| {
            slot.map(|result| AnalyzedItem { text, result })
                .ok_or(BatchError::Cancelled)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(total, "analysis batch complete");
    Ok(ResultTable { rows })
}
