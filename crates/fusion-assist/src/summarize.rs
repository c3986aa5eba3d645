//! Order-history summarizer.
//!
//! On every new order the user's full history is re-rendered and sent to
//! the completion provider, and the reply replaces the user's single
//! `order_summaries` row. Users without orders never get a row.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use fusion_core::completion::CompletionProvider;
use fusion_core::models::OrderSummary;
use fusion_core::prompt::{render_order_history, summary_prompt};
use fusion_core::store::Store;

use crate::http::bounded;

#[derive(Clone)]
pub struct Summarizer {
    store: Arc<dyn Store>,
    completer: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

/// Outcome counts of [`Summarizer::backfill`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Coverage of summaries over users with orders.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    pub users_with_orders: Vec<i64>,
    pub summaries: Vec<OrderSummary>,
    /// Users with orders but no summary row.
    pub missing: Vec<i64>,
}

impl Summarizer {
    pub fn new(
        store: Arc<dyn Store>,
        completer: Arc<dyn CompletionProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            completer,
            timeout,
        }
    }

    /// Rebuild and upsert the user's summary. `Ok(None)` if they have no orders.
    pub async fn resummarize(&self, user_id: i64) -> fusion_core::Result<Option<OrderSummary>> {
        let orders = self.store.orders_for_user(user_id).await?;
        if orders.is_empty() {
            tracing::info!(user_id, "no orders; summary not generated");
            return Ok(None);
        }

        let prompt = summary_prompt(&render_order_history(&orders));
        let text = bounded(
            "summarize",
            self.timeout,
            self.completer.complete_prompt(&prompt),
        )
        .await?;

        let summary = self
            .store
            .upsert_order_summary(user_id, text.trim())
            .await?;
        tracing::info!(user_id, orders = orders.len(), "order summary updated");
        Ok(Some(summary))
    }

    /// Regenerate summaries for every user with orders, `concurrency` at a time.
    pub async fn backfill(&self, concurrency: usize) -> anyhow::Result<BackfillReport> {
        let users = self.store.users_with_orders().await?;
        tracing::info!(users = users.len(), "backfilling order summaries");

        let outcomes: Vec<_> = stream::iter(users)
            .map(|user_id| async move { (user_id, self.resummarize(user_id).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = BackfillReport::default();
        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(Some(_)) => report.generated += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "summary generation failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn coverage(&self) -> anyhow::Result<CoverageReport> {
        let users_with_orders = self.store.users_with_orders().await?;
        let summaries = self.store.list_order_summaries().await?;
        let missing = users_with_orders
            .iter()
            .copied()
            .filter(|id| !summaries.iter().any(|s| s.user_id == *id))
            .collect();
        Ok(CoverageReport {
            users_with_orders,
            summaries,
            missing,
        })
    }
}
