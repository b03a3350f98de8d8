//! Periodic full pass over every watched row.

use std::sync::Arc;

use futures::StreamExt;
use tokio::time::MissedTickBehavior;

use crate::PicsyncService;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepSummary {
    pub rows: usize,
    pub synced: usize,
    pub failed: usize,
}

/// Syncs every watched cell of every row once.
///
/// Rows within one watch run concurrently up to the configured bound;
/// a failing row is counted and logged, not fatal.
pub async fn run(service: &Arc<PicsyncService>) -> anyhow::Result<SweepSummary> {
    let concurrency = service.config().server.sweep_concurrency.max(1);
    let mut summary = SweepSummary::default();

    for watch in &service.config().watch {
        let rows = service.rows().list_rows(&watch.table).await?;
        summary.rows += rows.len();

        // Collected into a Vec first to sidestep rust-lang/rust#102211:
        // passing the borrowing iterator adapter straight to stream::iter
        // fails the Send check when this future is tokio::spawn-ed.
        let tasks: Vec<_> = rows
            .iter()
            .map(|row| {
                let row_id = row.id.clone();
                async move { (row_id, service.sync_row(watch, row).await) }
            })
            .collect();
        let results: Vec<(String, anyhow::Result<()>)> = futures::stream::iter(tasks)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (row_id, result) in results {
            match result {
                Ok(()) => summary.synced += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        table = %watch.table,
                        row = %row_id,
                        "sweep sync failed: {e:#}"
                    );
                }
            }
        }
    }

    Ok(summary)
}

/// Runs `run` on the configured interval until aborted.
///
/// The first tick fires immediately, so startup always reconciles once.
/// A zero interval disables the sweep entirely.
pub async fn run_loop(service: Arc<PicsyncService>) {
    let secs = service.config().server.sweep_interval_secs;
    if secs == 0 {
        tracing::info!("periodic sweep disabled");
        return;
    }

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match run(&service).await {
            Ok(summary) => tracing::info!(
                rows = summary.rows,
                synced = summary.synced,
                failed = summary.failed,
                "sweep finished"
            ),
            Err(e) => tracing::warn!("sweep aborted: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PicsyncService;
    use crate::memory_test_config;

    #[tokio::test]
    async fn zero_interval_disables_the_loop() {
        let mut config = memory_test_config();
        config.server.sweep_interval_secs = 0;
        let service = PicsyncService::create(config).unwrap();

        // Returns instead of looping.
        run_loop(service).await;
    }

    #[tokio::test]
    async fn sweep_without_watches_is_empty() {
        let service = PicsyncService::create(memory_test_config()).unwrap();
        let summary = service.sweep().await.unwrap();
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.failed, 0);
    }
}
