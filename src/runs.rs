use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::Store;

/// Print recent run history, newest first.
pub async fn list_runs(config: &Config, source_id: Option<&str>, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = Store::new(pool);

    let runs = store.recent_runs(source_id, limit).await?;
    if runs.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }

    println!(
        "{:<36} {:<16} {:<10} {:<12} {:>9} {:>8} {:>7} {:>8} ERROR",
        "RUN", "SOURCE", "STATUS", "MODE", "PROCESSED", "SKIPPED", "FAILED", "QUALITY"
    );
    for run in runs {
        println!(
            "{:<36} {:<16} {:<10} {:<12} {:>9} {:>8} {:>7} {:>8.3} {}",
            run.run_id,
            run.source_id,
            run.status.as_str(),
            run.sync_mode.as_str(),
            run.records_processed,
            run.records_skipped,
            run.records_failed,
            run.data_quality_score,
            run.error.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
