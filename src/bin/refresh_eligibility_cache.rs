// Small ops utility: run one full shipment eligibility cache refresh.
//
// Usage:
//   cargo run --bin refresh_eligibility_cache -- [db_path] [chunk_size]
//
// Does not start the sync worker or the refresh ticker.

use shipping_ops::config::{get_default_db_path, ConfigManager, EligibilityConfigReader};
use shipping_ops::db::{ensure_schema, open_sqlite_connection};
use shipping_ops::logging;
use shipping_ops::services::{EligibilityCacheRefreshService, RefreshTrigger};
use std::sync::{Arc, Mutex};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let db_path = args
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone());
    let chunk_size = match args.next().and_then(|s| s.trim().parse::<usize>().ok()) {
        Some(n) => n,
        None => config.get_refresh_chunk_size().await.map_err(|e| anyhow::anyhow!(e))?,
    };
    let retention_days = config
        .get_refresh_log_retention_days()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let service = EligibilityCacheRefreshService::new(conn)
        .with_chunk_size(chunk_size)
        .with_log_retention_days(retention_days);
    let summary = service.refresh_all(
        RefreshTrigger::ManualRefresh,
        Some("refresh_eligibility_cache bin"),
    )?;

    println!("refresh_id={}", summary.refresh_id);
    println!(
        "orders={} single={} multiple={} none={} pruned={} logs_pruned={} duration_ms={}",
        summary.orders_evaluated,
        summary.single_count,
        summary.multiple_count,
        summary.none_count,
        summary.rows_pruned,
        summary.logs_pruned,
        summary.duration_ms
    );
    Ok(())
}
