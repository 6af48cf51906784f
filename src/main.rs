// ==========================================
// 订单发货管理系统 - 服务主入口
// ==========================================
// 启动流程:
// 1. 打开数据库并建表
// 2. 全量刷新发货资格缓存
// 3. 定时全量刷新 + 同步 worker（事件来自 stdin，每行一个 JSON）
// 4. stdin 关闭或 Ctrl-C 时退出
// ==========================================
//
// 用法:
//   shipping-ops [db_path]

use anyhow::{anyhow, Context};
use shipping_ops::config::{get_default_db_path, ConfigManager, EligibilityConfigReader};
use shipping_ops::db::{ensure_schema, open_sqlite_connection};
use shipping_ops::engine::{ChannelEventPublisher, ShipmentChangeEvent, ShipmentEventPublisher};
use shipping_ops::logging;
use shipping_ops::services::{EligibilityCacheRefreshService, RefreshTrigger, ShipmentSyncWorker};
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// 通道满时的重发次数
const PUBLISH_ATTEMPTS: u32 = 20;
const PUBLISH_BACKOFF_MS: u64 = 25;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} 系统版本: {}", shipping_ops::APP_NAME, shipping_ops::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let conn = open_sqlite_connection(&db_path).with_context(|| format!("无法打开数据库: {}", db_path))?;
    ensure_schema(&conn).context("建表失败")?;
    let conn = Arc::new(Mutex::new(conn));

    // 读取配置
    let config = ConfigManager::from_connection(conn.clone());
    let interval_secs = config.get_refresh_interval_secs().await.map_err(|e| anyhow!(e))?;
    let chunk_size = config.get_refresh_chunk_size().await.map_err(|e| anyhow!(e))?;
    let capacity = config.get_sync_channel_capacity().await.map_err(|e| anyhow!(e))?;
    let max_retries = config.get_sync_max_retries().await.map_err(|e| anyhow!(e))?;
    let retention_days = config.get_refresh_log_retention_days().await.map_err(|e| anyhow!(e))?;
    tracing::info!(interval_secs, chunk_size, capacity, max_retries, retention_days, "配置加载完成");

    // 启动时全量刷新
    let refresh = Arc::new(
        EligibilityCacheRefreshService::new(conn.clone())
            .with_chunk_size(chunk_size)
            .with_log_retention_days(retention_days),
    );
    {
        let refresh = Arc::clone(&refresh);
        tokio::task::spawn_blocking(move || refresh.refresh_all(RefreshTrigger::ManualRefresh, Some("startup")))
            .await
            .context("启动刷新任务异常退出")??;
    }

    // 同步 worker
    let (tx, rx) = mpsc::channel::<ShipmentChangeEvent>(capacity);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = Arc::new(ShipmentSyncWorker::new(conn.clone(), max_retries));
    let worker_handle = tokio::spawn(worker.run_until(rx, async move {
        let _ = stop_rx.await;
    }));

    let ticker_handle = tokio::spawn(run_refresh_ticker(Arc::clone(&refresh), interval_secs));

    // stdin 读取阻塞且不可取消，放在独立线程；退出时不等待它
    let (eof_tx, eof_rx) = oneshot::channel::<usize>();
    std::thread::Builder::new()
        .name("stdin-events".to_string())
        .spawn(move || {
            let lines = read_events_from_stdin(ChannelEventPublisher::new(tx));
            let _ = eof_tx.send(lines);
        })
        .context("无法启动 stdin 读取线程")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => tracing::info!("收到 Ctrl-C，准备退出"),
                Err(e) => tracing::warn!(error = %e, "监听 Ctrl-C 失败，准备退出"),
            }
        }
        read = eof_rx => {
            match read {
                Ok(lines) => tracing::info!(lines, "stdin 已关闭，准备退出"),
                Err(_) => tracing::error!("stdin 读取线程异常退出"),
            }
        }
    }

    // 通知 worker 关闭接收端 → 处理完积压事件后退出
    ticker_handle.abort();
    let _ = stop_tx.send(());
    let stats = worker_handle.await.context("同步 worker 异常退出")?;
    tracing::info!(
        processed = stats.processed,
        failed = stats.failed,
        retried = stats.retried,
        "服务已退出"
    );
    Ok(())
}

/// 定时全量刷新
async fn run_refresh_ticker(refresh: Arc<EligibilityCacheRefreshService>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    // 第一次 tick 立即触发，启动时已经刷新过
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let refresh = Arc::clone(&refresh);
        let outcome =
            tokio::task::spawn_blocking(move || refresh.refresh_all(RefreshTrigger::Scheduled, Some("ticker")))
                .await;
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "定时刷新失败"),
            Err(e) => tracing::error!(error = %e, "定时刷新任务异常退出"),
        }
    }
}

/// 逐行读取 stdin 事件并发布（在专用线程上运行）
///
/// # 返回
/// - 读取的行数
fn read_events_from_stdin(publisher: ChannelEventPublisher) -> usize {
    let stdin = std::io::stdin();
    let mut count = 0usize;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "读取 stdin 失败");
                break;
            }
        };
        count += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ShipmentChangeEvent>(line) {
            Ok(event) => {
                if !publish_with_backoff(&publisher, event) {
                    // worker 已关闭接收端，不再读取
                    break;
                }
            }
            Err(e) => tracing::warn!(line = count, error = %e, "事件格式错误，已跳过"),
        }
    }

    count
}

/// 通道满时退避重发
///
/// # 返回
/// - false: 通道已关闭
fn publish_with_backoff(publisher: &ChannelEventPublisher, event: ShipmentChangeEvent) -> bool {
    for attempt in 1..=PUBLISH_ATTEMPTS {
        if publisher.is_closed() {
            tracing::warn!(event = event.kind(), "事件通道已关闭，事件丢弃");
            return false;
        }
        match publisher.publish(event.clone()) {
            Ok(()) => return true,
            Err(e) if attempt < PUBLISH_ATTEMPTS => {
                tracing::debug!(attempt, error = %e, "事件发布失败，稍后重发");
                std::thread::sleep(Duration::from_millis(PUBLISH_BACKOFF_MS));
            }
            Err(e) => {
                tracing::error!(event = event.kind(), error = %e, "事件发布失败，已丢弃");
            }
        }
    }
    true
}
