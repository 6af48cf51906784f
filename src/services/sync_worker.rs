// ==========================================
// 订单发货管理系统 - 发货单变更同步 Worker
// ==========================================
// 职责: 消费 ShipmentChangeEvent，落库后刷新受影响订单的资格缓存
// 说明: tokio mpsc 通道驱动；单个事件失败只记日志、按配置重试，不中断循环
// ==========================================

use crate::domain::eligibility::EligibilitySnapshot;
use crate::engine::events::ShipmentChangeEvent;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::shipment_repo::ShipmentRepository;
use crate::services::cache_refresh::{EligibilityCacheRefreshService, RefreshTrigger};
use rusqlite::Connection;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// 重试间隔基数（毫秒），第 n 次重试等待 n 倍
const RETRY_BACKOFF_MS: u64 = 50;

/// Worker 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncWorkerStats {
    pub processed: usize,
    pub failed: usize,
    pub retried: usize,
}

// ==========================================
// ShipmentSyncWorker
// ==========================================
pub struct ShipmentSyncWorker {
    shipments: ShipmentRepository,
    refresh: EligibilityCacheRefreshService,
    max_retries: u32,
}

impl ShipmentSyncWorker {
    pub fn new(conn: Arc<Mutex<Connection>>, max_retries: u32) -> Self {
        Self {
            shipments: ShipmentRepository::from_connection(conn.clone()),
            refresh: EligibilityCacheRefreshService::new(conn),
            max_retries,
        }
    }

    /// 处理单个事件
    ///
    /// # 返回
    /// - Ok(Some(snapshot)): 受影响订单的最新快照
    /// - Ok(None): 订单已完结，缓存行已清理
    /// - Err: 处理失败（由 `is_retryable` 判定是否值得重试）
    pub fn handle_event(&self, event: &ShipmentChangeEvent) -> RepositoryResult<Option<EligibilitySnapshot>> {
        match event {
            ShipmentChangeEvent::ShipmentUpserted { payload } => {
                let shipment = payload.to_shipment().ok_or_else(|| {
                    RepositoryError::ValidationError("发货单变更缺少 shipmentId".to_string())
                })?;

                let previous_owner = self.shipments.find_order_number(&shipment.id)?;

                // 负载未带订单号时沿用库中已有的归属
                let order_number = match (payload.order_number(), previous_owner.as_deref()) {
                    (Some(order_number), _) => order_number.to_string(),
                    (None, Some(owner)) => owner.to_string(),
                    (None, None) => {
                        return Err(RepositoryError::ValidationError(format!(
                            "新发货单缺少 orderNumber: shipment_id={}",
                            shipment.id
                        )))
                    }
                };

                self.shipments.upsert_shipment(&order_number, &shipment)?;

                // 发货单改挂订单：原订单也要重算，否则缓存仍列着已移走的发货单
                if let Some(previous) = previous_owner.filter(|owner| *owner != order_number) {
                    tracing::debug!(
                        shipment_id = %shipment.id,
                        from = %previous,
                        to = %order_number,
                        "发货单改挂订单"
                    );
                    self.refresh.refresh_order(&previous, RefreshTrigger::ShipmentChanged)?;
                }
                self.refresh.refresh_order(&order_number, RefreshTrigger::ShipmentChanged)
            }
            ShipmentChangeEvent::TagAdded { shipment_id, name } => {
                let order_number = self.require_order_number(shipment_id)?;
                self.shipments.add_tag(shipment_id, name)?;
                self.refresh.refresh_order(&order_number, RefreshTrigger::TagChanged)
            }
            ShipmentChangeEvent::TagRemoved { shipment_id, name } => {
                let order_number = self.require_order_number(shipment_id)?;
                self.shipments.remove_tag(shipment_id, name)?;
                self.refresh.refresh_order(&order_number, RefreshTrigger::TagChanged)
            }
            ShipmentChangeEvent::OrderResync { order_number } => {
                self.refresh.refresh_order(order_number, RefreshTrigger::ManualRefresh)
            }
        }
    }

    fn require_order_number(&self, shipment_id: &str) -> RepositoryResult<String> {
        self.shipments
            .find_order_number(shipment_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Shipment".to_string(),
                id: shipment_id.to_string(),
            })
    }

    /// 数据问题重试无意义，只重试存储层的瞬时错误
    pub fn is_retryable(err: &RepositoryError) -> bool {
        matches!(
            err,
            RepositoryError::LockError(_)
                | RepositoryError::DatabaseConnectionError(_)
                | RepositoryError::DatabaseTransactionError(_)
                | RepositoryError::DatabaseQueryError(_)
        )
    }

    /// 运行事件循环，直到所有发送端关闭
    pub async fn run(self: Arc<Self>, rx: mpsc::Receiver<ShipmentChangeEvent>) -> SyncWorkerStats {
        self.run_until(rx, std::future::pending::<()>()).await
    }

    /// 运行事件循环，直到发送端全部关闭或 `shutdown` 完成
    ///
    /// 收到停止信号后关闭接收端，积压在通道里的事件仍会处理完再退出。
    pub async fn run_until<F>(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ShipmentChangeEvent>,
        shutdown: F,
    ) -> SyncWorkerStats
    where
        F: Future<Output = ()>,
    {
        let mut stats = SyncWorkerStats::default();
        tracing::info!(max_retries = self.max_retries, "发货单同步 worker 已启动");

        tokio::pin!(shutdown);
        let mut closing = false;

        loop {
            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = &mut shutdown, if !closing => {
                    closing = true;
                    rx.close();
                    tracing::info!("收到停止信号，处理完积压事件后退出");
                    continue;
                }
            };
            Self::process_with_retry(&self, event, &mut stats).await;
        }

        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            retried = stats.retried,
            "发货单同步 worker 已停止"
        );
        stats
    }

    async fn process_with_retry(worker: &Arc<Self>, event: ShipmentChangeEvent, stats: &mut SyncWorkerStats) {
        let kind = event.kind();
        let event = Arc::new(event);
        let mut attempt: u32 = 0;

        loop {
            let handler = Arc::clone(worker);
            let job = Arc::clone(&event);
            // SQLite 调用是阻塞的，放到 blocking 线程池
            let outcome = tokio::task::spawn_blocking(move || handler.handle_event(&job)).await;

            match outcome {
                Ok(Ok(snapshot)) => {
                    stats.processed += 1;
                    tracing::debug!(
                        event = kind,
                        classification = ?snapshot.as_ref().map(|s| s.classification),
                        "同步事件处理完成"
                    );
                    return;
                }
                Ok(Err(e)) if Self::is_retryable(&e) && attempt < worker.max_retries => {
                    attempt += 1;
                    stats.retried += 1;
                    tracing::warn!(event = kind, attempt, error = %e, "同步事件处理失败，准备重试");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
                }
                Ok(Err(e)) => {
                    stats.failed += 1;
                    tracing::error!(event = kind, attempt, error = %e, "同步事件处理失败，已放弃");
                    return;
                }
                Err(join_err) => {
                    stats.failed += 1;
                    tracing::error!(event = kind, error = %join_err, "同步事件处理任务异常退出");
                    return;
                }
            }
        }
    }
}
