// ==========================================
// 订单发货管理系统 - 发货资格缓存刷新服务
// ==========================================
// 职责: 刷新 shipment_eligibility_cache（读模型）
// 说明: 全量刷新与单订单刷新都在一个事务内完成，并写刷新日志
// 红线: 所有判定由 EligibilityEngine 完成，本服务只搬运快照
// ==========================================

use crate::domain::eligibility::EligibilitySnapshot;
use crate::domain::types::EligibilityClassification;
use crate::engine::EligibilityEngine;
use crate::repository::eligibility_cache_repo::EligibilityCacheRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::shipment_repo::ShipmentRepository;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::instrument;
use uuid::Uuid;

/// 刷新触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// 定时全量刷新
    Scheduled,
    /// 发货单新增/变更
    ShipmentChanged,
    /// 标签变更
    TagChanged,
    /// 手动刷新
    ManualRefresh,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Scheduled => "Scheduled",
            RefreshTrigger::ShipmentChanged => "ShipmentChanged",
            RefreshTrigger::TagChanged => "TagChanged",
            RefreshTrigger::ManualRefresh => "ManualRefresh",
        }
    }
}

/// 全量刷新结果摘要
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refresh_id: String,
    pub orders_evaluated: usize,
    pub single_count: usize,
    pub multiple_count: usize,
    pub none_count: usize,
    pub rows_pruned: usize,
    pub logs_pruned: usize,
    pub duration_ms: i64,
}

impl RefreshSummary {
    fn record(&mut self, classification: EligibilityClassification) {
        self.orders_evaluated += 1;
        match classification {
            EligibilityClassification::Single => self.single_count += 1,
            EligibilityClassification::Multiple => self.multiple_count += 1,
            EligibilityClassification::None => self.none_count += 1,
        }
    }
}

/// 默认每批评估订单数
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// 刷新日志默认保留天数
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;

// ==========================================
// EligibilityCacheRefreshService
// ==========================================
pub struct EligibilityCacheRefreshService {
    conn: Arc<Mutex<Connection>>,
    engine: EligibilityEngine,
    chunk_size: usize,
    log_retention_days: u32,
}

impl EligibilityCacheRefreshService {
    /// 创建新的刷新服务实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            engine: EligibilityEngine::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }

    /// 设置每批评估订单数（0 视为 1）
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 设置刷新日志保留天数（0 视为 1）
    ///
    /// 全量刷新时清理 started_at 早于保留窗口的已结束日志。
    pub fn with_log_retention_days(mut self, days: u32) -> Self {
        self.log_retention_days = days.max(1);
        self
    }

    /// 全量刷新
    ///
    /// # 参数
    /// - `trigger`: 触发类型
    /// - `trigger_source`: 触发源（操作人/系统组件）
    ///
    /// # 返回
    /// - Ok(RefreshSummary): 刷新摘要（含 refresh_id）
    /// - Err: 刷新失败，事务已回滚，刷新日志记为 FAILED
    #[instrument(skip(self, trigger, trigger_source), fields(trigger = trigger.as_str()))]
    pub fn refresh_all(
        &self,
        trigger: RefreshTrigger,
        trigger_source: Option<&str>,
    ) -> RepositoryResult<RefreshSummary> {
        let refresh_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        match self.refresh_all_in_tx(&mut conn, &refresh_id, trigger, trigger_source, started_at) {
            Ok(summary) => {
                tracing::info!(
                    refresh_id = %summary.refresh_id,
                    orders = summary.orders_evaluated,
                    single = summary.single_count,
                    multiple = summary.multiple_count,
                    none = summary.none_count,
                    pruned = summary.rows_pruned,
                    logs_pruned = summary.logs_pruned,
                    duration_ms = summary.duration_ms,
                    "发货资格缓存全量刷新完成"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(refresh_id = %refresh_id, error = %e, "发货资格缓存全量刷新失败");
                if let Err(log_err) = EligibilityCacheRepository::fail_refresh_log_with(
                    &conn,
                    &refresh_id,
                    trigger.as_str(),
                    trigger_source,
                    true,
                    started_at,
                    &e.to_string(),
                ) {
                    tracing::warn!(refresh_id = %refresh_id, error = %log_err, "刷新失败日志写入失败");
                }
                Err(e)
            }
        }
    }

    fn refresh_all_in_tx(
        &self,
        conn: &mut Connection,
        refresh_id: &str,
        trigger: RefreshTrigger,
        trigger_source: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<RefreshSummary> {
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        EligibilityCacheRepository::start_refresh_log_with(
            &tx,
            refresh_id,
            trigger.as_str(),
            trigger_source,
            true,
            started_at,
        )?;

        let orders = ShipmentRepository::query_open_orders(&tx)?;
        let refreshed_at = Utc::now();
        let mut summary = RefreshSummary {
            refresh_id: refresh_id.to_string(),
            ..Default::default()
        };

        for chunk in orders.chunks(self.chunk_size) {
            for snapshot in self.engine.evaluate_batch(chunk) {
                summary.record(snapshot.classification);
                EligibilityCacheRepository::upsert_snapshot_with(&tx, &snapshot, refreshed_at)?;
            }
        }

        summary.rows_pruned = EligibilityCacheRepository::prune_closed_orders_with(&tx)?;
        summary.logs_pruned = EligibilityCacheRepository::prune_refresh_logs_with(
            &tx,
            started_at - Duration::days(i64::from(self.log_retention_days)),
        )?;
        summary.duration_ms = (Utc::now() - started_at).num_milliseconds();

        EligibilityCacheRepository::complete_refresh_log_with(
            &tx,
            refresh_id,
            summary.orders_evaluated,
            summary.rows_pruned,
            summary.duration_ms,
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(summary)
    }

    /// 单订单刷新
    ///
    /// # 返回
    /// - Ok(Some(snapshot)): 订单仍未完结，已写入缓存
    /// - Ok(None): 订单不存在或已全部发出，缓存行已删除
    /// - Err: 刷新失败，事务已回滚，刷新日志记为 FAILED
    #[instrument(skip(self, trigger), fields(trigger = trigger.as_str()))]
    pub fn refresh_order(
        &self,
        order_number: &str,
        trigger: RefreshTrigger,
    ) -> RepositoryResult<Option<EligibilitySnapshot>> {
        let refresh_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        match self.refresh_order_in_tx(&mut conn, &refresh_id, order_number, trigger, started_at) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(refresh_id = %refresh_id, order_number, error = %e, "订单资格缓存刷新失败");
                if let Err(log_err) = EligibilityCacheRepository::fail_refresh_log_with(
                    &conn,
                    &refresh_id,
                    trigger.as_str(),
                    Some(order_number),
                    false,
                    started_at,
                    &e.to_string(),
                ) {
                    tracing::warn!(refresh_id = %refresh_id, error = %log_err, "刷新失败日志写入失败");
                }
                Err(e)
            }
        }
    }

    fn refresh_order_in_tx(
        &self,
        conn: &mut Connection,
        refresh_id: &str,
        order_number: &str,
        trigger: RefreshTrigger,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<EligibilitySnapshot>> {
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        EligibilityCacheRepository::start_refresh_log_with(
            &tx,
            refresh_id,
            trigger.as_str(),
            Some(order_number),
            false,
            started_at,
        )?;

        let order = ShipmentRepository::query_order(&tx, order_number)?;
        let is_open = order.shipments.iter().any(|s| !s.has_tracking_number());

        let (outcome, removed) = if is_open {
            let (snapshot, reasons) = self.engine.evaluate_order(&order);
            EligibilityCacheRepository::upsert_snapshot_with(&tx, &snapshot, Utc::now())?;
            tracing::debug!(order_number, reasons = ?reasons, "订单缓存已更新");
            (Some(snapshot), false)
        } else {
            let removed = EligibilityCacheRepository::delete_order_with(&tx, order_number)?;
            tracing::debug!(order_number, removed, "订单已完结，缓存行清理");
            (None, removed)
        };

        EligibilityCacheRepository::complete_refresh_log_with(
            &tx,
            refresh_id,
            usize::from(outcome.is_some()),
            usize::from(removed),
            (Utc::now() - started_at).num_milliseconds(),
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_with_schema;
    use crate::domain::shipment::Shipment;
    use crate::domain::types::{SelectionPath, ShipmentStatus};
    use crate::engine::MOVE_OVER_TAG;

    fn setup() -> (ShipmentRepository, EligibilityCacheRepository, EligibilityCacheRefreshService) {
        let conn = Arc::new(Mutex::new(open_in_memory_with_schema().unwrap()));
        (
            ShipmentRepository::from_connection(conn.clone()),
            EligibilityCacheRepository::from_connection(conn.clone()),
            EligibilityCacheRefreshService::new(conn),
        )
    }

    fn pending(id: &str) -> Shipment {
        Shipment::new(id, Some(ShipmentStatus::Pending), None)
    }

    #[test]
    fn test_refresh_all_writes_snapshots_and_log() {
        let (shipments, cache, service) = setup();
        shipments.upsert_shipment("100-1", &pending("A")).unwrap();
        shipments.upsert_shipment("100-1", &pending("B")).unwrap();
        shipments.upsert_shipment("100-2", &pending("C")).unwrap();
        shipments.upsert_shipment("100-2", &pending("D")).unwrap();
        shipments.add_tag("D", MOVE_OVER_TAG).unwrap();

        let summary = service
            .with_chunk_size(1)
            .refresh_all(RefreshTrigger::ManualRefresh, Some("test"))
            .unwrap();
        assert_eq!(summary.orders_evaluated, 2);
        assert_eq!(summary.single_count, 1);
        assert_eq!(summary.multiple_count, 1);

        let first = cache.find_by_order("100-1").unwrap().unwrap().snapshot;
        assert_eq!(first.classification, EligibilityClassification::Multiple);
        assert_eq!(first.selection_path, SelectionPath::Fallback);

        let second = cache.find_by_order("100-2").unwrap().unwrap().snapshot;
        assert_eq!(second.default_shipment_id.as_deref(), Some("D"));

        let log = cache.find_refresh_log(&summary.refresh_id).unwrap().unwrap();
        assert_eq!(log.status, "COMPLETED");
        assert_eq!(log.trigger_type, "ManualRefresh");
        assert_eq!(log.orders_evaluated, 2);
    }

    #[test]
    fn test_refresh_all_prunes_closed_orders() {
        let (shipments, cache, service) = setup();
        shipments.upsert_shipment("100-1", &pending("A")).unwrap();
        service.refresh_all(RefreshTrigger::Scheduled, None).unwrap();
        assert!(cache.find_by_order("100-1").unwrap().is_some());

        let shipped = Shipment::new("A", Some(ShipmentStatus::Shipped), Some("1Z999".to_string()));
        shipments.upsert_shipment("100-1", &shipped).unwrap();

        let summary = service.refresh_all(RefreshTrigger::Scheduled, None).unwrap();
        assert_eq!(summary.orders_evaluated, 0);
        assert_eq!(summary.rows_pruned, 1);
        assert!(cache.find_by_order("100-1").unwrap().is_none());
    }

    #[test]
    fn test_refresh_order_updates_and_deletes() {
        let (shipments, cache, service) = setup();
        shipments.upsert_shipment("100-1", &pending("A")).unwrap();

        let snapshot = service
            .refresh_order("100-1", RefreshTrigger::ShipmentChanged)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.classification, EligibilityClassification::Single);
        assert_eq!(cache.count().unwrap(), 1);

        let held = Shipment::new("A", Some(ShipmentStatus::OnHold), None);
        shipments.upsert_shipment("100-1", &held).unwrap();
        let snapshot = service
            .refresh_order("100-1", RefreshTrigger::ShipmentChanged)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.classification, EligibilityClassification::None);
        assert_eq!(snapshot.selection_path, SelectionPath::Empty);

        assert!(service
            .refresh_order("missing", RefreshTrigger::ManualRefresh)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_refresh_all_prunes_expired_logs() {
        let (shipments, cache, service) = setup();
        shipments.upsert_shipment("100-1", &pending("A")).unwrap();
        for _ in 0..3 {
            service.refresh_order("100-1", RefreshTrigger::ShipmentChanged).unwrap();
        }
        cache
            .fail_refresh_log("R-stale", "TagChanged", Some("100-1"), false, Utc::now() - Duration::days(10), "x")
            .unwrap();
        assert_eq!(cache.count_refresh_logs().unwrap(), 4);

        let summary = service
            .with_log_retention_days(7)
            .refresh_all(RefreshTrigger::Scheduled, None)
            .unwrap();
        assert_eq!(summary.logs_pruned, 1);
        assert!(cache.find_refresh_log("R-stale").unwrap().is_none());
        // 窗口内的单订单日志与本次全量日志保留
        assert_eq!(cache.count_refresh_logs().unwrap(), 4);
        assert!(cache.find_refresh_log(&summary.refresh_id).unwrap().is_some());
    }

    #[test]
    fn test_refresh_order_failure_writes_failed_log() {
        let conn = Arc::new(Mutex::new(open_in_memory_with_schema().unwrap()));
        let shipments = ShipmentRepository::from_connection(conn.clone());
        let cache = EligibilityCacheRepository::from_connection(conn.clone());
        let service = EligibilityCacheRefreshService::new(conn.clone());
        shipments.upsert_shipment("100-1", &pending("A")).unwrap();

        conn.lock().unwrap().execute_batch("DROP TABLE shipment_tag").unwrap();

        let err = service
            .refresh_order("100-1", RefreshTrigger::TagChanged)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DatabaseQueryError(_)));

        let (status, source, is_full): (String, Option<String>, i64) = conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT status, trigger_source, is_full_refresh FROM eligibility_refresh_log",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(status, "FAILED");
        assert_eq!(source.as_deref(), Some("100-1"));
        assert_eq!(is_full, 0);
        assert_eq!(cache.count().unwrap(), 0);
    }
}
