// ==========================================
// 订单发货管理系统 - 发货资格缓存仓储
// ==========================================
// 职责: shipment_eligibility_cache 读写、刷新日志
// 红线: 只存取引擎产出的快照，不做判定
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::eligibility::EligibilitySnapshot;
use crate::domain::types::{EligibilityClassification, SelectionPath};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// 缓存行（快照 + 刷新时间）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityCacheEntry {
    pub snapshot: EligibilitySnapshot,
    pub refreshed_at: DateTime<Utc>,
}

/// 刷新日志行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityRefreshLogEntity {
    pub refresh_id: String,
    pub trigger_type: String,
    pub trigger_source: Option<String>,
    pub is_full_refresh: bool,
    pub orders_evaluated: i64,
    pub rows_pruned: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
}

/// 未解析的缓存行
struct RawCacheRow {
    order_number: String,
    classification: String,
    default_shipment_id: Option<String>,
    ids_json: String,
    shipment_count: usize,
    selection_path: String,
    refreshed_at: String,
}

// ==========================================
// EligibilityCacheRepository - 资格缓存仓储
// ==========================================
pub struct EligibilityCacheRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EligibilityCacheRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(|e| {
            RepositoryError::DatabaseConnectionError(format!("无法打开数据库 {}: {}", db_path, e))
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_entry(row: &Row<'_>) -> rusqlite::Result<RawCacheRow> {
        let shipment_count: i64 = row.get("shipment_count")?;
        Ok(RawCacheRow {
            order_number: row.get("order_number")?,
            classification: row.get("classification")?,
            default_shipment_id: row.get("default_shipment_id")?,
            ids_json: row.get("shippable_shipment_ids")?,
            shipment_count: shipment_count.max(0) as usize,
            selection_path: row.get("selection_path")?,
            refreshed_at: row.get("refreshed_at")?,
        })
    }

    /// 解析原始行；无法识别的枚举值按字段错误返回，不静默降级
    fn finish_entry(raw: RawCacheRow) -> RepositoryResult<EligibilityCacheEntry> {
        let classification = EligibilityClassification::parse(&raw.classification).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "classification".to_string(),
                message: format!("order_number={} 未知分类: {}", raw.order_number, raw.classification),
            }
        })?;
        let selection_path = SelectionPath::parse(&raw.selection_path).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "selection_path".to_string(),
                message: format!("order_number={} 未知选择路径: {}", raw.order_number, raw.selection_path),
            }
        })?;
        let refreshed_at = DateTime::parse_from_rfc3339(&raw.refreshed_at)
            .map_err(|e| RepositoryError::FieldValueError {
                field: "refreshed_at".to_string(),
                message: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(EligibilityCacheEntry {
            snapshot: EligibilitySnapshot {
                order_number: raw.order_number,
                classification,
                default_shipment_id: raw.default_shipment_id,
                shippable_shipment_ids: serde_json::from_str(&raw.ids_json)?,
                shipment_count: raw.shipment_count,
                selection_path,
            },
            refreshed_at,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 写入/覆盖订单快照
    pub fn upsert_snapshot(
        &self,
        snapshot: &EligibilitySnapshot,
        refreshed_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_snapshot_with(&conn, snapshot, refreshed_at)
    }

    pub fn upsert_snapshot_with(
        conn: &Connection,
        snapshot: &EligibilitySnapshot,
        refreshed_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let ids_json = serde_json::to_string(&snapshot.shippable_shipment_ids)?;
        conn.execute(
            r#"
            INSERT INTO shipment_eligibility_cache (
                order_number, classification, default_shipment_id, shippable_shipment_ids,
                shipment_count, selection_path, refreshed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(order_number) DO UPDATE SET
                classification = excluded.classification,
                default_shipment_id = excluded.default_shipment_id,
                shippable_shipment_ids = excluded.shippable_shipment_ids,
                shipment_count = excluded.shipment_count,
                selection_path = excluded.selection_path,
                refreshed_at = excluded.refreshed_at
            "#,
            params![
                snapshot.order_number,
                snapshot.classification.as_str(),
                snapshot.default_shipment_id,
                ids_json,
                snapshot.shipment_count as i64,
                snapshot.selection_path.as_str(),
                refreshed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 删除单个订单的缓存
    pub fn delete_order_with(conn: &Connection, order_number: &str) -> RepositoryResult<bool> {
        let affected = conn.execute(
            "DELETE FROM shipment_eligibility_cache WHERE order_number = ?1",
            params![order_number],
        )?;
        Ok(affected > 0)
    }

    /// 清理已完结订单（不再有未发发货单）的缓存
    ///
    /// # 返回
    /// - 删除的行数
    pub fn prune_closed_orders_with(conn: &Connection) -> RepositoryResult<usize> {
        let affected = conn.execute(
            r#"
            DELETE FROM shipment_eligibility_cache
            WHERE order_number NOT IN (
                SELECT DISTINCT order_number FROM shipment
                WHERE tracking_number IS NULL OR tracking_number = ''
            )
            "#,
            [],
        )?;
        Ok(affected)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_order(&self, order_number: &str) -> RepositoryResult<Option<EligibilityCacheEntry>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT * FROM shipment_eligibility_cache WHERE order_number = ?1",
                params![order_number],
                Self::map_entry,
            )
            .optional()?;
        raw.map(Self::finish_entry).transpose()
    }

    /// 按分类列出缓存（例如运营看板只关心 multiple）
    pub fn list_by_classification(
        &self,
        classification: EligibilityClassification,
    ) -> RepositoryResult<Vec<EligibilityCacheEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM shipment_eligibility_cache
            WHERE classification = ?1
            ORDER BY order_number
            "#,
        )?;
        let rows = stmt
            .query_map(params![classification.as_str()], Self::map_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::finish_entry).collect()
    }

    pub fn count(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row("SELECT COUNT(*) FROM shipment_eligibility_cache", [], |row| row.get(0))?;
        Ok(n)
    }

    // ==========================================
    // 刷新日志
    // ==========================================

    /// 记录刷新开始（status=RUNNING）
    pub fn start_refresh_log_with(
        conn: &Connection,
        refresh_id: &str,
        trigger_type: &str,
        trigger_source: Option<&str>,
        is_full_refresh: bool,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO eligibility_refresh_log (
                refresh_id, trigger_type, trigger_source, is_full_refresh, started_at, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'RUNNING')
            "#,
            params![
                refresh_id,
                trigger_type,
                trigger_source,
                is_full_refresh as i64,
                started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn complete_refresh_log_with(
        conn: &Connection,
        refresh_id: &str,
        orders_evaluated: usize,
        rows_pruned: usize,
        duration_ms: i64,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE eligibility_refresh_log
            SET orders_evaluated = ?2,
                rows_pruned = ?3,
                completed_at = ?4,
                duration_ms = ?5,
                status = 'COMPLETED'
            WHERE refresh_id = ?1
            "#,
            params![
                refresh_id,
                orders_evaluated as i64,
                rows_pruned as i64,
                Utc::now().to_rfc3339(),
                duration_ms,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "EligibilityRefreshLog".to_string(),
                id: refresh_id.to_string(),
            });
        }
        Ok(())
    }

    /// 记录刷新失败
    ///
    /// 刷新事务回滚后 RUNNING 行也随之消失，这里在事务外补记失败行。
    pub fn fail_refresh_log(
        &self,
        refresh_id: &str,
        trigger_type: &str,
        trigger_source: Option<&str>,
        is_full_refresh: bool,
        started_at: DateTime<Utc>,
        error_message: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::fail_refresh_log_with(
            &conn,
            refresh_id,
            trigger_type,
            trigger_source,
            is_full_refresh,
            started_at,
            error_message,
        )
    }

    pub fn fail_refresh_log_with(
        conn: &Connection,
        refresh_id: &str,
        trigger_type: &str,
        trigger_source: Option<&str>,
        is_full_refresh: bool,
        started_at: DateTime<Utc>,
        error_message: &str,
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        conn.execute(
            r#"
            INSERT INTO eligibility_refresh_log (
                refresh_id, trigger_type, trigger_source, is_full_refresh,
                started_at, completed_at, duration_ms, status, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'FAILED', ?8)
            ON CONFLICT(refresh_id) DO UPDATE SET
                completed_at = excluded.completed_at,
                duration_ms = excluded.duration_ms,
                status = 'FAILED',
                error_message = excluded.error_message
            "#,
            params![
                refresh_id,
                trigger_type,
                trigger_source,
                is_full_refresh as i64,
                started_at.to_rfc3339(),
                now.to_rfc3339(),
                (now - started_at).num_milliseconds(),
                error_message,
            ],
        )?;
        Ok(())
    }

    /// 清理 started_at 早于 `before` 的刷新日志
    ///
    /// # 返回
    /// - 删除的行数
    pub fn prune_refresh_logs_with(conn: &Connection, before: DateTime<Utc>) -> RepositoryResult<usize> {
        let affected = conn.execute(
            "DELETE FROM eligibility_refresh_log WHERE started_at < ?1",
            params![before.to_rfc3339()],
        )?;
        Ok(affected)
    }

    pub fn count_refresh_logs(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row("SELECT COUNT(*) FROM eligibility_refresh_log", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn find_refresh_log(&self, refresh_id: &str) -> RepositoryResult<Option<EligibilityRefreshLogEntity>> {
        let conn = self.get_conn()?;
        let entity = conn
            .query_row(
                "SELECT * FROM eligibility_refresh_log WHERE refresh_id = ?1",
                params![refresh_id],
                |row| {
                    Ok(EligibilityRefreshLogEntity {
                        refresh_id: row.get("refresh_id")?,
                        trigger_type: row.get("trigger_type")?,
                        trigger_source: row.get("trigger_source")?,
                        is_full_refresh: row.get::<_, i64>("is_full_refresh")? != 0,
                        orders_evaluated: row.get("orders_evaluated")?,
                        rows_pruned: row.get("rows_pruned")?,
                        started_at: row.get("started_at")?,
                        completed_at: row.get("completed_at")?,
                        duration_ms: row.get("duration_ms")?,
                        status: row.get("status")?,
                        error_message: row.get("error_message")?,
                    })
                },
            )
            .optional()?;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_with_schema;

    fn setup() -> (Arc<Mutex<Connection>>, EligibilityCacheRepository) {
        let conn = Arc::new(Mutex::new(open_in_memory_with_schema().unwrap()));
        let repo = EligibilityCacheRepository::from_connection(conn.clone());
        (conn, repo)
    }

    fn snapshot(order_number: &str, ids: &[&str]) -> EligibilitySnapshot {
        let classification = EligibilityClassification::from_count(ids.len());
        EligibilitySnapshot {
            order_number: order_number.to_string(),
            classification,
            default_shipment_id: if ids.len() == 1 { Some(ids[0].to_string()) } else { None },
            shippable_shipment_ids: ids.iter().map(|s| s.to_string()).collect(),
            shipment_count: ids.len() + 1,
            selection_path: if ids.is_empty() { SelectionPath::Empty } else { SelectionPath::Primary },
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let (_conn, repo) = setup();
        let now = Utc::now();

        repo.upsert_snapshot(&snapshot("100-1", &["A", "B"]), now).unwrap();
        repo.upsert_snapshot(&snapshot("100-1", &["B"]), now).unwrap();

        let entry = repo.find_by_order("100-1").unwrap().unwrap();
        assert_eq!(entry.snapshot, snapshot("100-1", &["B"]));
        assert_eq!(entry.refreshed_at.timestamp(), now.timestamp());
        assert_eq!(repo.count().unwrap(), 1);
        assert!(repo.find_by_order("100-2").unwrap().is_none());
    }

    #[test]
    fn test_list_by_classification() {
        let (_conn, repo) = setup();
        let now = Utc::now();
        repo.upsert_snapshot(&snapshot("100-1", &["A", "B"]), now).unwrap();
        repo.upsert_snapshot(&snapshot("100-2", &["C"]), now).unwrap();
        repo.upsert_snapshot(&snapshot("100-3", &["D", "E", "F"]), now).unwrap();

        let multiple = repo.list_by_classification(EligibilityClassification::Multiple).unwrap();
        let orders: Vec<&str> = multiple.iter().map(|e| e.snapshot.order_number.as_str()).collect();
        assert_eq!(orders, vec!["100-1", "100-3"]);
    }

    #[test]
    fn test_prune_closed_orders() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            c.execute_batch(
                r#"
                INSERT INTO shipment VALUES ('S-1', '100-1', 'pending', NULL, 1, '2026-01-01T00:00:00Z');
                INSERT INTO shipment VALUES ('S-2', '100-2', 'shipped', '1Z2', 1, '2026-01-01T00:00:00Z');
                "#,
            )
            .unwrap();
        }
        let now = Utc::now();
        repo.upsert_snapshot(&snapshot("100-1", &["S-1"]), now).unwrap();
        repo.upsert_snapshot(&snapshot("100-2", &[]), now).unwrap();
        repo.upsert_snapshot(&snapshot("100-3", &[]), now).unwrap();

        let pruned = {
            let c = conn.lock().unwrap();
            EligibilityCacheRepository::prune_closed_orders_with(&c).unwrap()
        };
        assert_eq!(pruned, 2);
        assert!(repo.find_by_order("100-1").unwrap().is_some());
    }

    #[test]
    fn test_refresh_log_lifecycle() {
        let (conn, repo) = setup();
        let started_at = Utc::now();
        {
            let c = conn.lock().unwrap();
            EligibilityCacheRepository::start_refresh_log_with(
                &c, "R-1", "SCHEDULED", Some("ticker"), true, started_at,
            )
            .unwrap();
        }
        let running = repo.find_refresh_log("R-1").unwrap().unwrap();
        assert_eq!(running.status, "RUNNING");
        assert!(running.is_full_refresh);

        {
            let c = conn.lock().unwrap();
            EligibilityCacheRepository::complete_refresh_log_with(&c, "R-1", 12, 3, 40).unwrap();
        }
        let done = repo.find_refresh_log("R-1").unwrap().unwrap();
        assert_eq!(done.status, "COMPLETED");
        assert_eq!(done.orders_evaluated, 12);
        assert_eq!(done.rows_pruned, 3);
        assert_eq!(done.duration_ms, Some(40));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_complete_unknown_refresh_log() {
        let (conn, _repo) = setup();
        let c = conn.lock().unwrap();
        let err = EligibilityCacheRepository::complete_refresh_log_with(&c, "missing", 0, 0, 0).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[test]
    fn test_unknown_classification_is_field_error() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            c.execute(
                "INSERT INTO shipment_eligibility_cache VALUES ('100-9', 'several', NULL, '[\"A\"]', 1, 'PRIMARY', ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        }
        let err = repo.find_by_order("100-9").unwrap_err();
        match err {
            RepositoryError::FieldValueError { field, .. } => assert_eq!(field, "classification"),
            other => panic!("Expected FieldValueError, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_selection_path_is_field_error() {
        let (_conn, repo) = setup();
        repo.upsert_snapshot(&snapshot("100-8", &["A"]), Utc::now()).unwrap();
        {
            let c = repo.get_conn().unwrap();
            c.execute(
                "UPDATE shipment_eligibility_cache SET selection_path = 'sideways' WHERE order_number = '100-8'",
                [],
            )
            .unwrap();
        }
        let err = repo.list_by_classification(EligibilityClassification::Single).unwrap_err();
        assert!(matches!(err, RepositoryError::FieldValueError { ref field, .. } if field == "selection_path"));
    }

    #[test]
    fn test_open_unreachable_path_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("cache.db");
        let err = EligibilityCacheRepository::new(path.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, RepositoryError::DatabaseConnectionError(_)));
    }

    #[test]
    fn test_prune_refresh_logs_before_cutoff() {
        let (conn, repo) = setup();
        let now = Utc::now();
        {
            let c = conn.lock().unwrap();
            EligibilityCacheRepository::start_refresh_log_with(
                &c, "R-old", "ShipmentChanged", Some("100-1"), false, now - chrono::Duration::days(30),
            )
            .unwrap();
            EligibilityCacheRepository::start_refresh_log_with(
                &c, "R-new", "ShipmentChanged", Some("100-1"), false, now,
            )
            .unwrap();
        }
        repo.fail_refresh_log("R-older", "Scheduled", None, true, now - chrono::Duration::days(8), "x")
            .unwrap();

        let pruned = {
            let c = conn.lock().unwrap();
            EligibilityCacheRepository::prune_refresh_logs_with(&c, now - chrono::Duration::days(7)).unwrap()
        };
        assert_eq!(pruned, 2);
        assert_eq!(repo.count_refresh_logs().unwrap(), 1);
        assert!(repo.find_refresh_log("R-new").unwrap().is_some());
    }

    #[test]
    fn test_fail_refresh_log() {
        let (_conn, repo) = setup();
        repo.fail_refresh_log("R-2", "MANUAL_REFRESH", None, true, Utc::now(), "disk full")
            .unwrap();
        let failed = repo.find_refresh_log("R-2").unwrap().unwrap();
        assert_eq!(failed.status, "FAILED");
        assert_eq!(failed.error_message.as_deref(), Some("disk full"));
    }
}
