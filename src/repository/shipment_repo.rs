// ==========================================
// 订单发货管理系统 - 发货单数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑（资格判定只在 engine 内）
// 约束: 所有查询使用参数化
// 说明: `query_*` 关联函数接收 &Connection，供已持锁/事务内的调用方复用，
//       避免对同一 Mutex 二次加锁
// ==========================================

use crate::domain::shipment::{OrderShipments, Shipment, ShipmentTag};
use crate::domain::types::ShipmentStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// 未发出（运单号为空）的发货单条件
const OPEN_SHIPMENT_CONDITION: &str = "(tracking_number IS NULL OR tracking_number = '')";

// ==========================================
// ShipmentRepository - 发货单仓储
// ==========================================
pub struct ShipmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ShipmentRepository {
    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_shipment(row: &Row<'_>) -> rusqlite::Result<Shipment> {
        let status: Option<String> = row.get("shipment_status")?;
        Ok(Shipment {
            id: row.get("shipment_id")?,
            shipment_status: status.filter(|s| !s.is_empty()).map(|s| ShipmentStatus::parse(&s)),
            tracking_number: row.get("tracking_number")?,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 新增或更新发货单
    ///
    /// 新发货单追加到订单末尾（seq_no 递增），同订单内更新保持原顺序；
    /// 改挂到其他订单时视为新成员，追加到新订单末尾。
    pub fn upsert_shipment(&self, order_number: &str, shipment: &Shipment) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_shipment_with(&conn, order_number, shipment)
    }

    pub fn upsert_shipment_with(
        conn: &Connection,
        order_number: &str,
        shipment: &Shipment,
    ) -> RepositoryResult<()> {
        if order_number.trim().is_empty() {
            return Err(RepositoryError::FieldValueError {
                field: "order_number".to_string(),
                message: format!("shipment_id={} 缺少订单号", shipment.id),
            });
        }

        conn.execute(
            r#"
            INSERT INTO shipment (
                shipment_id, order_number, shipment_status, tracking_number, seq_no, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                (SELECT COALESCE(MAX(seq_no), 0) + 1 FROM shipment WHERE order_number = ?2),
                ?5
            )
            ON CONFLICT(shipment_id) DO UPDATE SET
                seq_no = CASE
                    WHEN shipment.order_number = excluded.order_number THEN shipment.seq_no
                    ELSE excluded.seq_no
                END,
                order_number = excluded.order_number,
                shipment_status = excluded.shipment_status,
                tracking_number = excluded.tracking_number,
                updated_at = excluded.updated_at
            "#,
            params![
                shipment.id,
                order_number,
                shipment.shipment_status.as_ref().map(|s| s.as_str()),
                shipment.tracking_number,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 新增标签
    ///
    /// # 返回
    /// - Ok(true): 新增成功
    /// - Ok(false): 标签已存在
    /// - Err(ForeignKeyViolation): 发货单不存在
    pub fn add_tag(&self, shipment_id: &str, name: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO shipment_tag (shipment_id, name) VALUES (?1, ?2)",
            params![shipment_id, name],
        )?;
        Ok(affected > 0)
    }

    /// 删除标签
    pub fn remove_tag(&self, shipment_id: &str, name: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM shipment_tag WHERE shipment_id = ?1 AND name = ?2",
            params![shipment_id, name],
        )?;
        Ok(affected > 0)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 查询发货单所属订单号
    pub fn find_order_number(&self, shipment_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let order_number = conn
            .query_row(
                "SELECT order_number FROM shipment WHERE shipment_id = ?1",
                params![shipment_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(order_number)
    }

    /// 加载单个订单的发货单（按 seq_no）与标签
    ///
    /// 订单不存在时返回空的 OrderShipments，由调用方决定如何处理。
    pub fn load_order(&self, order_number: &str) -> RepositoryResult<OrderShipments> {
        let conn = self.get_conn()?;
        Self::query_order(&conn, order_number)
    }

    pub fn query_order(conn: &Connection, order_number: &str) -> RepositoryResult<OrderShipments> {
        let mut stmt = conn.prepare(
            r#"
            SELECT shipment_id, shipment_status, tracking_number
            FROM shipment
            WHERE order_number = ?1
            ORDER BY seq_no, shipment_id
            "#,
        )?;
        let shipments = stmt
            .query_map(params![order_number], Self::map_shipment)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT t.shipment_id, t.name
            FROM shipment_tag t
            JOIN shipment s ON s.shipment_id = t.shipment_id
            WHERE s.order_number = ?1
            ORDER BY t.shipment_id, t.name
            "#,
        )?;
        let tags = stmt
            .query_map(params![order_number], |row| {
                Ok(ShipmentTag {
                    shipment_id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderShipments {
            order_number: order_number.to_string(),
            shipments,
            tags,
        })
    }

    /// 未完结订单号（至少一个发货单没有运单号）
    pub fn list_open_order_numbers(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT DISTINCT order_number FROM shipment WHERE {} ORDER BY order_number",
            OPEN_SHIPMENT_CONDITION
        );
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(orders)
    }

    /// 加载全部未完结订单（含已发出的兄弟发货单及全部标签）
    ///
    /// 两次查询完成，不按订单逐个查库。
    pub fn load_open_orders(&self) -> RepositoryResult<Vec<OrderShipments>> {
        let conn = self.get_conn()?;
        Self::query_open_orders(&conn)
    }

    pub fn query_open_orders(conn: &Connection) -> RepositoryResult<Vec<OrderShipments>> {
        let open_orders = format!(
            "SELECT DISTINCT order_number FROM shipment WHERE {}",
            OPEN_SHIPMENT_CONDITION
        );

        let sql = format!(
            r#"
            SELECT order_number, shipment_id, shipment_status, tracking_number
            FROM shipment
            WHERE order_number IN ({})
            ORDER BY order_number, seq_no, shipment_id
            "#,
            open_orders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let order_number: String = row.get("order_number")?;
            Ok((order_number, Self::map_shipment(row)?))
        })?;

        let mut orders: Vec<OrderShipments> = Vec::new();
        let mut order_of_shipment: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let (order_number, shipment) = row?;
            let needs_new = orders
                .last()
                .map(|o| o.order_number != order_number)
                .unwrap_or(true);
            if needs_new {
                orders.push(OrderShipments::new(order_number));
            }
            let idx = orders.len() - 1;
            order_of_shipment.insert(shipment.id.clone(), idx);
            orders[idx].shipments.push(shipment);
        }

        let sql = format!(
            r#"
            SELECT t.shipment_id, t.name
            FROM shipment_tag t
            JOIN shipment s ON s.shipment_id = t.shipment_id
            WHERE s.order_number IN ({})
            ORDER BY t.shipment_id, t.name
            "#,
            open_orders
        );
        let mut stmt = conn.prepare(&sql)?;
        let tags = stmt.query_map([], |row| {
            Ok(ShipmentTag {
                shipment_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        for tag in tags {
            let tag = tag?;
            if let Some(&idx) = order_of_shipment.get(&tag.shipment_id) {
                orders[idx].tags.push(tag);
            }
        }

        Ok(orders)
    }
}
