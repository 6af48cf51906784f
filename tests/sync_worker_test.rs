// ==========================================
// 发货单同步 Worker 测试
// ==========================================
// 职责: 验证事件经通道发布后被 worker 消费并刷新缓存
// ==========================================


#[cfg(test)]
mod sync_worker_test {
    use shipping_ops::domain::{EligibilityClassification, ShipmentPayload};
    use shipping_ops::engine::{
        ChannelEventPublisher, ShipmentChangeEvent, ShipmentEventPublisher, MOVE_OVER_TAG,
    };
    use shipping_ops::repository::EligibilityCacheRepository;
    use shipping_ops::services::ShipmentSyncWorker;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::test_helpers::{create_test_db, open_shared};

    fn upsert_json(id: &str, order: &str, status: &str) -> String {
        format!(
            r#"{{"type":"SHIPMENT_UPSERTED","payload":{{"shipmentId":"{}","orderNumber":"{}","shipmentStatus":"{}","extra":1}}}}"#,
            id, order, status
        )
    }

    #[tokio::test]
    async fn test_events_flow_through_channel() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let cache = EligibilityCacheRepository::from_connection(conn.clone());

        let (tx, rx) = mpsc::channel(16);
        let publisher = ChannelEventPublisher::new(tx);
        let worker = Arc::new(ShipmentSyncWorker::new(conn, 3));
        let handle = tokio::spawn(worker.run(rx));

        for line in [
            upsert_json("A", "500-1", "pending"),
            upsert_json("B", "500-1", "awaiting_shipment"),
            upsert_json("C", "500-2", "on_hold"),
        ] {
            let event: ShipmentChangeEvent = serde_json::from_str(&line).unwrap();
            publisher.publish(event).unwrap();
        }
        publisher
            .publish(ShipmentChangeEvent::TagAdded {
                shipment_id: "B".to_string(),
                name: MOVE_OVER_TAG.to_string(),
            })
            .unwrap();
        drop(publisher);

        let stats = handle.await.unwrap();
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.failed, 0);

        let first = cache.find_by_order("500-1").unwrap().unwrap().snapshot;
        assert_eq!(first.classification, EligibilityClassification::Single);
        assert_eq!(first.default_shipment_id.as_deref(), Some("B"));

        let second = cache.find_by_order("500-2").unwrap().unwrap().snapshot;
        assert_eq!(second.classification, EligibilityClassification::None);
    }

    #[tokio::test]
    async fn test_shipping_last_shipment_clears_cache_row() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let cache = EligibilityCacheRepository::from_connection(conn.clone());
        let worker = Arc::new(ShipmentSyncWorker::new(conn, 0));

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(Arc::clone(&worker).run(rx));

        tx.send(ShipmentChangeEvent::ShipmentUpserted {
            payload: ShipmentPayload {
                shipment_id: Some("A".to_string()),
                order_number: Some("600-1".to_string()),
                shipment_status: Some("pending".to_string()),
                tracking_number: None,
            },
        })
        .await
        .unwrap();
        tx.send(ShipmentChangeEvent::ShipmentUpserted {
            payload: ShipmentPayload {
                shipment_id: Some("A".to_string()),
                order_number: None,
                shipment_status: Some("shipped".to_string()),
                tracking_number: Some("1Z600".to_string()),
            },
        })
        .await
        .unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.processed, 2);
        assert!(cache.find_by_order("600-1").unwrap().is_none());
    }
}
