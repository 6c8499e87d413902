//! Log transport contract checks over a real relay connection.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sync_client::transport::{LinkStatus, LogTransport, TransportError};
    use sync_types::{DocId, RowId};

    use crate::harness::TestRelay;

    fn doc() -> DocId {
        DocId::new("contract-doc")
    }

    async fn recv_row(
        updates: &mut tokio::sync::mpsc::UnboundedReceiver<sync_types::LogEntry>,
    ) -> Option<sync_types::LogEntry> {
        tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("row not delivered")
    }

    // ========================================================================
    // Request/Response
    // ========================================================================

    #[tokio::test]
    async fn append_and_fetch_in_commit_order() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();

        let first = client.add_update(&doc(), b"one".to_vec()).await.unwrap();
        let second = client.add_update(&doc(), b"two".to_vec()).await.unwrap();
        assert!(second > first);

        let rows = client.get_remote_update_list(&doc()).await.unwrap();
        let ids: Vec<RowId> = rows.iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(rows[0].operation, b"one".to_vec());
    }

    #[tokio::test]
    async fn requests_before_connect_fail() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();

        let result = client.add_update(&doc(), vec![1]).await;
        assert_eq!(result, Err(TransportError::NotConnected));
        assert_eq!(*client.link_status().borrow(), LinkStatus::Down);
    }

    #[tokio::test]
    async fn oversized_append_is_rejected() {
        let mut config = sync_relay::config::Config::default();
        config.storage.max_operation_size = 8;
        let relay = TestRelay::start_with_config(config).await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();

        let result = client.add_update(&doc(), vec![0; 9]).await;
        assert!(matches!(result, Err(TransportError::AppendRejected(_))));
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    #[tokio::test]
    async fn subscriber_sees_rows_from_everyone_including_itself() {
        let relay = TestRelay::start().await.unwrap();
        let alice = relay.client();
        let bob = relay.client();
        alice.connect().await.unwrap();
        bob.connect().await.unwrap();

        let mut sub = alice.subscribe(&doc()).await.unwrap();

        let own = alice.add_update(&doc(), b"from alice".to_vec()).await.unwrap();
        let other = bob.add_update(&doc(), b"from bob".to_vec()).await.unwrap();

        let first = recv_row(&mut sub.updates).await.unwrap();
        let second = recv_row(&mut sub.updates).await.unwrap();
        assert_eq!(first.row_id, own);
        assert_eq!(second.row_id, other);
        assert_eq!(second.operation, b"from bob".to_vec());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();

        let mut sub = client.subscribe(&doc()).await.unwrap();
        client.unsubscribe(sub.id);
        client.add_update(&doc(), vec![1]).await.unwrap();

        // Sender was dropped on unsubscribe
        assert_eq!(recv_row(&mut sub.updates).await, None);
    }

    #[tokio::test]
    async fn subscribe_then_fetch_misses_nothing() {
        let relay = TestRelay::start().await.unwrap();
        let writer = relay.client();
        let reader = relay.client();
        writer.connect().await.unwrap();
        reader.connect().await.unwrap();

        let early = writer.add_update(&doc(), vec![1]).await.unwrap();
        let mut sub = reader.subscribe(&doc()).await.unwrap();
        let late = writer.add_update(&doc(), vec![2]).await.unwrap();
        let fetched: Vec<RowId> = reader
            .get_remote_update_list(&doc())
            .await
            .unwrap()
            .iter()
            .map(|r| r.row_id)
            .collect();

        assert!(fetched.contains(&early));
        assert_eq!(recv_row(&mut sub.updates).await.unwrap().row_id, late);
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    #[tokio::test]
    async fn snapshot_replaces_prefix_and_is_not_pushed() {
        let relay = TestRelay::start_on_disk().await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();
        let mut sub = client.subscribe(&doc()).await.unwrap();

        let mut last = RowId::zero();
        for i in 0..3u8 {
            last = client.add_update(&doc(), vec![i]).await.unwrap();
            recv_row(&mut sub.updates).await.unwrap();
        }

        let snapshot_row = client
            .apply_snapshot(&doc(), b"snapshot".to_vec(), last)
            .await
            .unwrap();
        assert_eq!(snapshot_row, last);

        let after = client.add_update(&doc(), vec![9]).await.unwrap();
        // Next delivery is the append, not the snapshot
        assert_eq!(recv_row(&mut sub.updates).await.unwrap().row_id, after);

        let rows = client.get_remote_update_list(&doc()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_id, last);
        assert_eq!(rows[0].operation, b"snapshot".to_vec());
        assert_eq!(rows[1].row_id, after);
    }

    #[tokio::test]
    async fn snapshot_of_unknown_row_is_rejected() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();
        client.add_update(&doc(), vec![1]).await.unwrap();

        let result = client
            .apply_snapshot(&doc(), vec![0], RowId::new(1_000))
            .await;
        assert!(matches!(result, Err(TransportError::SnapshotRejected(_))));
        assert_eq!(client.get_remote_update_list(&doc()).await.unwrap().len(), 1);
    }

    // ========================================================================
    // Link Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn disconnect_ends_subscriptions_and_reports_down() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();
        let mut status = client.link_status();
        client.connect().await.unwrap();
        assert_eq!(*status.borrow_and_update(), LinkStatus::Up);

        let mut sub = client.subscribe(&doc()).await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(recv_row(&mut sub.updates).await, None);
        assert_eq!(*status.borrow_and_update(), LinkStatus::Down);
        assert_eq!(
            client.get_remote_update_list(&doc()).await,
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn reconnect_after_sever() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();
        let row = client.add_update(&doc(), vec![1]).await.unwrap();

        client.sever();
        assert!(!client.is_connected());

        client.connect().await.unwrap();
        let rows = client.get_remote_update_list(&doc()).await.unwrap();
        assert_eq!(rows[0].row_id, row);
    }

    #[tokio::test]
    async fn relay_forgets_listeners_of_closed_connections() {
        let relay = TestRelay::start().await.unwrap();
        let client = relay.client();
        client.connect().await.unwrap();
        client.subscribe(&doc()).await.unwrap();
        assert_eq!(relay.relay().listener_count(&doc()), 1);

        client.disconnect().await.unwrap();
        let gone = crate::harness::wait_until(Duration::from_secs(5), || {
            relay.relay().listener_count(&doc()) == 0
        })
        .await;
        assert!(gone);
    }
}
