//! Providers converging through a real relay.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use sync_client::{CryptoConfig, EncryptionKey, MemoryDocument, ProviderConfig, SyncProvider};
    use sync_core::{ProviderEvent, ReconnectBackoff, SnapshotPolicy};
    use sync_types::DocId;
    use tokio::sync::broadcast;

    use crate::harness::{wait_until, TestRelay};
    use crate::relay_transport::RelayTransport;

    type Provider = SyncProvider<RelayTransport, MemoryDocument>;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn doc_id() -> DocId {
        DocId::new("shared-notes")
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new(doc_id())
            .with_append_retry(3, Duration::from_millis(100))
            .with_reconnect_backoff(ReconnectBackoff {
                base: Duration::from_millis(20),
                cap: Duration::from_millis(200),
                max_jitter: Duration::ZERO,
            })
            .with_snapshot_policy(
                SnapshotPolicy::new(10_000, 10_000).with_check_interval(Duration::from_secs(3_600)),
            )
    }

    fn spawn(relay: &TestRelay, client_id: u64, crypto: CryptoConfig) -> Provider {
        spawn_with(relay, MemoryDocument::new(client_id), crypto, config())
    }

    fn spawn_with(
        relay: &TestRelay,
        document: MemoryDocument,
        crypto: CryptoConfig,
        config: ProviderConfig,
    ) -> Provider {
        SyncProvider::spawn(relay.client(), document, crypto, config).unwrap()
    }

    fn entries(provider: &Provider) -> BTreeMap<String, String> {
        provider
            .document()
            .try_lock()
            .map(|doc| doc.entries())
            .unwrap_or_default()
    }

    async fn edit(provider: &Provider, key: &str, value: &str) {
        provider.document().lock().await.insert(key, value);
    }

    async fn converge(providers: &[&Provider], expected: &BTreeMap<String, String>) {
        let reached = wait_until(TIMEOUT, || {
            providers.iter().all(|p| entries(p) == *expected)
        })
        .await;
        let actual: Vec<_> = providers.iter().map(|p| entries(p)).collect();
        assert!(reached, "expected {expected:?} everywhere, got {actual:?}");
    }

    async fn wait_for_event(
        events: &mut broadcast::Receiver<ProviderEvent>,
        mut matches: impl FnMut(&ProviderEvent) -> bool,
    ) -> ProviderEvent {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(TIMEOUT, wait)
            .await
            .expect("event not emitted")
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ========================================================================
    // Live Sync
    // ========================================================================

    /// Edits on either side reach the other through the relay.
    #[tokio::test]
    async fn two_clients_sync_live_edits() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));
        let bob = spawn(&relay, 2, CryptoConfig::new(key));
        alice.wait_for_live().await.unwrap();
        bob.wait_for_live().await.unwrap();

        edit(&alice, "title", "Groceries").await;
        edit(&bob, "item-1", "milk").await;
        edit(&alice, "item-2", "eggs").await;

        converge(
            &[&alice, &bob],
            &map(&[("title", "Groceries"), ("item-1", "milk"), ("item-2", "eggs")]),
        )
        .await;
    }

    /// The relay only ever stores sealed bytes.
    #[tokio::test]
    async fn relay_never_sees_plaintext() {
        let relay = TestRelay::start().await.unwrap();
        let alice = spawn(&relay, 1, CryptoConfig::new(EncryptionKey::random()));
        alice.wait_for_live().await.unwrap();

        edit(&alice, "secret", "correct horse battery staple").await;
        let stored = wait_until(TIMEOUT, || alice.session().highest_row_id_seen.value() > 0).await;
        assert!(stored);

        let rows = sync_relay::storage::LogStorage::get_rows(relay.relay().storage(), &doc_id())
            .await
            .unwrap();
        assert!(!rows.is_empty());
        let needle = b"correct horse";
        for row in rows {
            assert!(!row.operation.windows(needle.len()).any(|w| w == needle));
        }
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// A client joining late receives the existing history.
    #[tokio::test]
    async fn late_joiner_hydrates_history() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));
        alice.wait_for_live().await.unwrap();
        edit(&alice, "a", "1").await;
        edit(&alice, "b", "2").await;
        let flushed = wait_until(TIMEOUT, || {
            let session = alice.session();
            session.queued_updates == 0 && session.highest_row_id_seen.value() >= 2
        })
        .await;
        assert!(flushed);

        let carol = spawn(&relay, 3, CryptoConfig::new(key));
        carol.wait_for_live().await.unwrap();

        converge(&[&carol], &map(&[("a", "1"), ("b", "2")])).await;
    }

    /// Offline state is pushed up when merging is requested.
    #[tokio::test]
    async fn merge_initial_state_pushes_local_edits() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));
        alice.wait_for_live().await.unwrap();
        edit(&alice, "remote", "yes").await;

        let mut offline = MemoryDocument::new(2);
        offline.insert("local", "yes");
        let bob = spawn_with(
            &relay,
            offline,
            CryptoConfig::new(key),
            config().with_merge_initial_state(true),
        );
        bob.wait_for_live().await.unwrap();

        converge(&[&alice, &bob], &map(&[("remote", "yes"), ("local", "yes")])).await;
    }

    /// Without merging, offline state stays local until edited again.
    #[tokio::test]
    async fn initial_state_stays_local_without_merge() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));
        alice.wait_for_live().await.unwrap();

        let mut offline = MemoryDocument::new(2);
        offline.insert("draft", "unsent");
        let bob = spawn_with(&relay, offline, CryptoConfig::new(key), config());
        bob.wait_for_live().await.unwrap();
        edit(&bob, "sent", "yes").await;

        converge(&[&alice], &map(&[("sent", "yes")])).await;
        assert_eq!(entries(&bob).get("draft").map(String::as_str), Some("unsent"));
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// After rotation old rows stay readable and new rows use the new key.
    #[tokio::test]
    async fn key_rotation_keeps_history_readable() {
        let relay = TestRelay::start().await.unwrap();
        let old_key = EncryptionKey::random();
        let new_key = EncryptionKey::random();

        let alice = spawn(&relay, 1, CryptoConfig::new(old_key.clone()));
        alice.wait_for_live().await.unwrap();
        edit(&alice, "before", "rotation").await;
        let flushed = wait_until(TIMEOUT, || alice.session().highest_row_id_seen.value() >= 1).await;
        assert!(flushed);

        alice
            .change_config(CryptoConfig::new(old_key.clone()).rotated(new_key.clone()))
            .unwrap();
        edit(&alice, "after", "rotation").await;

        let carol = spawn(&relay, 3, CryptoConfig::new(new_key).with_old_key(old_key));
        carol.wait_for_live().await.unwrap();
        converge(
            &[&alice, &carol],
            &map(&[("before", "rotation"), ("after", "rotation")]),
        )
        .await;
    }

    /// A client with the wrong key skips rows instead of applying garbage.
    #[tokio::test]
    async fn wrong_key_rows_are_skipped() {
        let relay = TestRelay::start().await.unwrap();
        let alice = spawn(&relay, 1, CryptoConfig::new(EncryptionKey::random()));
        alice.wait_for_live().await.unwrap();
        edit(&alice, "k", "v").await;
        let flushed = wait_until(TIMEOUT, || alice.session().highest_row_id_seen.value() >= 1).await;
        assert!(flushed);

        let mallory = SyncProvider::spawn(
            relay.client(),
            MemoryDocument::new(66),
            CryptoConfig::new(EncryptionKey::random()),
            config(),
        )
        .unwrap();
        mallory.wait_for_live().await.unwrap();

        assert!(entries(&mallory).is_empty());
        assert!(mallory.session().highest_row_id_seen.value() >= 1);
    }

    // ========================================================================
    // Connection Loss
    // ========================================================================

    /// A dropped link is re-established and edits made meanwhile arrive.
    #[tokio::test]
    async fn reconnect_catches_up_both_ways() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));

        let bob_transport = relay.client();
        let bob = SyncProvider::spawn(
            bob_transport.clone(),
            MemoryDocument::new(2),
            CryptoConfig::new(key),
            config().with_reconnect_backoff(ReconnectBackoff {
                base: Duration::from_millis(300),
                cap: Duration::from_millis(600),
                max_jitter: Duration::ZERO,
            }),
        )
        .unwrap();
        alice.wait_for_live().await.unwrap();
        bob.wait_for_live().await.unwrap();
        let mut bob_events = bob.subscribe_events();

        bob_transport.sever();
        wait_for_event(&mut bob_events, |e| matches!(e, ProviderEvent::Disconnected { .. })).await;

        edit(&alice, "while-away", "alice").await;
        edit(&bob, "offline-edit", "bob").await;

        wait_for_event(&mut bob_events, |e| matches!(e, ProviderEvent::Live)).await;
        converge(
            &[&alice, &bob],
            &map(&[("while-away", "alice"), ("offline-edit", "bob")]),
        )
        .await;
    }

    /// After disconnect nothing reaches the document.
    #[tokio::test]
    async fn disconnected_provider_stops_receiving() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));
        let bob = spawn(&relay, 2, CryptoConfig::new(key));
        alice.wait_for_live().await.unwrap();
        bob.wait_for_live().await.unwrap();

        bob.disconnect().await;
        assert!(bob.state().is_terminal());

        edit(&alice, "late", "edit").await;
        converge(&[&alice], &map(&[("late", "edit")])).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(entries(&bob).is_empty());
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Snapshots shrink the log and newcomers still converge.
    #[tokio::test]
    async fn snapshot_compacts_log_for_newcomers() {
        let relay = TestRelay::start_on_disk().await.unwrap();
        let key = EncryptionKey::random();
        let compacting = config().with_snapshot_policy(
            SnapshotPolicy::new(3, 3).with_check_interval(Duration::from_millis(50)),
        );
        let alice = spawn_with(
            &relay,
            MemoryDocument::new(1),
            CryptoConfig::new(key.clone()),
            compacting,
        );
        alice.wait_for_live().await.unwrap();
        let mut events = alice.subscribe_events();

        // One row per edit, so the threshold counts each of them
        for i in 0..5 {
            let before = alice.session().highest_row_id_seen;
            edit(&alice, &format!("k{i}"), &format!("v{i}")).await;
            let appended =
                wait_until(TIMEOUT, || alice.session().highest_row_id_seen > before).await;
            assert!(appended);
        }
        wait_for_event(&mut events, |e| matches!(e, ProviderEvent::Snapshotted { .. })).await;

        let rows = sync_relay::storage::LogStorage::get_rows(relay.relay().storage(), &doc_id())
            .await
            .unwrap();
        assert!(rows.len() < 5, "log not compacted: {} rows", rows.len());

        let carol = spawn(&relay, 3, CryptoConfig::new(key));
        carol.wait_for_live().await.unwrap();
        let expected: BTreeMap<String, String> = (0..5)
            .map(|i| (format!("k{i}"), format!("v{i}")))
            .collect();
        converge(&[&alice, &carol], &expected).await;
    }

    /// Awareness state is carried alongside document edits.
    #[tokio::test]
    async fn awareness_reaches_peers() {
        let relay = TestRelay::start().await.unwrap();
        let key = EncryptionKey::random();
        let alice = spawn(&relay, 1, CryptoConfig::new(key.clone()));
        let bob = spawn(&relay, 2, CryptoConfig::new(key));
        alice.wait_for_live().await.unwrap();
        bob.wait_for_live().await.unwrap();

        alice.document().lock().await.set_awareness(b"cursor:12".to_vec());

        let seen = wait_until(TIMEOUT, || {
            bob.document()
                .try_lock()
                .map(|doc| doc.awareness_of(1) == Some(b"cursor:12".as_slice()))
                .unwrap_or(false)
        })
        .await;
        assert!(seen);
    }
}
