//! Correlation matching, disconnect semantics, and timeout handling on a
//! single multiplexed connection.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use bridge_protocol::{Connection, ConnectionConfig, ProtocolError};

    use crate::mock_engine::{MockBehavior, MockEngine};

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(1),
            max_connect_attempts: 2,
            connect_retry_delay: Duration::from_millis(20),
            command_timeout: Duration::from_secs(5),
        }
    }

    /// Concurrently issued commands each receive exactly the response whose
    /// correlation ID was assigned to their request, even when the engine
    /// answers in a different order than it received them.
    #[tokio::test]
    async fn test_concurrent_commands_match_out_of_order_responses() {
        const FANOUT: usize = 8;
        let engine = MockEngine::spawn(MockBehavior::ShuffledBatch(FANOUT)).await;
        let conn = Arc::new(Connection::new(engine.addr(), fast_config()));
        conn.connect().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..FANOUT {
            let conn = Arc::clone(&conn);
            tasks.push(tokio::spawn(async move {
                let result = conn
                    .send_command("probe", json!({ "seq": i }))
                    .await
                    .unwrap();
                (i, result)
            }));
        }

        for task in tasks {
            let (i, result) = task.await.unwrap();
            // The payload proves the caller got its own response back.
            assert_eq!(result["params"]["seq"], i as u64);
            assert_eq!(result["echo"], "probe");
        }

        let stats = conn.stats();
        assert_eq!(stats.requests_sent, FANOUT as u64);
        assert_eq!(stats.responses_matched, FANOUT as u64);
        assert_eq!(stats.pending_requests, 0);
    }

    /// Disconnect with K requests outstanding rejects exactly those K and
    /// leaves no dangling pending entries.
    #[tokio::test]
    async fn test_disconnect_rejects_every_outstanding_request() {
        const OUTSTANDING: usize = 5;
        let engine = MockEngine::spawn(MockBehavior::Silent).await;
        let conn = Arc::new(Connection::new(engine.addr(), fast_config()));
        conn.connect().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..OUTSTANDING {
            let conn = Arc::clone(&conn);
            tasks.push(tokio::spawn(async move {
                conn.send_command("hang", json!({ "seq": i })).await
            }));
        }

        // Wait until all requests are registered as pending.
        for _ in 0..50 {
            if conn.stats().pending_requests == OUTSTANDING {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conn.stats().pending_requests, OUTSTANDING);

        conn.disconnect();
        for task in tasks {
            let result = task.await.unwrap();
            assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
        }
        assert_eq!(conn.stats().pending_requests, 0);
        assert!(!conn.is_open());
    }

    /// A request timeout removes the pending entry without tearing down the
    /// socket; the late response is discarded on read and later commands
    /// keep working.
    #[tokio::test]
    async fn test_late_response_after_timeout_is_discarded() {
        let engine = MockEngine::spawn(MockBehavior::DelayedEcho(Duration::from_millis(150))).await;
        let conn = Connection::new(engine.addr(), fast_config());

        let result = conn
            .send_command_with_timeout("slow", json!({}), Duration::from_millis(40))
            .await;
        assert!(matches!(
            result,
            Err(ProtocolError::CommandTimeout { .. })
        ));
        assert!(conn.is_open());

        // Let the late response arrive; it must be dropped, not crash the
        // reader or resolve anything.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(conn.stats().frames_dropped >= 1);

        // Same socket still serves correlated traffic.
        let ok = conn
            .send_command_with_timeout("follow-up", json!({}), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(ok["echo"], "follow-up");
        assert_eq!(engine.accepted(), 1);
    }

    /// Engine error statuses are decoded once at the connection boundary
    /// into the tagged error variant.
    #[tokio::test]
    async fn test_error_status_surfaces_engine_message() {
        let engine = MockEngine::spawn(MockBehavior::ErrorWith("missing asset".into())).await;
        let conn = Connection::new(engine.addr(), fast_config());

        match conn.send_command("asset.load", json!({})).await {
            Err(ProtocolError::Engine { message }) => assert_eq!(message, "missing asset"),
            other => panic!("expected engine error, got {other:?}"),
        }
    }

    /// Correlation IDs are unique across the connection's lifetime; sending
    /// many sequential commands never cross-resolves.
    #[tokio::test]
    async fn test_sequential_commands_resolve_independently() {
        let engine = MockEngine::spawn(MockBehavior::Echo).await;
        let conn = Connection::new(engine.addr(), fast_config());

        for i in 0..20 {
            let result = conn.send_command("tick", json!({ "i": i })).await.unwrap();
            assert_eq!(result["params"]["i"], i as u64);
        }
        assert_eq!(conn.stats().responses_matched, 20);
    }
}
