//! Queue scheduling against a live connection: priority order, the
//! concurrency ceiling, and cancellation.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    use bridge_protocol::{Connection, ConnectionConfig};
    use bridge_queue::{AddOptions, QueueError, ResourceAwareQueue};

    use crate::mock_engine::{MockBehavior, MockEngine};

    /// Priorities [1, 5, 1, 5] at concurrency 1 run as
    /// [5 (first), 5 (second), 1 (first), 1 (second)]: priority wins over
    /// arrival, ties keep FIFO order.
    #[tokio::test]
    async fn test_priority_over_arrival_order() {
        let queue = ResourceAwareQueue::new(1);

        // Occupy the single slot so the four probes queue up behind it.
        let gate = Arc::new(Notify::new());
        let wait = Arc::clone(&gate);
        let blocker = queue.submit_with_resource_lock(
            move || async move {
                wait.notified().await;
                Ok(())
            },
            vec![],
            AddOptions {
                priority: i32::MAX,
                timeout: None,
            },
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let order = Arc::new(order_log::Order::default());
        let mut handles = Vec::new();
        for (label, priority) in [("1a", 1), ("5a", 5), ("1b", 1), ("5b", 5)] {
            let order = Arc::clone(&order);
            handles.push(queue.submit_with_resource_lock(
                move || async move {
                    order.push(label);
                    Ok(())
                },
                vec![],
                AddOptions {
                    priority,
                    timeout: None,
                },
            ));
        }

        gate.notify_one();
        blocker.wait().await.unwrap();
        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(order.snapshot(), vec!["5a", "5b", "1a", "1b"]);
    }

    /// With a ceiling of M and more than M items pending, the engine never
    /// sees more than M commands in flight.
    #[tokio::test]
    async fn test_engine_concurrency_stays_under_ceiling() {
        const CEILING: usize = 3;
        let engine = MockEngine::spawn(MockBehavior::DelayedEcho(Duration::from_millis(40))).await;
        let conn = Arc::new(Connection::new(engine.addr(), ConnectionConfig::default()));
        conn.connect().await.unwrap();

        let queue = ResourceAwareQueue::new(CEILING);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..10 {
            let conn = Arc::clone(&conn);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(queue.submit_with_resource_lock(
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let result = conn.send_command("work", json!({ "i": i })).await?;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(result)
                },
                vec![],
                AddOptions::default(),
            ));
            assert!(queue.stats().processing <= CEILING);
        }

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= CEILING);
        assert_eq!(queue.stats().completed, 10);
        assert_eq!(engine.requests_seen(), 10);
    }

    /// A cancelled pending operation never reaches the engine.
    #[tokio::test]
    async fn test_cancelled_operation_never_dispatches() {
        let engine = MockEngine::spawn(MockBehavior::Echo).await;
        let conn = Arc::new(Connection::new(engine.addr(), ConnectionConfig::default()));
        conn.connect().await.unwrap();

        let queue = ResourceAwareQueue::new(1);
        let gate = Arc::new(Notify::new());
        let wait = Arc::clone(&gate);
        let blocker = queue.submit_with_resource_lock(
            move || async move {
                wait.notified().await;
                Ok(())
            },
            vec![],
            AddOptions::default(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let dispatched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dispatched);
        let conn_for_op = Arc::clone(&conn);
        let victim = queue.submit_with_resource_lock(
            move || async move {
                flag.store(true, Ordering::SeqCst);
                conn_for_op.send_command("never", json!({})).await?;
                Ok(())
            },
            vec!["scene:doomed".to_string()],
            AddOptions::default(),
        );

        assert!(queue.cancel(victim.id()));
        assert!(matches!(victim.wait().await, Err(QueueError::Cancelled)));

        gate.notify_one();
        blocker.wait().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!dispatched.load(Ordering::SeqCst));
        assert_eq!(engine.requests_seen(), 0);
        assert!(queue.current_locks().is_empty());
    }

    /// Tiny ordered-push helper; a Vec behind a mutex, nothing more.
    mod order_log {
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct Order(Mutex<Vec<&'static str>>);

        impl Order {
            pub fn push(&self, label: &'static str) {
                self.0.lock().expect("order lock").push(label);
            }

            pub fn snapshot(&self) -> Vec<&'static str> {
                self.0.lock().expect("order lock").clone()
            }
        }
    }
}
