use logpull::brokers::memory::FIXTURE_TOPIC;
use logpull::brokers::{Broker, BrokerError, MemoryBroker, OffsetBounds};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod helpers;
use helpers::payloads;

#[cfg(test)]
mod memory_broker_tests {
    use super::*;

    // =========================================================================================
    // 1. LIFECYCLE
    // =========================================================================================

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_initialize_seeds_fixture() {
            let broker = MemoryBroker::new();

            let mut expected = HashMap::new();
            expected.insert(
                FIXTURE_TOPIC.to_string(),
                (0..6).map(|i| Bytes::from(format!("msg{}", i))).collect::<Vec<_>>(),
            );

            assert_eq!(broker.is_connected(), (true, true));
            assert_eq!(broker.low_water_mark(), 0);
            assert_eq!(broker.topics(), expected);
        }

        #[tokio::test]
        async fn test_close_connections() {
            let broker = MemoryBroker::new();
            broker.close_connections().await;
            assert_eq!(broker.is_connected(), (false, false));

            // Idempotent
            broker.close_connections().await;
            assert_eq!(broker.is_connected(), (false, false));

            let err = broker
                .consume(&CancellationToken::new(), FIXTURE_TOPIC, 0, false, 5)
                .await
                .unwrap_err();
            assert_eq!(err, BrokerError::NotConnected);
        }

        #[tokio::test]
        async fn test_reinitialize_restores_fixture() {
            let broker = MemoryBroker::new();
            broker.append(FIXTURE_TOPIC, Bytes::from("msg6"));
            broker.set_low_water_mark(4);
            broker.close_connections().await;

            broker.initialize(&CancellationToken::new()).await.unwrap();

            assert_eq!(broker.is_connected(), (true, true));
            assert_eq!(broker.low_water_mark(), 0);
            assert_eq!(broker.topics()[FIXTURE_TOPIC].len(), 6);
        }
    }

    // =========================================================================================
    // 2. CONSUME
    // =========================================================================================

    mod consume {
        use super::*;

        #[tokio::test]
        async fn test_consume_is_bounded_by_max() {
            let broker = MemoryBroker::new();
            let cancel = CancellationToken::new();

            let msgs = broker.consume(&cancel, FIXTURE_TOPIC, 0, false, 5).await.unwrap();
            assert_eq!(payloads(&msgs), vec!["msg0", "msg1", "msg2", "msg3", "msg4"]);

            let msgs = broker.consume(&cancel, FIXTURE_TOPIC, 0, false, 6).await.unwrap();
            assert_eq!(payloads(&msgs), vec!["msg0", "msg1", "msg2", "msg3", "msg4", "msg5"]);

            let msgs = broker.consume(&cancel, FIXTURE_TOPIC, 0, false, 100).await.unwrap();
            assert_eq!(msgs.len(), 6);
        }

        #[tokio::test]
        async fn test_consume_from_middle() {
            let broker = MemoryBroker::new();
            let msgs = broker
                .consume(&CancellationToken::new(), FIXTURE_TOPIC, 2, false, 2)
                .await
                .unwrap();
            assert_eq!(payloads(&msgs), vec!["msg2", "msg3"]);
        }

        #[tokio::test]
        async fn test_offset_beyond_data_is_empty() {
            let broker = MemoryBroker::new();
            let cancel = CancellationToken::new();

            for offset in [6, 7, 1_000] {
                let msgs = broker.consume(&cancel, FIXTURE_TOPIC, offset, false, 2).await.unwrap();
                assert!(msgs.is_empty());
            }

            let msgs = broker.consume(&cancel, "no-such-topic", 0, true, 2).await.unwrap();
            assert!(msgs.is_empty());
        }

        #[tokio::test]
        async fn test_left_behind_offset() {
            let broker = MemoryBroker::new();
            broker.set_low_water_mark(5);

            let err = broker
                .consume(&CancellationToken::new(), FIXTURE_TOPIC, 2, false, 2)
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "offset is off");

            // Still readable at the mark
            let msgs = broker
                .consume(&CancellationToken::new(), FIXTURE_TOPIC, 5, false, 2)
                .await
                .unwrap();
            assert_eq!(payloads(&msgs), vec!["msg5"]);
        }

        #[tokio::test]
        async fn test_negative_offset_is_off() {
            let broker = MemoryBroker::new();
            let cancel = CancellationToken::new();

            broker.set_low_water_mark(-5);
            assert_eq!(broker.low_water_mark(), 0);

            let err = broker.consume(&cancel, FIXTURE_TOPIC, -2, false, 2).await.unwrap_err();
            assert_eq!(err, BrokerError::OffsetOutOfRange);
            let bounds = broker.offset_bounds(FIXTURE_TOPIC).await.unwrap();
            assert_eq!(bounds.oldest, 0);
        }

        #[tokio::test]
        async fn test_non_positive_max_is_empty() {
            let broker = MemoryBroker::new();
            let cancel = CancellationToken::new();
            assert!(broker.consume(&cancel, FIXTURE_TOPIC, 0, false, 0).await.unwrap().is_empty());
            assert!(broker.consume(&cancel, FIXTURE_TOPIC, 0, false, -3).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_appended_messages_become_visible() {
            let broker = MemoryBroker::new();
            assert_eq!(broker.append(FIXTURE_TOPIC, Bytes::from("msg6")), 6);

            let msgs = broker
                .consume(&CancellationToken::new(), FIXTURE_TOPIC, 6, true, 10)
                .await
                .unwrap();
            assert_eq!(payloads(&msgs), vec!["msg6"]);
        }

        #[tokio::test]
        async fn test_usable_through_trait_object() {
            let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
            let msgs = broker
                .consume(&CancellationToken::new(), FIXTURE_TOPIC, 4, true, 10)
                .await
                .unwrap();
            assert_eq!(payloads(&msgs), vec!["msg4", "msg5"]);
        }
    }

    // =========================================================================================
    // 3. BOUNDS & FIXTURES
    // =========================================================================================

    mod fixtures {
        use super::*;

        #[tokio::test]
        async fn test_offset_bounds() {
            let broker = MemoryBroker::new();
            assert_eq!(
                broker.offset_bounds(FIXTURE_TOPIC).await.unwrap(),
                OffsetBounds { oldest: 0, newest: 6 }
            );

            broker.set_low_water_mark(3);
            assert_eq!(
                broker.offset_bounds(FIXTURE_TOPIC).await.unwrap(),
                OffsetBounds { oldest: 3, newest: 6 }
            );
            assert_eq!(
                broker.offset_bounds("empty").await.unwrap(),
                OffsetBounds { oldest: 0, newest: 0 }
            );
        }

        #[tokio::test]
        async fn test_from_fixture_file() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, r#"{{"orders": ["a", "b", "c"], "audit": []}}"#).unwrap();

            let broker = MemoryBroker::from_fixture_file(file.path()).unwrap();
            let msgs = broker
                .consume(&CancellationToken::new(), "orders", 1, false, 10)
                .await
                .unwrap();
            assert_eq!(payloads(&msgs), vec!["b", "c"]);
            assert!(broker.topics()["audit"].is_empty());
        }

        #[tokio::test]
        async fn test_from_fixture_file_rejects_garbage() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, "not json").unwrap();
            assert!(MemoryBroker::from_fixture_file(file.path()).is_err());
            assert!(MemoryBroker::from_fixture_file("/definitely/not/here.json").is_err());
        }
    }
}
