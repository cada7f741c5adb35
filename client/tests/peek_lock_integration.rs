//! Receiver behavior in PeekLock mode: settlement is forwarded to the
//! broker, abandon/defer/dead-letter have their documented effects, and
//! lock expiry returns messages for redelivery.

use claims::{assert_err, assert_ok, assert_some};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use client::broker::memory::{
    DEAD_LETTER_DESCRIPTION_PROPERTY, DEAD_LETTER_REASON_PROPERTY,
};
use client::broker::MemoryBroker;
use client::consumer::{Consumer, ConsumerOptions, StreamOptions};
use client::manager::{BusClient, BusError};
use client::model::{OutgoingMessage, ReceiveMode, ReceivedMessage};

const ENTITY: &str = "invoices";

fn test_client() -> BusClient {
    BusClient::with_broker("test-namespace", Arc::new(MemoryBroker::new()))
}

fn peek_lock_consumer(bus: &BusClient) -> Consumer {
    bus.create_consumer(
        ENTITY,
        ConsumerOptions::default().with_max_wait(Duration::from_millis(500)),
    )
}

async fn send_one(bus: &BusClient, body: &str) {
    assert_ok!(
        bus.create_producer(ENTITY)
            .send_message(OutgoingMessage::text(body))
            .await
    );
}

async fn receive_one(consumer: &Consumer) -> ReceivedMessage {
    let mut messages = assert_ok!(consumer.receive_batch(1).await);
    assert_eq!(messages.len(), 1);
    messages.remove(0)
}

#[tokio::test]
async fn peek_lock_delivery_carries_lock_token() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "locked").await;

    let message = receive_one(&consumer).await;
    assert_eq!(message.receive_mode, ReceiveMode::PeekLock);
    assert_some!(message.lock_token);
    assert_some!(message.locked_until);
    assert_eq!(message.delivery_count, 0);
}

#[tokio::test]
async fn completed_message_is_gone_for_good() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "one").await;

    let message = receive_one(&consumer).await;
    assert_ok!(consumer.complete_message(&message).await);

    assert!(assert_ok!(consumer.receive_batch(1).await).is_empty());
    assert_eq!(assert_ok!(bus.peek_messages(ENTITY, 10, None).await).len(), 0);
}

#[tokio::test]
async fn abandoned_message_is_redelivered_with_incremented_delivery_count() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "retry me").await;

    let first = receive_one(&consumer).await;
    assert_eq!(first.delivery_count, 0);
    assert_ok!(consumer.abandon_message(&first).await);

    let second = receive_one(&consumer).await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.delivery_count, 1);
    assert_ok!(consumer.complete_message(&second).await);
}

#[tokio::test]
async fn deferred_message_is_hidden_until_retrieved_by_sequence() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "later").await;

    let message = receive_one(&consumer).await;
    assert_ok!(consumer.defer_message(&message).await);

    // Hidden from both peek and regular receive.
    assert_eq!(assert_ok!(bus.peek_messages(ENTITY, 10, None).await).len(), 0);
    assert!(assert_ok!(consumer.receive_batch(1).await).is_empty());

    let deferred = assert_ok!(
        consumer
            .receive_deferred_messages(&[message.sequence])
            .await
    );
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].id, message.id);
    assert_eq!(deferred[0].body_str(), "later");
    assert_ok!(consumer.complete_message(&deferred[0]).await);
}

#[tokio::test]
async fn retrieving_unknown_deferred_sequence_fails() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);

    let err = assert_err!(consumer.receive_deferred_messages(&[42]).await);
    assert!(matches!(err, BusError::MessageReceiveFailed(_)));
}

#[tokio::test]
async fn dead_lettered_message_lands_on_the_dlq_with_reason() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "poison").await;

    let message = receive_one(&consumer).await;
    assert_ok!(
        consumer
            .dead_letter_message(
                &message,
                Some("ProcessingFailed".to_string()),
                Some("handler kept failing".to_string()),
            )
            .await
    );

    // Gone from the main entity.
    assert_eq!(assert_ok!(bus.peek_messages(ENTITY, 10, None).await).len(), 0);

    // Receivable from the dead-letter sub-entity, with reason preserved.
    let dlq_consumer = bus.create_consumer(
        &format!("{ENTITY}/$deadletterqueue"),
        ConsumerOptions::default()
            .with_receive_mode(ReceiveMode::ReceiveAndDelete)
            .with_max_wait(Duration::from_millis(500)),
    );
    let dead = receive_one(&dlq_consumer).await;
    assert_eq!(dead.id, message.id);
    assert_eq!(dead.body_str(), "poison");
    assert_eq!(
        dead.properties.get(DEAD_LETTER_REASON_PROPERTY).map(String::as_str),
        Some("ProcessingFailed")
    );
    assert_eq!(
        dead.properties
            .get(DEAD_LETTER_DESCRIPTION_PROPERTY)
            .map(String::as_str),
        Some("handler kept failing")
    );
}

#[tokio::test]
async fn expired_lock_returns_message_for_redelivery() {
    let bus = BusClient::with_broker(
        "test-namespace",
        Arc::new(MemoryBroker::with_lock_duration(Duration::from_millis(40))),
    );
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "slow handler").await;

    let first = receive_one(&consumer).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The original lock is gone; settlement fails and the message comes back.
    let err = assert_err!(consumer.complete_message(&first).await);
    assert!(matches!(err, BusError::LockLost(_)));

    let second = receive_one(&consumer).await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.delivery_count, 1);
}

#[tokio::test]
async fn renew_lock_extends_the_expiry() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "keep me locked").await;

    let mut message = receive_one(&consumer).await;
    let before = assert_some!(message.locked_until);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ok!(consumer.renew_message_lock(&mut message).await);
    let after = assert_some!(message.locked_until);
    assert!(after > before, "renewal must push the expiry forward");

    assert_ok!(consumer.complete_message(&message).await);
}

#[tokio::test]
async fn locked_messages_are_invisible_to_peek() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "hidden while locked").await;

    let message = receive_one(&consumer).await;
    assert_eq!(assert_ok!(bus.peek_messages(ENTITY, 10, None).await).len(), 0);

    assert_ok!(consumer.abandon_message(&message).await);
    assert_eq!(assert_ok!(bus.peek_messages(ENTITY, 10, None).await).len(), 1);
}

#[tokio::test]
async fn streaming_with_auto_complete_settles_successful_messages() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "auto").await;

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors: Arc<Mutex<Vec<BusError>>> = Arc::new(Mutex::new(Vec::new()));

    let received_sink = Arc::clone(&received);
    let error_sink = Arc::clone(&errors);
    let handle = assert_ok!(
        consumer
            .stream(
                move |msg| {
                    let received_sink = Arc::clone(&received_sink);
                    async move {
                        received_sink.lock().unwrap().push(msg.body_str());
                        Ok(())
                    }
                },
                move |err| error_sink.lock().unwrap().push(err),
                StreamOptions::default(),
            )
            .await
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while received.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stopped().await;

    assert_eq!(received.lock().unwrap().as_slice(), ["auto".to_string()]);
    assert!(errors.lock().unwrap().is_empty());

    // Auto-complete settled the message; nothing comes back after the lock
    // would have expired.
    assert!(assert_ok!(consumer.receive_batch(1).await).is_empty());
}

#[tokio::test]
async fn streaming_with_auto_complete_abandons_failed_messages() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "fails once").await;

    let errors: Arc<Mutex<Vec<BusError>>> = Arc::new(Mutex::new(Vec::new()));
    let attempts: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));

    let attempts_counter = Arc::clone(&attempts);
    let error_sink = Arc::clone(&errors);
    let handle = assert_ok!(
        consumer
            .stream(
                move |_msg| {
                    let attempts_counter = Arc::clone(&attempts_counter);
                    async move {
                        let mut attempts = attempts_counter.lock().unwrap();
                        *attempts += 1;
                        if *attempts == 1 {
                            Err(BusError::InternalError("simulated handler failure".to_string()))
                        } else {
                            Ok(())
                        }
                    }
                },
                move |err| error_sink.lock().unwrap().push(err),
                StreamOptions::default(),
            )
            .await
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while *attempts.lock().unwrap() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stopped().await;

    // First attempt failed and was abandoned, second succeeded.
    assert_eq!(*attempts.lock().unwrap(), 2);
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(assert_ok!(consumer.receive_batch(1).await).is_empty());
}

#[tokio::test]
async fn stopping_a_stream_halts_further_deliveries() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    send_one(&bus, "first").await;

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let received_sink = Arc::clone(&received);
    let handle = assert_ok!(
        consumer
            .stream(
                move |msg| {
                    let received_sink = Arc::clone(&received_sink);
                    async move {
                        received_sink.lock().unwrap().push(msg.body_str());
                        Ok(())
                    }
                },
                |_err| {},
                StreamOptions::default(),
            )
            .await
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while received.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stopped().await;

    // A message sent after the stop is not dispatched to the handler.
    send_one(&bus, "second").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(received.lock().unwrap().as_slice(), ["first".to_string()]);
    assert_eq!(assert_ok!(bus.peek_messages(ENTITY, 10, None).await).len(), 1);
}

#[tokio::test]
async fn disposed_consumer_rejects_operations() {
    let bus = test_client();
    let consumer = peek_lock_consumer(&bus);
    consumer.dispose().await;

    let err = assert_err!(consumer.receive_batch(1).await);
    assert_eq!(err, BusError::ConsumerDisposed);
}
