use std::sync::Arc;
use std::time::{Duration, Instant};

use avrosub::{
    AvroSchema, Client, Error, InitialPosition, Int32Schema, MemoryBroker, SessionState, User,
    USER_SCHEMA,
};
use futures::StreamExt;

const TOPIC: &str = "my-topic-avro";

fn setup() -> (MemoryBroker, Client) {
    let broker = MemoryBroker::new();
    let client = Client::with_connection(Arc::new(broker.clone()));
    (broker, client)
}

fn user_schema() -> AvroSchema<User> {
    AvroSchema::new(USER_SCHEMA).unwrap()
}

async fn publish(client: &Client, users: &[User]) {
    let producer = client
        .new_producer(user_schema())
        .topic(TOPIC)
        .create()
        .await
        .unwrap();
    for user in users {
        producer.send(user).await.unwrap();
    }
}

async fn subscribe(client: &Client, name: &str, position: InitialPosition) -> avrosub::Consumer<User> {
    client
        .new_consumer(user_schema())
        .topic(TOPIC)
        .subscription_name(name)
        .subscription_initial_position(position)
        .subscribe()
        .await
        .unwrap()
}

#[tokio::test]
async fn receives_and_acknowledges_published_user() {
    let (broker, client) = setup();
    publish(&client, &[User::new("xyz", 18)]).await;

    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;
    let message = consumer.receive(Duration::from_secs(3)).await.unwrap();
    let user = message.value().unwrap();
    assert_eq!(user.age, 18);
    assert_eq!(user.name, "xyz");
    assert_eq!(message.topic(), TOPIC);
    assert!(message.publish_time().is_some());

    consumer.acknowledge(&message).await.unwrap();
    assert!(message.is_acknowledged());
    assert_eq!(broker.backlog(TOPIC, "sub"), Some(0));
}

#[tokio::test]
async fn empty_topic_times_out_after_the_deadline() {
    let (_broker, client) = setup();
    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;

    let timeout = Duration::from_secs(1);
    let started = Instant::now();
    let err = consumer.receive(timeout).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == timeout));
    assert!(err.is_retryable());
    assert!(started.elapsed() >= timeout);
    assert_eq!(consumer.state(), SessionState::Idle);
}

#[tokio::test]
async fn acknowledging_twice_changes_nothing() {
    let (broker, client) = setup();
    publish(&client, &[User::new("a", 1), User::new("b", 2)]).await;
    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;

    let first = consumer.receive(Duration::from_secs(1)).await.unwrap();
    consumer.acknowledge(&first).await.unwrap();
    assert_eq!(broker.backlog(TOPIC, "sub"), Some(1));
    consumer.acknowledge(&first).await.unwrap();
    assert_eq!(broker.backlog(TOPIC, "sub"), Some(1));

    let second = consumer.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.value().unwrap(), User::new("b", 2));
}

#[tokio::test]
async fn close_fails_pending_receive() {
    let (broker, client) = setup();
    let consumer = Arc::new(subscribe(&client, "sub", InitialPosition::Earliest).await);

    let pending = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.receive(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(consumer.state(), SessionState::Receiving);

    let started = Instant::now();
    consumer.close().await.unwrap();
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Closed)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(broker.open_cursors(TOPIC, "sub"), 0);

    assert_eq!(consumer.state(), SessionState::Closed);
    assert!(matches!(
        consumer.receive(Duration::from_millis(10)).await,
        Err(Error::Closed)
    ));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn dropping_a_consumer_releases_its_cursor() {
    let (broker, client) = setup();
    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;
    assert_eq!(broker.open_cursors(TOPIC, "sub"), 1);
    drop(consumer);
    assert_eq!(broker.open_cursors(TOPIC, "sub"), 0);
}

#[tokio::test]
async fn closing_the_client_closes_its_consumers() {
    let (broker, client) = setup();
    let consumer = Arc::new(subscribe(&client, "sub", InitialPosition::Earliest).await);
    let idle = subscribe(&client, "idle", InitialPosition::Earliest).await;
    assert_eq!(broker.open_cursors(TOPIC, "sub"), 1);
    assert_eq!(broker.open_cursors(TOPIC, "idle"), 1);

    let pending = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.recv().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await.unwrap();

    assert!(matches!(pending.await.unwrap(), Err(Error::Closed)));
    assert!(consumer.is_closed());
    assert!(idle.is_closed());
    // the broker-side cursors are released while the consumers still exist
    assert_eq!(broker.open_cursors(TOPIC, "sub"), 0);
    assert_eq!(broker.open_cursors(TOPIC, "idle"), 0);
    assert_eq!(client.state(), SessionState::Closed);
    assert!(matches!(
        client
            .new_consumer(user_schema())
            .topic(TOPIC)
            .subscription_name("late")
            .subscribe()
            .await,
        Err(Error::Closed)
    ));
    client.close().await.unwrap();
}

#[tokio::test]
async fn unacknowledged_messages_are_redelivered() {
    let (broker, client) = setup();
    publish(&client, &[User::new("a", 1), User::new("b", 2)]).await;

    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;
    let a = consumer.receive(Duration::from_secs(1)).await.unwrap();
    let _b = consumer.receive(Duration::from_secs(1)).await.unwrap();
    consumer.acknowledge(&a).await.unwrap();
    consumer.close().await.unwrap();
    assert_eq!(broker.backlog(TOPIC, "sub"), Some(1));

    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;
    let again = consumer.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(again.value().unwrap(), User::new("b", 2));
}

#[tokio::test]
async fn latest_subscription_skips_backlog() {
    let (_broker, client) = setup();
    publish(&client, &[User::new("old", 1)]).await;

    let consumer = subscribe(&client, "fresh", InitialPosition::Latest).await;
    assert!(matches!(
        consumer.receive(Duration::from_millis(100)).await,
        Err(Error::Timeout(_))
    ));

    publish(&client, &[User::new("new", 2)]).await;
    let message = consumer.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(message.value().unwrap().name, "new");
}

#[tokio::test]
async fn stream_yields_messages_in_order() {
    let (_broker, client) = setup();
    let users = vec![User::new("a", 1), User::new("b", 2), User::new("c", 3)];
    publish(&client, &users).await;

    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;
    let received: Vec<User> = consumer
        .stream()
        .take(3)
        .map(|message| message.unwrap().value().unwrap())
        .collect()
        .await;
    assert_eq!(received, users);
}

#[tokio::test]
async fn undecodable_message_can_be_skipped() {
    let (broker, client) = setup();
    let ints = client
        .new_producer(Int32Schema::new())
        .topic(TOPIC)
        .create()
        .await
        .unwrap();
    ints.send(&7).await.unwrap();
    publish(&client, &[User::new("xyz", 18)]).await;

    let consumer = subscribe(&client, "sub", InitialPosition::Earliest).await;
    let bad = consumer.receive(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(bad.value(), Err(Error::SchemaMismatch(_))));
    consumer.acknowledge(&bad).await.unwrap();

    let good = consumer.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(good.value().unwrap(), User::new("xyz", 18));
    consumer.acknowledge(&good).await.unwrap();
    assert_eq!(broker.backlog(TOPIC, "sub"), Some(0));
}

#[tokio::test]
async fn rejects_messages_from_another_consumer() {
    let (_broker, client) = setup();
    publish(&client, &[User::new("xyz", 18)]).await;
    let first = subscribe(&client, "one", InitialPosition::Earliest).await;
    let second = subscribe(&client, "two", InitialPosition::Earliest).await;

    let message = first.receive(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        second.acknowledge(&message).await,
        Err(Error::ForeignMessage(_))
    ));
    assert!(!message.is_acknowledged());
}

#[tokio::test]
async fn subscribe_validates_its_arguments() {
    let (_broker, client) = setup();
    assert!(matches!(
        client
            .new_consumer(user_schema())
            .topic("not a topic")
            .subscription_name("sub")
            .subscribe()
            .await,
        Err(Error::InvalidTopic { .. })
    ));
    assert!(matches!(
        client
            .new_consumer(user_schema())
            .subscription_name("sub")
            .subscribe()
            .await,
        Err(Error::Config(_))
    ));
    assert!(matches!(
        client
            .new_consumer(user_schema())
            .topic(TOPIC)
            .subscription_name("")
            .subscribe()
            .await,
        Err(Error::InvalidSubscription(_))
    ));
}

#[tokio::test]
async fn consumer_state_follows_session() {
    let (_broker, client) = setup();
    assert_eq!(client.state(), SessionState::Connected);
    publish(&client, &[User::new("xyz", 18)]).await;

    let consumer = client
        .new_consumer(user_schema())
        .topic(TOPIC)
        .subscription_name("sub")
        .subscription_initial_position(InitialPosition::Earliest)
        .consumer_name("reader")
        .subscribe()
        .await
        .unwrap();
    assert_eq!(consumer.name(), "reader");
    assert_eq!(consumer.state(), SessionState::Subscribed);

    consumer.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(consumer.state(), SessionState::Idle);

    consumer.close().await.unwrap();
    assert_eq!(consumer.state(), SessionState::Closed);
}

#[tokio::test]
async fn builder_requires_a_supported_service_url() {
    assert!(matches!(
        Client::builder().build().await,
        Err(Error::Config(_))
    ));
    assert!(matches!(
        Client::builder()
            .service_url("pulsar://localhost:6650")
            .build()
            .await,
        Err(Error::Config(_))
    ));
}
