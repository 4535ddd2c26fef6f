use anyhow::{ensure, Context, Result};
use avrosub::{AvroSchema, Client, InitialPosition, User, USER_SCHEMA};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVICE_URL: &str = "kafka://localhost:9092";
const TOPIC: &str = "my-topic-avro";

/// Produce one Avro-encoded user and read it back through a subscription.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let service_url =
        std::env::var("AVROSUB_SERVICE_URL").unwrap_or_else(|_| DEFAULT_SERVICE_URL.to_owned());
    let client = Client::builder()
        .service_url(&service_url)
        .build()
        .await
        .with_context(|| format!("connecting to {service_url}"))?;

    let consumer = client
        .new_consumer(AvroSchema::<User>::new(USER_SCHEMA)?)
        .topic(TOPIC)
        .subscription_name("sub")
        .subscription_initial_position(InitialPosition::Earliest)
        .subscribe()
        .await?;

    let producer = client
        .new_producer(AvroSchema::<User>::new(USER_SCHEMA)?)
        .topic(TOPIC)
        .create()
        .await?;
    let id = producer.send(&User::new("xyz", 18)).await?;
    tracing::info!(%id, "sent");

    let message = consumer
        .receive(Duration::from_secs(3))
        .await
        .context("no message received")?;
    let user = message.value()?;
    ensure!(user.name == "xyz", "unexpected name {:?}", user.name);
    ensure!(user.age == 18, "unexpected age {}", user.age);
    consumer.acknowledge(&message).await?;
    tracing::info!(name = %user.name, age = user.age, id = %message.id(), "received");

    consumer.close().await?;
    client.close().await?;
    Ok(())
}
