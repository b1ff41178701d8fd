use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use webhook_relay::{
    EventType, InMemoryStorage, MessageData, NewDestination, RelayConfig, UserId, WebhookService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env();
    let mut service = WebhookService::new(Arc::new(InMemoryStorage::new()), config);
    service.start();

    let user = UserId::from("user-42");
    let destination = service
        .register_destination(
            &user,
            &NewDestination::new("https://example.com/webhook", &[EventType::MessageReceived])
                .with_secret("supersecret")
                .with_description("order notifications"),
        )
        .await?;

    let message = MessageData {
        sender_id: "15550001111".into(),
        sender_phone: "15550001111".into(),
        sender_name: Some("Ana".into()),
        content: "hello".into(),
        message_id: "3EB0C767D26A".into(),
        unix_timestamp: chrono::Utc::now().timestamp(),
        ..MessageData::default()
    };

    for record in service.trigger_message_received(&user, message).await.wait().await {
        println!(
            "delivery {} success={} status={} next_retry_at={:?}",
            record.id, record.success, record.response_status, record.next_retry_at
        );
    }

    let stats = service.stats(&user, destination.id).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    service.stop().await;
    Ok(())
}
