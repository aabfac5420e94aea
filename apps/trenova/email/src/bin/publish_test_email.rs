//! Test binary to publish an `email.send` event to RabbitMQ
//!
//! Run with: cargo run -p trenova_email --bin publish_test_email -- you@example.com

use amqp_worker::{Message, MessageType};
use core_config::FromEnv;
use core_config::amqp::AmqpConfig;
use lapin::{BasicProperties, Connection, ConnectionProperties, options::BasicPublishOptions};
use serde_json::json;
use uuid::Uuid;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let to = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "test@example.com".to_string());

    let config = AmqpConfig::from_env()?;
    println!("Connecting to RabbitMQ at {}:{}", config.host, config.port);

    let connection = Connection::connect(&config.url(), ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    let message = Message::new(
        Uuid::now_v7().to_string(),
        MessageType::email_send(),
        "test-tenant",
        json!({
            "template": "welcome",
            "subject": "Test email from the email service",
            "to": [to],
            "data": {"Name": "Tester", "Username": "tester"}
        }),
    );

    channel
        .basic_publish(
            &config.exchange,
            MessageType::EMAIL_SEND,
            BasicPublishOptions::default(),
            &message.to_vec()?,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2),
        )
        .await?
        .await?;

    println!("Published message {} to exchange {}", message.id, config.exchange);

    channel.close(200, "done").await?;
    connection.close(200, "done").await?;
    Ok(())
}
