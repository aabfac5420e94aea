//! Email Service
//!
//! Consumes `email.send` events from RabbitMQ and delivers them over SMTP or
//! the SendGrid API.
//!
//! ## Architecture
//!
//! ```text
//! Exchange (trenova.events, direct)
//!   ↓ (routing key: email.send)
//! Queue (email.service) ── dead letters ──> trenova.events.dlx ──> email.service.dlq
//!   ↓
//! AmqpConsumer → Dispatcher → EmailSendHandler
//!   ↓ (normalizes payload, renders template)
//! EmailSender → ProviderFactory → SMTP | SendGrid
//! ```
//!
//! In development the template management server runs alongside the
//! consumer.

use amqp_worker::{AmqpConsumer, ConsumerConfig};
use core_config::amqp::AmqpConfig;
use core_config::server::ServerConfig;
use core_config::{Environment, FromEnv};
use email::dev_server::{self, DevServerState};
use email::{
    BodyRenderer, EmailConfig, EmailSendHandler, EmailSender, ProviderFactory, TemplateRegistry,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long in-flight sends may run after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Run the email service
///
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads broker and provider configuration
/// 3. Builds the provider factory and refuses to start without a provider
/// 4. Starts the consumer (bounded connect attempts)
/// 5. Starts the dev template server in development
/// 6. Waits for SIGINT/SIGTERM and drains in-flight work
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - No email provider is configured
/// - The broker cannot be reached within the connect budget
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting email service"
    );

    let amqp_config = AmqpConfig::from_env().wrap_err("Failed to load RabbitMQ configuration")?;
    let email_config = EmailConfig::from_env().wrap_err("Failed to load email configuration")?;
    email_config.log_summary();

    let registry = Arc::new(TemplateRegistry::new(&email_config.templates_dir));
    let renderer = BodyRenderer::with_registry(Arc::clone(&registry));

    let factory = ProviderFactory::from_config(
        email_config.smtp.clone(),
        email_config.sendgrid.clone(),
        renderer,
    )
    .wrap_err("Failed to initialize email providers")?;
    factory
        .validate_config()
        .wrap_err("Email provider configuration is invalid")?;

    let consumer_config = ConsumerConfig::new(
        amqp_config.url(),
        amqp_config.exchange.clone(),
        amqp_config.queue.clone(),
    )
    .with_prefetch_count(amqp_config.prefetch_count)
    .with_max_retries(amqp_config.max_retries)
    .with_reconnect_delay(amqp_config.reconnect_delay);

    info!(
        host = %amqp_config.host,
        port = amqp_config.port,
        exchange = %consumer_config.exchange,
        queue = %consumer_config.queue,
        prefetch = consumer_config.prefetch_count,
        max_retries = consumer_config.max_retries,
        "Consumer configuration loaded"
    );

    let consumer = AmqpConsumer::new(consumer_config);
    let handler = EmailSendHandler::new(EmailSender::new(factory));
    consumer
        .register_handler(EmailSendHandler::message_type(), Arc::new(handler))
        .await;

    consumer
        .start()
        .await
        .wrap_err("Failed to start RabbitMQ consumer")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dev_server = if environment.is_development() {
        let server_config = ServerConfig::from_env().wrap_err("Failed to load server configuration")?;
        let state = DevServerState::new(Arc::clone(&registry), &email_config.samples_dir);
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = dev_server::serve(state, &server_config, shutdown).await {
                error!(error = %e, "Template server failed");
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = consumer.close(SHUTDOWN_GRACE).await {
        warn!(error = %e, "Consumer did not close cleanly");
    }

    if let Some(handle) = dev_server {
        join_logged("template server", handle).await;
    }

    info!("Email service stopped");
    Ok(())
}

/// Await a background task, logging a panic or cancellation instead of
/// dropping it. Returns whether the task finished normally.
async fn join_logged(task: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task, error = %e, "Background task failed");
            false
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
