//! RabbitMQ consumer
//!
//! Owns one connection and one channel. The consume loop runs in a
//! background task, spawns a task per delivery, and re-establishes the
//! session whenever the delivery stream ends.

use crate::cancel::{CancelHandle, CancelSignal};
use crate::config::ConsumerConfig;
use crate::dispatch::{Dispatcher, Disposition};
use crate::error::WorkerError;
use crate::event::MessageType;
use crate::metrics::{ConsumerMetrics, Outcome};
use crate::registry::{HandlerRegistry, MessageHandler};
use crate::retry;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Time handlers get to observe their cancel signal after the grace period
const CANCEL_SETTLE: Duration = Duration::from_secs(2);

/// A live connection plus the channel deliveries arrive on
struct Session {
    connection: Connection,
    channel: Channel,
    /// Types bound while the session was opened
    bound: Vec<MessageType>,
}

impl Session {
    async fn open(config: &ConsumerConfig, bindings: &[MessageType]) -> Result<Self, WorkerError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions { global: false })
            .await?;

        let session = Self {
            connection,
            channel,
            bound: bindings.to_vec(),
        };
        session.declare_topology(config).await?;
        session.bind(config, bindings).await?;
        Ok(session)
    }

    /// Idempotent: exchange, DLX, DLQ bound with `#`, main queue with the
    /// dead-letter argument.
    async fn declare_topology(&self, config: &ConsumerConfig) -> Result<(), WorkerError> {
        let durable_exchange = ExchangeDeclareOptions {
            durable: true,
            auto_delete: false,
            ..ExchangeDeclareOptions::default()
        };
        let durable_queue = QueueDeclareOptions {
            durable: true,
            auto_delete: false,
            ..QueueDeclareOptions::default()
        };
        let dlx = config.dlx_name();
        let dlq = config.dlq_name();

        self.channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                durable_exchange,
                FieldTable::default(),
            )
            .await?;

        self.channel
            .exchange_declare(&dlx, ExchangeKind::Direct, durable_exchange, FieldTable::default())
            .await?;

        self.channel
            .queue_declare(&dlq, durable_queue, FieldTable::default())
            .await?;
        self.channel
            .queue_bind(&dlq, &dlx, "#", QueueBindOptions::default(), FieldTable::default())
            .await?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(dlx.as_str())),
        );

        if let Err(e) = self
            .channel
            .queue_declare(&config.queue, durable_queue, arguments)
            .await
        {
            let err = WorkerError::from(e);
            if err.is_precondition_failed() {
                error!(
                    queue = %config.queue,
                    dlx = %dlx,
                    "Queue exists with different arguments; delete it or align x-dead-letter-exchange"
                );
            }
            return Err(err);
        }

        debug!(exchange = %config.exchange, queue = %config.queue, dlx = %dlx, dlq = %dlq, "Topology declared");
        Ok(())
    }

    async fn bind(&self, config: &ConsumerConfig, bindings: &[MessageType]) -> Result<(), WorkerError> {
        for message_type in bindings {
            bind_type(&self.channel, config, message_type).await?;
        }
        Ok(())
    }

    async fn consume(&self, config: &ConsumerConfig) -> Result<lapin::Consumer, WorkerError> {
        Ok(self
            .channel
            .basic_consume(
                &config.queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?)
    }

    async fn close(self) {
        if let Err(e) = self.channel.close(200, "consumer closing").await {
            debug!(error = %e, "Channel close failed");
        }
        if let Err(e) = self.connection.close(200, "consumer closing").await {
            debug!(error = %e, "Connection close failed");
        }
    }
}

async fn bind_type(
    channel: &Channel,
    config: &ConsumerConfig,
    message_type: &MessageType,
) -> Result<(), WorkerError> {
    channel
        .queue_bind(
            &config.queue,
            &config.exchange,
            message_type.as_str(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    debug!(queue = %config.queue, routing_key = %message_type, "Queue bound");
    Ok(())
}

/// Why the consume loop stopped reading
enum LoopExit {
    Shutdown,
    StreamClosed,
}

/// State handed back by the consume loop on shutdown
struct Stopped {
    tasks: JoinSet<()>,
    session: Option<Session>,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Stopped>,
}

struct Shared {
    config: ConsumerConfig,
    dispatcher: Dispatcher,
    metrics: ConsumerMetrics,
    handler_cancel: CancelHandle,
    /// Channel of the session currently consuming, if any
    live_channel: RwLock<Option<Channel>>,
}

/// AMQP consumer with retry accounting and dead-lettering.
pub struct AmqpConsumer {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl AmqpConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        let registry = HandlerRegistry::new();
        let (handler_cancel, _) = CancelSignal::pair();
        Self {
            shared: Arc::new(Shared {
                dispatcher: Dispatcher::new(registry, config.max_retries),
                metrics: ConsumerMetrics::new(config.queue.clone()),
                handler_cancel,
                live_channel: RwLock::new(None),
                config,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.shared.config
    }

    /// Register a handler. While a session is consuming, the new type is
    /// bound on its channel right away; otherwise on the next (re)connect.
    pub async fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.shared
            .dispatcher
            .registry()
            .register(message_type.clone(), handler)
            .await;

        let live = self.shared.live_channel.read().await.clone();
        if let Some(channel) = live {
            if let Err(e) = bind_type(&channel, &self.shared.config, &message_type).await {
                warn!(
                    routing_key = %message_type,
                    error = %e,
                    "Binding on the live channel failed, will bind on reconnect"
                );
            }
        }
    }

    /// Connect, declare topology, bind registered types, and start
    /// consuming in the background.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(WorkerError::AlreadyStarted);
        }

        let session = self.connect_with_attempts().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run(session, shutdown_rx).await });

        info!(
            exchange = %self.shared.config.exchange,
            queue = %self.shared.config.queue,
            prefetch = self.shared.config.prefetch_count,
            max_retries = self.shared.config.max_retries,
            "AMQP consumer started"
        );

        *running = Some(Running {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop pulling deliveries, wait up to `grace` for in-flight handlers,
    /// cancel the rest, then close the channel and connection.
    pub async fn close(&self, grace: Duration) -> Result<(), WorkerError> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(WorkerError::NotStarted);
        };

        running.shutdown_tx.send_replace(true);
        let Stopped { mut tasks, session } = match running.handle.await {
            Ok(stopped) => stopped,
            Err(e) => {
                error!(error = %e, "Consume loop task failed");
                return Ok(());
            }
        };

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), grace_secs = grace.as_secs(), "Waiting for in-flight handlers");
        }

        let drained = tokio::time::timeout(grace, drain(&mut tasks)).await.is_ok();
        if !drained {
            warn!(remaining = tasks.len(), "Grace period elapsed, cancelling in-flight handlers");
            self.shared.handler_cancel.cancel();
            if tokio::time::timeout(CANCEL_SETTLE, drain(&mut tasks)).await.is_err() {
                tasks.shutdown().await;
            }
        }

        if let Some(session) = session {
            session.close().await;
        }

        info!("AMQP consumer stopped");
        Ok(())
    }

    async fn connect_with_attempts(&self) -> Result<Session, WorkerError> {
        let config = &self.shared.config;
        let bindings = self.shared.dispatcher.registry().message_types().await;
        let mut last_error = String::new();

        for attempt in 1..=config.connect_attempts {
            match Session::open(config, &bindings).await {
                Ok(session) => {
                    info!(attempt, "Connected to broker");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = config.connect_attempts,
                        error = %e,
                        "Broker connection failed"
                    );
                    last_error = e.to_string();
                    if attempt < config.connect_attempts {
                        tokio::time::sleep(config.reconnect_delay).await;
                    }
                }
            }
        }

        Err(WorkerError::ConnectExhausted {
            attempts: config.connect_attempts,
            last_error,
        })
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Delivery task failed");
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>, initial: Session, mut shutdown: watch::Receiver<bool>) -> Stopped {
        let mut tasks = JoinSet::new();
        let mut session = Some(initial);

        loop {
            let current = match session.take() {
                Some(current) => current,
                None => match self.reconnect(&mut shutdown).await {
                    Some(current) => current,
                    None => return Stopped { tasks, session: None },
                },
            };

            if let Err(e) = self.attach(&current).await {
                warn!(error = %e, "Binding late registrations failed, reconnecting");
                self.detach().await;
                current.close().await;
                continue;
            }

            let exit = self.consume(&current, &mut tasks, &mut shutdown).await;
            self.detach().await;
            match exit {
                LoopExit::Shutdown => {
                    return Stopped {
                        tasks,
                        session: Some(current),
                    };
                }
                LoopExit::StreamClosed => {
                    warn!(
                        delay_secs = self.config.reconnect_delay.as_secs(),
                        "Delivery stream closed, reconnecting"
                    );
                    current.close().await;
                }
            }
        }
    }

    /// Publish the session's channel for late registrations, then bind any
    /// type registered after the session read its bindings.
    async fn attach(&self, session: &Session) -> Result<(), WorkerError> {
        *self.live_channel.write().await = Some(session.channel.clone());

        let missing: Vec<MessageType> = self
            .dispatcher
            .registry()
            .message_types()
            .await
            .into_iter()
            .filter(|message_type| !session.bound.contains(message_type))
            .collect();
        session.bind(&self.config, &missing).await
    }

    async fn detach(&self) {
        *self.live_channel.write().await = None;
    }

    async fn consume(
        self: &Arc<Self>,
        session: &Session,
        tasks: &mut JoinSet<()>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopExit {
        let mut deliveries = match session.consume(&self.config).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(error = %e, "basic.consume failed");
                return LoopExit::StreamClosed;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, no longer pulling deliveries");
                        return LoopExit::Shutdown;
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        self.metrics.delivery_received();
                        let shared = Arc::clone(self);
                        let channel = session.channel.clone();
                        tasks.spawn(async move { shared.process(channel, delivery).await });
                        self.metrics.in_flight(tasks.len());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Delivery stream error");
                        return LoopExit::StreamClosed;
                    }
                    None => return LoopExit::StreamClosed,
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Delivery task failed");
                    }
                    self.metrics.in_flight(tasks.len());
                }
            }
        }
    }

    /// Retry until a session is up; `None` when shutdown arrives first
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Session> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return None,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
            if *shutdown.borrow() {
                return None;
            }

            let bindings = self.dispatcher.registry().message_types().await;
            match Session::open(&self.config, &bindings).await {
                Ok(session) => {
                    info!("Reconnected to broker");
                    self.metrics.reconnected();
                    return Some(session);
                }
                Err(e) => warn!(error = %e, "Reconnect failed, will retry"),
            }
        }
    }

    async fn process(&self, channel: Channel, delivery: Delivery) {
        let started = Instant::now();
        let retry_count = retry::delivery_retry_count(&delivery.properties);
        let cancel = self.handler_cancel.signal();

        let disposition = self
            .dispatcher
            .dispatch(&delivery.data, retry_count, &cancel)
            .await;

        let outcome = self.settle(&channel, &delivery, &disposition).await;
        self.metrics.delivery_settled(outcome, started.elapsed());
    }

    async fn settle(&self, channel: &Channel, delivery: &Delivery, disposition: &Disposition) -> Outcome {
        let routing_key = delivery.routing_key.as_str();
        let result = match disposition {
            Disposition::Ack | Disposition::Drop => delivery.acker.ack(BasicAckOptions::default()).await,
            Disposition::DeadLetter => {
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        multiple: false,
                    })
                    .await
            }
            Disposition::Republish { retry_count } => {
                return self.republish(channel, delivery, *retry_count).await;
            }
            Disposition::Abandon => Ok(()),
        };

        if let Err(e) = result {
            error!(routing_key, disposition = ?disposition, error = %e, "Failed to settle delivery");
        }
        Outcome::from(disposition)
    }

    /// Publish a copy to the main exchange with the new count, then ack the
    /// original. Falls back to nack-with-requeue if the publish fails.
    async fn republish(&self, channel: &Channel, delivery: &Delivery, retry_count: u32) -> Outcome {
        let routing_key = delivery.routing_key.as_str();
        let properties = retry::republish_properties(&delivery.properties, retry_count);

        let published = async {
            channel
                .basic_publish(
                    &self.config.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &delivery.data,
                    properties,
                )
                .await?
                .await?;
            Ok::<(), lapin::Error>(())
        }
        .await;

        match published {
            Ok(()) => {
                info!(routing_key, retry_count, "Republished message for retry");
                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                    error!(routing_key, error = %e, "Failed to ack original after republish");
                }
                Outcome::Republish
            }
            Err(e) => {
                error!(routing_key, retry_count, error = %e, "Republish failed, requeueing original");
                if let Err(e) = delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        multiple: false,
                    })
                    .await
                {
                    error!(routing_key, error = %e, "Failed to requeue original");
                }
                Outcome::Requeue
            }
        }
    }
}
