use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    config::Config,
    handler::{HandlerRegistry, LogDeadLetter, LoggingHandler},
    kafka::{
        consumer::KafkaTransport, offset_tracker::OffsetTracker, poller::Poller,
        rebalance::RebalanceGate, transport::ConsumerTransport,
    },
    schema::{
        decoder::RecordDecoder,
        registry::{json_decode_fn, SchemaRegistry},
    },
};

/// The stream consumer service: wires config, schema registry, handlers and
/// the poll loop together, and owns the shutdown channel.
pub struct StreamConsumerService {
    config: Config,
    poller: Option<Poller>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl StreamConsumerService {
    pub fn new(config: Config) -> Result<Self> {
        config.validate().with_context(|| {
            format!(
                "Configuration validation failed for topics '{}' and group '{}'",
                config.kafka_topics, config.kafka_consumer_group
            )
        })?;

        Ok(Self {
            config,
            poller: None,
            shutdown_tx: None,
        })
    }

    /// Build the schema registry from the configured topic bindings. Every
    /// bound topic decodes as JSON through the schema-registry wire format.
    fn build_schema_registry(&self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for (topic, schema_id) in self.config.parse_schema_bindings()? {
            registry
                .register(schema_id, &topic, json_decode_fn())
                .with_context(|| format!("Failed to bind schema {schema_id} to topic '{topic}'"))?;
            info!(topic, schema_id, "Registered topic schema");
        }
        Ok(registry)
    }

    /// Create the Kafka consumer and assemble the poller.
    pub fn initialize(&mut self) -> Result<()> {
        if self.poller.is_some() {
            return Err(anyhow::anyhow!("Service already initialized"));
        }

        let gate = Arc::new(RebalanceGate::new());
        let tracker = Arc::new(OffsetTracker::new());

        let transport = KafkaTransport::from_config(
            &self.config.build_consumer_config(),
            &self.config.topics(),
            gate.clone(),
            tracker.clone(),
            self.config.batch_size,
            self.config.batch_timeout(),
        )
        .with_context(|| {
            format!(
                "Failed to create Kafka consumer for topics '{}' with group '{}'",
                self.config.kafka_topics, self.config.kafka_consumer_group
            )
        })?;
        let transport: Arc<dyn ConsumerTransport> = Arc::new(transport);

        let registry = Arc::new(self.build_schema_registry()?);

        let mut handlers = HandlerRegistry::new();
        for topic in self.config.topics() {
            handlers.register(topic, Arc::new(LoggingHandler));
        }

        self.poller = Some(Poller::new(
            transport,
            RecordDecoder::new(registry),
            Arc::new(handlers),
            Arc::new(LogDeadLetter),
            tracker,
            gate,
        ));

        info!(
            topics = %self.config.kafka_topics,
            group = %self.config.kafka_consumer_group,
            "Initialized stream consumer"
        );

        Ok(())
    }

    /// Run the service, blocking until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let signal = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl+c signal");
        };
        self.run_with_shutdown(signal).await
    }

    /// Run the service with a custom shutdown signal (useful for testing).
    pub async fn run_with_shutdown(
        mut self,
        shutdown_signal: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        if self.poller.is_none() {
            self.initialize()?;
        }

        let poller = self
            .poller
            .take()
            .ok_or_else(|| anyhow::anyhow!("Poller not initialized"))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        info!("Starting stream consumer service");

        let mut poller_handle = tokio::spawn(async move { poller.run_loop(shutdown_rx).await });

        // A fatal loop error should take the service down without waiting
        // for an operator signal.
        tokio::select! {
            () = shutdown_signal => {
                info!("Received shutdown signal, shutting down gracefully...");
            }
            result = &mut poller_handle => {
                return match result {
                    Ok(Ok(())) => {
                        info!("Poller stopped on its own");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!("Poller stopped with error: {e:#}");
                        Err(e.into())
                    }
                    Err(e) => Err(anyhow::anyhow!("Poller task panicked: {e:#}")),
                };
            }
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        match tokio::time::timeout(self.config.shutdown_timeout(), poller_handle).await {
            Ok(Ok(Ok(()))) => info!("Poller stopped normally"),
            Ok(Ok(Err(e))) => {
                error!("Poller stopped with error: {e:#}");
                return Err(e.into());
            }
            Ok(Err(e)) => error!("Poller task panicked: {e:#}"),
            Err(_) => error!(
                "Poller shutdown timed out after {:?}",
                self.config.shutdown_timeout()
            ),
        }

        info!("Stream consumer service stopped");
        Ok(())
    }
}
