use std::time::Duration;

use anyhow::{bail, Context, Result};
use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "stream-consumer")]
    pub kafka_consumer_group: String,

    /// Comma-separated list of topics to subscribe to.
    #[envconfig(default = "cars,messages")]
    pub kafka_topics: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    /// Comma-separated `topic:schema-id` pairs binding a topic to the JSON
    /// schema its payloads are wire-format encoded with. Topics without a
    /// binding are consumed as raw bytes.
    #[envconfig(default = "cars:1")]
    pub schema_bindings: String,

    // Poll loop configuration
    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub batch_timeout_ms: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn topics(&self) -> Vec<String> {
        self.kafka_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    /// Parse the configured `topic:schema-id` pairs.
    pub fn parse_schema_bindings(&self) -> Result<Vec<(String, u32)>> {
        let mut bindings = Vec::new();
        for pair in self
            .schema_bindings
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let Some((topic, id)) = pair.split_once(':') else {
                bail!("schema binding '{pair}' is not of the form topic:schema-id");
            };
            let schema_id: u32 = id
                .trim()
                .parse()
                .with_context(|| format!("schema binding '{pair}' has a non-numeric id"))?;
            bindings.push((topic.trim().to_string(), schema_id));
        }
        Ok(bindings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topics().is_empty() {
            bail!("KAFKA_TOPICS must name at least one topic");
        }
        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        let topics = self.topics();
        for (topic, _) in self.parse_schema_bindings()? {
            if !topics.contains(&topic) {
                bail!("schema binding names topic '{topic}' which is not subscribed");
            }
        }
        Ok(())
    }

    pub fn build_consumer_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::new(&self.kafka_hosts, &self.kafka_consumer_group)
            .with_tls(self.kafka_tls)
            .with_offset_reset(&self.kafka_consumer_offset_reset)
            .build()
    }
}

/// Kafka consumer configuration builder with group-consumer defaults.
///
/// Sets: auto.offset.store=false, auto.commit=false, socket.timeout.ms,
/// session.timeout.ms, heartbeat.interval.ms, max.poll.interval.ms. The loop
/// owns offset storage and commits, so both automatic paths stay off.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id);

        // Group-consumer defaults
        config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Enable TLS/SSL for the Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    /// Override offset reset policy
    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_consumer_group: "stream-consumer".to_string(),
            kafka_topics: "cars, messages".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_tls: false,
            schema_bindings: "cars:1".to_string(),
            batch_size: 100,
            batch_timeout_ms: 1000,
            shutdown_timeout_secs: 30,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn topics_are_split_and_trimmed() {
        assert_eq!(config().topics(), vec!["cars", "messages"]);
    }

    #[test]
    fn schema_bindings_parse() {
        let mut cfg = config();
        cfg.schema_bindings = "cars:1, messages:7".to_string();
        assert_eq!(
            cfg.parse_schema_bindings().unwrap(),
            vec![("cars".to_string(), 1), ("messages".to_string(), 7)]
        );
    }

    #[test]
    fn malformed_schema_binding_is_rejected() {
        let mut cfg = config();
        cfg.schema_bindings = "cars".to_string();
        assert!(cfg.parse_schema_bindings().is_err());

        cfg.schema_bindings = "cars:lots".to_string();
        assert!(cfg.parse_schema_bindings().is_err());
    }

    #[test]
    fn validate_rejects_binding_for_unsubscribed_topic() {
        let mut cfg = config();
        cfg.schema_bindings = "trucks:3".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn consumer_config_disables_auto_commit() {
        let client_config = config().build_consumer_config();
        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client_config.get("auto.offset.reset"), Some("earliest"));
    }
}
