use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tracing::error;

use crate::kafka::batch::PartitionFetchError;
use crate::metrics_const::PARTITION_FETCH_ERRORS;

/// Outcome of inspecting one poll cycle's surfaced errors.
#[derive(Debug, Default)]
pub struct Classification {
    /// Whether any retriable condition was seen (already handled inside the
    /// transport; nothing for the loop to do).
    pub retriable_handled: bool,
    /// Errors the loop must treat as fatal.
    pub fatal: Vec<PartitionFetchError>,
}

impl Classification {
    pub fn is_fatal(&self) -> bool {
        !self.fatal.is_empty()
    }
}

/// Split a cycle's surfaced errors into retried-internally and fatal.
///
/// The transport retries transient conditions itself, so anything that
/// reaches this layer flagged non-retriable halts the whole loop: a fatal
/// error on one partition does not imply failure on another, but committing
/// past an unknown gap is worse than stopping.
pub fn classify(errors: Vec<PartitionFetchError>) -> Classification {
    let mut classification = Classification::default();

    for err in errors {
        if err.is_retriable() {
            classification.retriable_handled = true;
            continue;
        }

        match err.partition() {
            Some(partition) => {
                error!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    error = ?err.cause(),
                    "Fatal partition fetch error"
                );
                metrics::counter!(
                    PARTITION_FETCH_ERRORS,
                    "topic" => partition.topic().to_string(),
                    "partition" => partition.partition_number().to_string()
                )
                .increment(1);
            }
            None => {
                error!(error = ?err.cause(), "Fatal fetch error (partition unknown)");
                metrics::counter!(PARTITION_FETCH_ERRORS, "topic" => "unknown").increment(1);
            }
        }

        classification.fatal.push(err);
    }

    classification
}

/// How the rdkafka transport should react to a consumer-stream error.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Transient; retry inside the transport with a short backoff.
    Retriable,
    /// The client is shutting down; surface a clean stop.
    Closed,
    /// Non-retriable; surface to the classifier.
    Fatal,
}

/// Map an rdkafka stream error onto the transport's retry policy.
///
/// Transient consumption and connectivity codes are absorbed by the
/// transport; fatal consumption codes and authentication failures are
/// surfaced, as is anything unrecognized.
pub fn stream_error_kind(error: &KafkaError) -> StreamErrorKind {
    match error {
        // Non-fatal consumption codes (partition EOF, op timeouts, offset
        // resets handled by auto.offset.reset) are all transient.
        KafkaError::MessageConsumption(_) => StreamErrorKind::Retriable,
        KafkaError::MessageConsumptionFatal(_) => StreamErrorKind::Fatal,
        KafkaError::Global(code) => match code {
            RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::BrokerTransportFailure => {
                StreamErrorKind::Retriable
            }
            RDKafkaErrorCode::Authentication => StreamErrorKind::Fatal,
            _ => StreamErrorKind::Retriable,
        },
        KafkaError::Canceled => StreamErrorKind::Closed,
        _ => StreamErrorKind::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::Partition;
    use anyhow::anyhow;

    fn partition_error(topic: &str, partition: i32, retriable: bool) -> PartitionFetchError {
        PartitionFetchError::new(
            Some(Partition::new(topic.to_string(), partition)),
            anyhow!("boom"),
            retriable,
        )
    }

    #[test]
    fn no_errors_is_not_fatal() {
        let classification = classify(vec![]);
        assert!(!classification.is_fatal());
        assert!(!classification.retriable_handled);
    }

    #[test]
    fn retriable_errors_need_no_action() {
        let classification = classify(vec![partition_error("events", 0, true)]);
        assert!(!classification.is_fatal());
        assert!(classification.retriable_handled);
    }

    #[test]
    fn one_surfaced_error_is_fatal_for_the_whole_cycle() {
        let classification = classify(vec![
            partition_error("events", 0, true),
            partition_error("events", 3, false),
        ]);
        assert!(classification.is_fatal());
        assert_eq!(classification.fatal.len(), 1);
        let partition = classification.fatal[0].partition().unwrap();
        assert_eq!(partition.topic(), "events");
        assert_eq!(partition.partition_number(), 3);
    }

    #[test]
    fn partitions_fail_independently() {
        // Two partitions surface errors in the same cycle; both are collected.
        let classification = classify(vec![
            partition_error("events", 0, false),
            partition_error("audit", 2, false),
        ]);
        assert_eq!(classification.fatal.len(), 2);
    }

    #[test]
    fn unattributed_errors_are_still_fatal() {
        let classification = classify(vec![PartitionFetchError::new(
            None,
            anyhow!("stream error"),
            false,
        )]);
        assert!(classification.is_fatal());
        assert!(classification.fatal[0].partition().is_none());
    }

    #[test]
    fn stream_error_kinds() {
        assert_eq!(
            stream_error_kind(&KafkaError::MessageConsumption(
                RDKafkaErrorCode::PartitionEOF
            )),
            StreamErrorKind::Retriable
        );
        assert_eq!(
            stream_error_kind(&KafkaError::Subscription("bad topic".to_string())),
            StreamErrorKind::Fatal
        );
        assert_eq!(
            stream_error_kind(&KafkaError::Global(RDKafkaErrorCode::Authentication)),
            StreamErrorKind::Fatal
        );
        assert_eq!(
            stream_error_kind(&KafkaError::Global(RDKafkaErrorCode::AllBrokersDown)),
            StreamErrorKind::Retriable
        );
        assert_eq!(
            stream_error_kind(&KafkaError::Canceled),
            StreamErrorKind::Closed
        );
    }
}
