// ==== Poll loop metrics ====
/// Counter for poll cycles started
pub const POLL_CYCLES: &str = "poll_cycles_total";

/// Counter for records fully handled (processed or dead-lettered) by topic
pub const RECORDS_HANDLED: &str = "records_handled_total";

/// Counter for handler failures by topic
pub const RECORD_HANDLER_FAILURES: &str = "record_handler_failures_total";

/// Counter for records routed to the dead-letter sink by topic
pub const RECORDS_DEAD_LETTERED: &str = "records_dead_lettered_total";

// ==== Fetch / transport metrics ====
/// Histogram for records per collected fetch batch
pub const FETCH_BATCH_SIZE: &str = "fetch_batch_size_records";

/// Counter for transient consumer-stream errors retried inside the transport
pub const FETCH_STREAM_RETRIES: &str = "fetch_stream_retries_total";

/// Counter for fatal per-partition fetch errors surfaced to the loop
pub const PARTITION_FETCH_ERRORS: &str = "partition_fetch_errors_total";

// ==== Offset metrics ====
/// Counter for successful offset commits (one per commit call, not per partition)
pub const OFFSET_COMMITS: &str = "offset_commits_total";

/// Counter for failed offset commits
pub const OFFSET_COMMIT_FAILURES: &str = "offset_commit_failures_total";

/// Counter for offset marks refused because they sat at or past the fetched
/// high watermark
pub const OFFSET_MARKS_PAST_WATERMARK: &str = "offset_marks_past_watermark_total";

// ==== Rebalance metrics ====
/// Gauge: 1 while the rebalance gate is held, 0 when released
pub const REBALANCE_GATE_HELD: &str = "rebalance_gate_held";

/// Gauge for partitions currently owned by this consumer
pub const OWNED_PARTITIONS: &str = "owned_partitions";

/// Counter for rebalance callbacks by kind (assign/revoke)
pub const REBALANCE_EVENTS: &str = "rebalance_events_total";

/// Counter for revocations the broker forced through while the gate was held
pub const REBALANCE_WHILE_HELD: &str = "rebalance_while_held_total";
