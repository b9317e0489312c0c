pub mod batch;
pub mod classifier;
pub mod committer;
pub mod consumer;
pub mod context;
pub mod offset_tracker;
pub mod poller;
pub mod rebalance;
pub mod transport;
pub mod types;
