pub mod benchmarks;
pub mod cache;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod outputs;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod template;
pub mod worker;
