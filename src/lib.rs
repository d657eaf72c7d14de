pub mod alert_sink;
pub mod budget_ledger;
pub mod chunking;
pub mod config;
pub mod cost;
pub mod db;
pub mod dlq;
pub mod error;
pub mod http_client;
pub mod metadata_store;
pub mod models;
pub mod observability;
pub mod providers;
pub mod retrieval;
pub mod scheduler;
pub mod telemetry;
pub mod workers;
