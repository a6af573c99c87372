pub mod checkpoint;
pub mod config;
pub mod error_sink;
pub mod events;
pub mod poller;
pub mod query;
pub mod reconcile;
pub mod registration;
pub mod registry;
pub mod repository;
pub mod rpc;
pub mod scheduler;
pub mod source;
