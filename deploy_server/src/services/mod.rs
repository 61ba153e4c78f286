//! Deployment and monitoring services.

pub mod classifier;
pub mod deploy_runner;
pub mod dispatcher;
#[cfg(test)]
pub mod memory;
pub mod metrics_store;
pub mod monitor;
pub mod sampler;
pub mod scheduler;
pub mod signature;
pub mod webhook_service;
pub mod webhook_store;
