//! Data models for webhook endpoints, their deployment log, and host metrics.

pub mod deployment;
pub mod system_metric;
pub mod webhook;
