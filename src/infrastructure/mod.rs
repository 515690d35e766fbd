//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: Database error taxonomy and application errors
//! - `metrics`: Prometheus metrics helpers
//! - `database`: Connection pool, scoped sessions, retries and health checks

pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
