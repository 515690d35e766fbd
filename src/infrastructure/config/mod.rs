mod settings;

pub use settings::{DatabaseConfig, LoggingConfig, MonitorConfig, RetryConfig, Settings};
