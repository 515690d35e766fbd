// Infrastructure layer (shared components)
pub mod infrastructure;

// Re-export infrastructure modules at the crate root
pub use infrastructure::config;
pub use infrastructure::database;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Domain layer (business logic)
pub mod domain;

// Application layer
pub mod context;

// Supporting modules
pub mod telemetry;

pub use context::AppContext;
pub use database::{Database, Session};
pub use domain::application::{
    Application, ApplicationFilter, ApplicationId, ApplicationStatus, ApplicationTracker,
    NewApplication,
};
pub use error::{DbError, ErrorKind};
