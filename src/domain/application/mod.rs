//! Job application tracking.
//!
//! This module provides:
//! - Application records, their skills and interaction history
//! - `ApplicationTracker`, which runs every read and write as a retryable unit of work
//! - Conjunctive filtering and aggregate statistics
//!
//! # Example
//!
//! ```ignore
//! let tracker = ApplicationTracker::new(db);
//!
//! let id = tracker
//!     .add_application(NewApplication::new("J1", "Backend Engineer", "Acme", "linkedin", 0.82))
//!     .await?;
//!
//! tracker
//!     .update_application_status(id, ApplicationStatus::Interviewing, Some("phone screen"))
//!     .await?;
//! ```

mod models;
mod tracker;

pub use models::{
    Application, ApplicationFilter, ApplicationId, ApplicationStats, ApplicationStatus,
    Interaction, NewApplication, NewInteraction, Recommendations, Skill, SkillRequirement,
    SuccessRate,
};
pub use tracker::ApplicationTracker;
