//! Domain layer modules
//!
//! This module contains business domain logic:
//! - `application`: Application records, status progression and statistics
//! - `search`: Job search history

pub mod application;
pub mod search;
