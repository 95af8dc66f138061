//! Refresh coordination for quickcal.
//!
//! Every front-end call reads from [`CacheStore`] immediately. When the
//! value is stale, [`RefreshOrchestrator`] asks [`JobCoordinator`] to run
//! the matching refresh job in a detached process, at most one per job
//! name across all processes on the machine.

pub mod active;
pub mod cache;
pub mod error;
pub mod jobs;
pub mod orchestrator;

pub use active::{ACTIVE_KEY, ActiveCalendars};
pub use cache::CacheStore;
pub use error::{RefreshError, RefreshResult};
pub use jobs::{JobCoordinator, JobStatus};
pub use orchestrator::{RefreshOrchestrator, Refreshed};
