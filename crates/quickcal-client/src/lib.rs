//! quickcal command-line client
//!
//! Launcher-facing commands answer from the cache and print JSON feedback.
//! Anything that needs the network runs as a detached `quickcal update`
//! job that refreshes the cache for the next invocation.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod feedback;
pub mod secret;

pub use cli::Cli;
pub use context::AppContext;
pub use error::{ClientError, ClientResult};
pub use feedback::{Feedback, Item};
