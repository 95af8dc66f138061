//! Google accounts, authentication and concurrent event fetching.
//!
//! - [`google`] - OAuth handshake, token storage and the Calendar REST client
//! - [`ConcurrentFetcher`] - fans out one task per calendar and merges results
//! - [`EventSource`] - what the fetcher needs from an account
//! - [`ProviderError`] - error types for provider operations
//!
//! ```text
//!  Authenticator ──► AccountSession ──► EventSource
//!       │                  │                 │
//!   TokenStore       CalendarClient   ConcurrentFetcher ──► Vec<Event>
//! ```

pub mod error;
pub mod fetcher;
pub mod google;
pub mod raw_event;
pub mod source;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use fetcher::ConcurrentFetcher;
pub use raw_event::{RawEvent, RawEventTime};
pub use source::{BoxFuture, EventSource};
