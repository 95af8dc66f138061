//! The seam between the fetcher and an account.

use std::future::Future;
use std::pin::Pin;

use quickcal_core::TimeWindow;

use crate::error::ProviderResult;
use crate::raw_event::RawEvent;

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that can list the events of its calendars.
///
/// One source per account. Implementations must be usable from several
/// tasks at once.
pub trait EventSource: Send + Sync {
    /// Name of the account the source reads from.
    fn account_name(&self) -> &str;

    /// Lists raw events of `calendar_id` inside `window`.
    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>>;
}
