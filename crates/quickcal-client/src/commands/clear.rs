//! Cache reset.

use tracing::info;

use crate::context::{AppContext, CALENDARS_KEY};
use crate::error::ClientResult;

/// Removes the cached calendar list and all cached events. Returns the
/// number of files removed.
///
/// Accounts and the active set are kept, so the next lookup simply
/// fetches everything again.
pub fn clear(ctx: &AppContext) -> ClientResult<usize> {
    let mut removed = ctx.cache().remove_matching("events-", ".json")?.len();
    if ctx.cache().remove(CALENDARS_KEY)? {
        removed += 1;
    }
    info!("removed {} cache file(s)", removed);
    Ok(removed)
}
