//! The user's selection of calendars to show.

use std::collections::BTreeSet;

use tracing::debug;

use crate::cache::CacheStore;
use crate::error::RefreshResult;

/// Cache key of the active calendar set.
pub const ACTIVE_KEY: &str = "active.json";

/// Calendar IDs the user has switched on, persisted as a JSON list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveCalendars {
    ids: BTreeSet<String>,
}

impl ActiveCalendars {
    /// Loads the set; a missing file is an empty set.
    pub fn load(cache: &CacheStore) -> RefreshResult<Self> {
        let ids: Vec<String> = cache.load_json(ACTIVE_KEY)?.unwrap_or_default();
        Ok(Self {
            ids: ids.into_iter().collect(),
        })
    }

    pub fn save(&self, cache: &CacheStore) -> RefreshResult<()> {
        let ids: Vec<&String> = self.ids.iter().collect();
        cache.store_json(ACTIVE_KEY, &ids)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    /// Flips `id` in or out of the set. Returns whether it is now active.
    pub fn toggle(&mut self, id: &str) -> bool {
        let active = if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        };
        debug!(calendar = id, active, "toggled calendar");
        active
    }
}

impl FromIterator<String> for ActiveCalendars {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
