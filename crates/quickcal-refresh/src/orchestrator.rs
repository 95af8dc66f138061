//! Serve-stale reads with background revalidation.
//!
//! [`RefreshOrchestrator::get_or_refresh`] is called on every keystroke. It
//! returns whatever the cache holds right now and, if that value is too old
//! or missing, asks the [`JobCoordinator`] to start the refresh job. It
//! never waits for the job; callers poll again while
//! [`Refreshed::still_refreshing`] is set.

use std::process::Command;

use chrono::Duration;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::error::RefreshError;
use crate::jobs::{JobCoordinator, JobStatus};

/// Result of a serve-stale read.
#[derive(Debug)]
pub struct Refreshed<T> {
    /// Cached value, fresh or not. `None` on first run.
    pub value: Option<T>,
    /// A refresh job is running; poll again shortly.
    pub still_refreshing: bool,
    /// What the coordinator did, when a refresh was requested.
    pub job: Option<JobStatus>,
    /// First problem met while reading or starting the job.
    pub error: Option<RefreshError>,
}

impl<T> Refreshed<T> {
    fn empty() -> Self {
        Self {
            value: None,
            still_refreshing: false,
            job: None,
            error: None,
        }
    }

    fn note(&mut self, err: RefreshError) {
        warn!("{}", err);
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Ties the cache to the job coordinator.
#[derive(Debug, Clone)]
pub struct RefreshOrchestrator {
    cache: CacheStore,
    jobs: JobCoordinator,
}

impl RefreshOrchestrator {
    pub fn new(cache: CacheStore, jobs: JobCoordinator) -> Self {
        Self { cache, jobs }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    /// Returns the cached value of `key` and starts `job_name` if the value
    /// is older than `max_age`.
    ///
    /// A value that fails to decode is treated as missing, which also forces
    /// a refresh. Errors end up in [`Refreshed::error`]; this call itself
    /// never fails.
    pub fn get_or_refresh<T: DeserializeOwned>(
        &self,
        key: &str,
        max_age: Duration,
        job_name: &str,
        command: Command,
    ) -> Refreshed<T> {
        let mut result = Refreshed::empty();

        let mut usable = false;
        match self.cache.load_json::<T>(key) {
            Ok(Some(value)) => {
                result.value = Some(value);
                usable = true;
            }
            Ok(None) => debug!(key, "nothing cached"),
            Err(err) => result.note(err),
        }

        if usable && !self.cache.expired(key, max_age) {
            match self.jobs.is_running(job_name) {
                Ok(running) => result.still_refreshing = running,
                Err(err) => result.note(err),
            }
            return result;
        }

        match self.jobs.run_in_background(job_name, command) {
            Ok(status) => {
                debug!(key, job = job_name, ?status, "refresh requested");
                result.job = Some(status);
                result.still_refreshing = true;
            }
            Err(err) => result.note(err),
        }
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use chrono::{TimeZone, Utc};
    use quickcal_core::{Clock, FixedClock};
    use tempfile::tempdir;

    use crate::cache::set_stored_at;

    const KEY: &str = "events-2024-06-01";
    const JOB: &str = "update-events";

    fn sleeper() -> Command {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        cmd
    }

    fn stop(jobs: &JobCoordinator, pid: u32) {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while jobs.is_running(JOB).unwrap() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }

    fn orchestrator(root: &std::path::Path) -> (RefreshOrchestrator, Arc<FixedClock>) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let cache = CacheStore::with_clock(root.join("cache"), clock.clone());
        let jobs = JobCoordinator::new(root.join("jobs"));
        (RefreshOrchestrator::new(cache, jobs), clock)
    }

    #[test]
    fn empty_cache_starts_exactly_one_job() {
        let dir = tempdir().unwrap();
        let (orch, _) = orchestrator(dir.path());

        let first: Refreshed<Vec<String>> =
            orch.get_or_refresh(KEY, Duration::minutes(5), JOB, sleeper());
        assert!(first.value.is_none());
        assert!(first.still_refreshing);
        assert!(first.error.is_none());
        let Some(JobStatus::Spawned(pid)) = first.job else {
            panic!("expected a spawned job, got {:?}", first.job);
        };
        assert_eq!(orch.jobs().owner(JOB).unwrap(), Some(pid));

        let second: Refreshed<Vec<String>> =
            orch.get_or_refresh(KEY, Duration::minutes(5), JOB, sleeper());
        assert!(second.value.is_none());
        assert!(second.still_refreshing);
        assert_eq!(second.job, Some(JobStatus::AlreadyRunning(pid)));

        stop(orch.jobs(), pid);
    }

    #[test]
    fn fresh_value_is_served_without_a_job() {
        let dir = tempdir().unwrap();
        let (orch, _) = orchestrator(dir.path());
        orch.cache().store_json(KEY, &vec!["standup"]).unwrap();

        let got: Refreshed<Vec<String>> =
            orch.get_or_refresh(KEY, Duration::minutes(5), JOB, sleeper());
        assert_eq!(got.value.unwrap(), vec!["standup"]);
        assert!(!got.still_refreshing);
        assert!(got.job.is_none());
        assert!(!orch.jobs().pid_path(JOB).unwrap().exists());
    }

    #[test]
    fn stale_value_is_served_while_refreshing() {
        let dir = tempdir().unwrap();
        let (orch, clock) = orchestrator(dir.path());
        orch.cache().store_json(KEY, &vec!["standup"]).unwrap();
        set_stored_at(&orch.cache().path(KEY).unwrap(), clock.now()).unwrap();
        clock.advance(Duration::minutes(10));

        let got: Refreshed<Vec<String>> =
            orch.get_or_refresh(KEY, Duration::minutes(5), JOB, sleeper());
        assert_eq!(got.value.as_deref(), Some(&["standup".to_string()][..]));
        assert!(got.still_refreshing);
        let pid = got.job.unwrap().pid();
        stop(orch.jobs(), pid);
    }

    #[test]
    fn corrupt_value_forces_refresh() {
        let dir = tempdir().unwrap();
        let (orch, _) = orchestrator(dir.path());
        orch.cache().store(KEY, b"{not json").unwrap();

        let got: Refreshed<Vec<String>> =
            orch.get_or_refresh(KEY, Duration::minutes(5), JOB, sleeper());
        assert!(got.value.is_none());
        assert!(matches!(got.error, Some(RefreshError::Json { .. })));
        assert!(got.still_refreshing);
        let pid = got.job.unwrap().pid();
        stop(orch.jobs(), pid);
    }

    #[test]
    fn spawn_failure_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let (orch, _) = orchestrator(dir.path());
        let got: Refreshed<Vec<String>> = orch.get_or_refresh(
            KEY,
            Duration::minutes(5),
            JOB,
            Command::new("/nonexistent/quickcal-binary"),
        );
        assert!(got.value.is_none());
        assert!(!got.still_refreshing);
        assert!(matches!(got.error, Some(RefreshError::Spawn { .. })));
    }
}
