//! Named background jobs with at most one live instance each.
//!
//! A job's lock is `<jobs dir>/<name>.pid`, holding the PID of the process
//! doing the work. The lock counts only while that process is alive; a
//! file left behind by a crashed or finished job is removed the next time
//! anyone looks at it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::error::{RefreshError, RefreshResult, check_key};

/// Outcome of asking for a job to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// A new process was started.
    Spawned(u32),
    /// The job was already running in this process; nothing was started.
    AlreadyRunning(u32),
}

impl JobStatus {
    pub fn pid(&self) -> u32 {
        match self {
            Self::Spawned(pid) | Self::AlreadyRunning(pid) => *pid,
        }
    }

    pub fn is_spawned(&self) -> bool {
        matches!(self, Self::Spawned(_))
    }
}

/// Starts detached jobs and tracks them through PID files.
#[derive(Debug, Clone)]
pub struct JobCoordinator {
    dir: PathBuf,
}

impl JobCoordinator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid_path(&self, name: &str) -> RefreshResult<PathBuf> {
        Ok(self.dir.join(format!("{}.pid", check_key(name)?)))
    }

    /// PID of the live process owning `name`, if any.
    ///
    /// Stale and unreadable lock files are removed.
    pub fn owner(&self, name: &str) -> RefreshResult<Option<u32>> {
        let path = self.pid_path(name)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RefreshError::io(name, e)),
        };

        match parse_pid(&contents) {
            Some(pid) if is_process_running(pid) => Ok(Some(pid)),
            Some(pid) => {
                debug!(job = name, pid, "removing stale job lock");
                remove_lock(&path);
                Ok(None)
            }
            None => {
                warn!(job = name, "removing invalid job lock {}", path.display());
                remove_lock(&path);
                Ok(None)
            }
        }
    }

    pub fn is_running(&self, name: &str) -> RefreshResult<bool> {
        Ok(self.owner(name)?.is_some())
    }

    /// Starts `command` detached unless `name` is already running.
    ///
    /// The child gets null stdio and its own process group, so it outlives
    /// the caller and does not hold the launcher's pipes open.
    pub fn run_in_background(&self, name: &str, mut command: Command) -> RefreshResult<JobStatus> {
        if let Some(pid) = self.owner(name)? {
            debug!(job = name, pid, "job already running");
            return Ok(JobStatus::AlreadyRunning(pid));
        }

        let path = self.pid_path(name)?;
        fs::create_dir_all(&self.dir).map_err(|e| RefreshError::io(name, e))?;

        // Claim the lock with our own PID so concurrent callers see a live
        // owner while the child is being started. The lock appears with its
        // contents in place, so nobody ever reads it empty.
        match self.claim(name, &path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return match fs::read_to_string(&path).ok().as_deref().and_then(parse_pid) {
                    Some(pid) => Ok(JobStatus::AlreadyRunning(pid)),
                    None => Err(RefreshError::io(name, e)),
                };
            }
            Err(e) => return Err(RefreshError::io(name, e)),
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_lock(&path);
                return Err(RefreshError::spawn(name, e));
            }
        };
        let pid = child.id();

        let temp = self.write_temp(name, pid).map_err(|e| RefreshError::io(name, e))?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(RefreshError::io(name, e));
        }

        info!(job = name, pid, "started background job");
        Ok(JobStatus::Spawned(pid))
    }

    /// Creates the lock for `name` holding this process's PID. Fails with
    /// `AlreadyExists` if another caller got there first.
    fn claim(&self, name: &str, path: &Path) -> io::Result<()> {
        let temp = self.write_temp(name, std::process::id())?;
        let linked = fs::hard_link(&temp, path);
        let _ = fs::remove_file(&temp);
        linked
    }

    /// Writes `pid` to a file no other caller uses.
    fn write_temp(&self, name: &str, pid: u32) -> io::Result<PathBuf> {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .dir
            .join(format!(".{}.{}.{}.tmp", name, std::process::id(), seq));
        let mut file = OpenOptions::new().write(true).create_new(true).open(&temp)?;
        write!(file, "{}", pid)?;
        file.sync_all()?;
        Ok(temp)
    }

    /// Drops the lock for `name` if this process owns it.
    ///
    /// Called by a job when it finishes so the next request does not have
    /// to wait for the stale check.
    pub fn release(&self, name: &str) -> RefreshResult<bool> {
        let path = self.pid_path(name)?;
        let owned = fs::read_to_string(&path)
            .ok()
            .as_deref()
            .and_then(parse_pid)
            .is_some_and(|pid| pid == std::process::id());
        if owned {
            remove_lock(&path);
        }
        Ok(owned)
    }
}

fn parse_pid(contents: &str) -> Option<u32> {
    contents.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

fn remove_lock(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove job lock {}: {}", path.display(), e),
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let mut status = 0;
    // An exited child of ours stays a zombie, which kill(0) still reports
    // as alive, until it is reaped here.
    if unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } == pid {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn sleeper(secs: u32) -> Command {
        let mut cmd = Command::new("sleep");
        cmd.arg(secs.to_string());
        cmd
    }

    fn kill(pid: u32) {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }

    fn wait_until_stopped(jobs: &JobCoordinator, name: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while jobs.is_running(name).unwrap() {
            assert!(Instant::now() < deadline, "job {name} did not stop");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn second_request_does_not_spawn() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path().join("jobs"));

        let first = jobs.run_in_background("update-events", sleeper(5)).unwrap();
        assert!(first.is_spawned());
        assert!(jobs.is_running("update-events").unwrap());

        let second = jobs.run_in_background("update-events", sleeper(5)).unwrap();
        assert_eq!(second, JobStatus::AlreadyRunning(first.pid()));
        assert_eq!(jobs.owner("update-events").unwrap(), Some(first.pid()));

        // Different names do not share a lock.
        let other = jobs.run_in_background("update-calendars", sleeper(5)).unwrap();
        assert!(other.is_spawned());
        assert_ne!(other.pid(), first.pid());

        kill(first.pid());
        kill(other.pid());
        wait_until_stopped(&jobs, "update-events");
        wait_until_stopped(&jobs, "update-calendars");
    }

    #[test]
    fn finished_job_allows_a_new_one() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());

        let first = jobs.run_in_background("job", Command::new("true")).unwrap();
        wait_until_stopped(&jobs, "job");
        assert!(!jobs.pid_path("job").unwrap().exists());

        let second = jobs.run_in_background("job", sleeper(5)).unwrap();
        assert!(second.is_spawned());
        assert_ne!(second.pid(), first.pid());
        kill(second.pid());
        wait_until_stopped(&jobs, "job");
    }

    #[test]
    fn stale_lock_is_removed() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());
        let path = jobs.pid_path("job").unwrap();
        fs::write(&path, "999999999").unwrap();

        assert_eq!(jobs.owner("job").unwrap(), None);
        assert!(!path.exists());

        // Owners are checked against the process table, so a lock left by
        // a crashed job never blocks the next one.
        fs::write(&path, "999999999").unwrap();
        let status = jobs.run_in_background("job", Command::new("true")).unwrap();
        assert!(status.is_spawned());
        wait_until_stopped(&jobs, "job");
    }

    #[test]
    fn invalid_lock_is_removed() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());
        let path = jobs.pid_path("job").unwrap();
        fs::write(&path, "not-a-pid").unwrap();

        assert!(!jobs.is_running("job").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn live_foreign_owner_blocks_spawn() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());
        let me = std::process::id();
        fs::write(jobs.pid_path("job").unwrap(), me.to_string()).unwrap();

        let status = jobs.run_in_background("job", sleeper(5)).unwrap();
        assert_eq!(status, JobStatus::AlreadyRunning(me));
    }

    #[test]
    fn release_only_drops_own_lock() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());
        let path = jobs.pid_path("job").unwrap();

        fs::write(&path, "1").unwrap();
        assert!(!jobs.release("job").unwrap());
        assert!(path.exists());

        fs::write(&path, std::process::id().to_string()).unwrap();
        assert!(jobs.release("job").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn spawn_failure_leaves_no_lock() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());
        let err = jobs
            .run_in_background("job", Command::new("/nonexistent/quickcal-binary"))
            .unwrap_err();
        assert!(matches!(err, RefreshError::Spawn { .. }));
        assert!(!jobs.pid_path("job").unwrap().exists());
    }

    #[test]
    fn simultaneous_requests_start_one_job() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path().join("jobs"));
        let barrier = std::sync::Barrier::new(8);

        let statuses: Vec<JobStatus> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        jobs.run_in_background("job", sleeper(5)).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let spawned: Vec<_> = statuses.iter().filter(|s| s.is_spawned()).collect();
        assert_eq!(spawned.len(), 1);
        let pid = spawned[0].pid();
        assert_eq!(jobs.owner("job").unwrap(), Some(pid));

        // Only the lock is left behind, holding the child's PID.
        let names: Vec<_> = fs::read_dir(jobs.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["job.pid"]);

        kill(pid);
        wait_until_stopped(&jobs, "job");
    }

    #[test]
    fn job_names_are_checked() {
        let dir = tempdir().unwrap();
        let jobs = JobCoordinator::new(dir.path());
        assert!(matches!(
            jobs.run_in_background("../x", sleeper(1)),
            Err(RefreshError::InvalidKey(_))
        ));
    }
}
