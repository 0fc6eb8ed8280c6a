/// Managed-process control: resolve the target executable, then launch,
/// terminate, and query it against the live process table.
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Identity of the target application: the executable path resolved once at
/// startup, plus the lowercase name key used to match process-table entries.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    path: PathBuf,
    name_key: String,
}

impl ManagedProcess {
    pub fn new(path: PathBuf, name_override: Option<&str>) -> Self {
        let name_key = name_override
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default()
            .to_lowercase();
        Self { path, name_key }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn name_key(&self) -> &str {
        &self.name_key
    }
}

/// Raised when no candidate path exists on disk. Unrecoverable at startup:
/// there is nothing to watch.
#[derive(Debug)]
pub struct ResolveError {
    pub candidates: Vec<PathBuf>,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "managed executable not found; paths checked:")?;
        for path in &self.candidates {
            writeln!(f, "  {}", path.display())?;
        }
        write!(f, "install the application or set app.candidate_paths")
    }
}

impl std::error::Error for ResolveError {}

/// Scan the priority-ordered candidate list and take the first path that
/// exists on disk.
pub fn resolve(
    candidates: &[PathBuf],
    name_override: Option<&str>,
) -> Result<ManagedProcess, ResolveError> {
    for path in candidates {
        if path.exists() {
            info!(path = %path.display(), "resolved managed executable");
            return Ok(ManagedProcess::new(path.clone(), name_override));
        }
    }
    Err(ResolveError {
        candidates: candidates.to_vec(),
    })
}

/// Failed launch attempt. Surfaced to the caller for logging; never fatal.
#[derive(Debug)]
pub struct StartError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to launch {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Seam between the coordinator and the OS process table, so the state
/// machine can be driven by a recording fake in tests.
pub trait ProcessControl: Send + Sync {
    /// Whether any live process matches the managed name key. Never fails;
    /// entries that cannot be inspected simply don't count.
    fn is_running(&self) -> bool;
    /// Launch the executable detached, if and only if it is not already
    /// running. Must be called from within a tokio runtime.
    fn start(&self) -> Result<(), StartError>;
    /// Terminate every matching process with a bounded wait per process.
    /// Already-gone, access-denied, and timeout are all success.
    fn stop(&self);
}

/// The kernel reports process names from the `comm` field, which clips the
/// executable name to 15 bytes. A full name key longer than that can never
/// appear in the table, so matching has to compare against the clipped key.
const COMM_MAX: usize = 15;

fn name_matches(table_name: &str, key: &str) -> bool {
    let name = table_name.to_lowercase();
    if name.contains(key) {
        return true;
    }
    if key.len() > COMM_MAX {
        let mut end = COMM_MAX;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        return name.contains(&key[..end]);
    }
    false
}

/// Production [`ProcessControl`] backed by the OS process table.
pub struct ProcessController {
    target: ManagedProcess,
    system: Mutex<System>,
    stop_timeout: Duration,
}

impl ProcessController {
    pub fn new(target: ManagedProcess, stop_timeout: Duration) -> Self {
        Self {
            target,
            system: Mutex::new(System::new()),
            stop_timeout,
        }
    }

    /// Whether a table entry is an instance of the managed application:
    /// either its executable is the resolved path, or its (possibly
    /// comm-clipped) name matches the name key case-insensitively.
    fn matches_target(&self, proc_: &sysinfo::Process) -> bool {
        if proc_.exe().is_some_and(|exe| exe == self.target.path()) {
            return true;
        }
        name_matches(proc_.name(), &self.target.name_key)
    }

    /// PIDs of live processes matching the managed application. Zombies are
    /// excluded: a defunct entry keeps its name but is not a running
    /// instance.
    fn matching_pids(&self) -> Vec<Pid> {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes();
        system
            .processes()
            .iter()
            .filter(|(_, proc_)| {
                proc_.status() != ProcessStatus::Zombie && self.matches_target(proc_)
            })
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn pid_alive(&self, pid: Pid) -> bool {
        self.matching_pids().contains(&pid)
    }
}

impl ProcessControl for ProcessController {
    fn is_running(&self) -> bool {
        !self.matching_pids().is_empty()
    }

    fn start(&self) -> Result<(), StartError> {
        if self.is_running() {
            debug!(name = %self.target.name_key, "already running, not launching");
            return Ok(());
        }

        let mut child = Command::new(&self.target.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0) // Own process group: our shutdown never takes it down
            .spawn()
            .map_err(|e| StartError {
                path: self.target.path.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or(0);
        info!(pid, path = %self.target.path.display(), "launched managed process");

        // Reap on exit so a crashed instance doesn't linger as a zombie and
        // fool the liveness check.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(())
    }

    fn stop(&self) {
        let pids = self.matching_pids();
        if pids.is_empty() {
            debug!(name = %self.target.name_key, "nothing to stop");
            return;
        }

        for &pid in &pids {
            match signal::kill(NixPid::from_raw(pid.as_u32() as i32), Signal::SIGTERM) {
                Ok(()) => info!(pid = pid.as_u32(), "sent SIGTERM to managed process"),
                // Gone between scan and signal, or not ours to touch
                Err(Errno::ESRCH) | Err(Errno::EPERM) => {}
                Err(e) => warn!(pid = pid.as_u32(), error = %e, "failed to signal process"),
            }
        }

        for &pid in &pids {
            let deadline = Instant::now() + self.stop_timeout;
            while self.pid_alive(pid) {
                if Instant::now() >= deadline {
                    warn!(
                        pid = pid.as_u32(),
                        timeout_secs = self.stop_timeout.as_secs(),
                        "process did not exit within timeout, giving up"
                    );
                    break;
                }
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_key_derived_from_path() {
        let proc_ = ManagedProcess::new(PathBuf::from("/opt/app/Wallpaper64.exe"), None);
        assert_eq!(proc_.name_key(), "wallpaper64.exe");
    }

    #[test]
    fn test_name_key_override_wins() {
        let proc_ = ManagedProcess::new(PathBuf::from("/opt/app/launcher"), Some("Wallpaper32"));
        assert_eq!(proc_.name_key(), "wallpaper32");
    }

    #[test]
    fn test_resolve_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("b-engine");
        let third = dir.path().join("c-engine");
        std::fs::write(&second, "").unwrap();
        std::fs::write(&third, "").unwrap();

        let candidates = vec![dir.path().join("a-engine"), second.clone(), third];
        let resolved = resolve(&candidates, None).unwrap();
        assert_eq!(resolved.path(), second);
        assert_eq!(resolved.name_key(), "b-engine");
    }

    #[test]
    fn test_resolve_nothing_found_lists_candidates() {
        let candidates = vec![
            PathBuf::from("/nonexistent/one"),
            PathBuf::from("/nonexistent/two"),
        ];
        let err = resolve(&candidates, None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("managed executable not found"));
        assert!(message.contains("/nonexistent/one"));
        assert!(message.contains("/nonexistent/two"));
    }

    #[test]
    fn test_name_match_exact_and_substring() {
        assert!(name_matches("wallpaper32.exe", "wallpaper32.exe"));
        assert!(name_matches("Wallpaper64.exe", "wallpaper64.exe"));
        assert!(!name_matches("bash", "wallpaper32.exe"));
    }

    #[test]
    fn test_name_match_survives_comm_clipping() {
        // The kernel reports at most 15 bytes of the name
        assert!(name_matches("linux-wallpaper", "linux-wallpaperengine"));
        assert!(!name_matches("linux-kbd-util", "linux-wallpaperengine"));
    }

    #[tokio::test]
    async fn test_is_running_and_stop_see_long_named_process() {
        // A name longer than the kernel's 15-byte comm field: the table
        // entry shows up clipped and only the exe/clipped-key match finds it
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("wallkeeper-fixture-long-name");
        std::fs::copy("/bin/sleep", &exe).unwrap();

        let target = ManagedProcess::new(exe.clone(), None);
        let controller = ProcessController::new(target, Duration::from_secs(2));
        assert!(!controller.is_running());

        let mut child = std::process::Command::new(&exe).arg("30").spawn().unwrap();
        assert!(controller.is_running());

        controller.stop();
        assert!(!controller.is_running());
        let _ = child.wait();
    }

    fn controller_for(name: &str) -> ProcessController {
        let target = ManagedProcess::new(PathBuf::from(format!("/nonexistent/{name}")), None);
        ProcessController::new(target, Duration::from_millis(100))
    }

    #[test]
    fn test_is_running_false_for_unlikely_name() {
        let controller = controller_for("wallkeeper-test-no-such-process-a8f2");
        assert!(!controller.is_running());
    }

    #[test]
    fn test_stop_with_no_matches_is_a_noop() {
        let controller = controller_for("wallkeeper-test-no-such-process-a8f2");
        // Must return without error or delay
        let started = Instant::now();
        controller.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_start_spawn_failure_is_surfaced() {
        let controller = controller_for("wallkeeper-test-no-such-process-a8f2");
        let err = controller.start().unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[tokio::test]
    async fn test_start_not_executable_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-executable");
        std::fs::write(&path, "plain data").unwrap();

        let target = ManagedProcess::new(path, None);
        let controller = ProcessController::new(target, Duration::from_millis(100));
        assert!(controller.start().is_err());
    }
}
