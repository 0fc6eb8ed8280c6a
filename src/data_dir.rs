use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Manages the wallkeeper data directory layout.
///
/// All runtime artifacts live under a single directory (default
/// `~/.local/share/wallkeeper`): the event log, the singleton lock, and the
/// installed copy of the binary.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the append-only event log.
    pub fn event_log(&self) -> PathBuf {
        self.root.join("wallkeeper.log")
    }

    /// Path to the singleton lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Where `install` places the watchdog binary.
    pub fn installed_binary(&self) -> PathBuf {
        self.root.join("wallkeeper")
    }

    /// Create the directory tree if missing.
    pub fn init(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

/// Held for the lifetime of the run; two watchdogs fighting over one process
/// would stop/start it out from under each other.
pub struct SingletonLock {
    _file: File,
}

/// Failed to take the singleton lock.
#[derive(Debug)]
pub enum LockError {
    /// Another wallkeeper instance holds the lock.
    AlreadyRunning { path: PathBuf },
    /// Could not create or open the lock file.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::AlreadyRunning { path } => {
                write!(
                    f,
                    "another wallkeeper instance is already running (lock held on {})",
                    path.display()
                )
            }
            LockError::Io { path, source } => {
                write!(f, "failed to open lock file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::AlreadyRunning { .. } => None,
            LockError::Io { source, .. } => Some(source),
        }
    }
}

impl SingletonLock {
    /// Take an exclusive advisory lock on the given path. Non-blocking:
    /// a held lock is an immediate startup failure, not a wait.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        let file = File::create(path).map_err(|e| LockError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        file.try_lock_exclusive()
            .map_err(|_| LockError::AlreadyRunning {
                path: path.to_path_buf(),
            })?;
        Ok(Self { _file: file })
    }
}
