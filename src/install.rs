/// One-shot installer/uninstaller, the setup collaborator around the core.
///
/// `install` copies the binary into the data directory and registers an XDG
/// autostart entry so the watchdog runs at login; `uninstall` removes the
/// registration and terminates any running instance. Neither touches the
/// coordinator: they only place/remove the executable and signal processes.
use crate::data_dir::DataDir;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{info, warn};

const AUTOSTART_ENTRY: &str = "wallkeeper.desktop";

/// Errors from the install/uninstall flows.
#[derive(Debug)]
pub enum InstallError {
    /// No XDG config directory to register the autostart entry under.
    NoConfigDir,
    /// Could not determine the path of the running binary.
    CurrentExe { source: std::io::Error },
    /// A filesystem step failed.
    Io {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for InstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallError::NoConfigDir => {
                write!(f, "no user config directory found for the autostart entry")
            }
            InstallError::CurrentExe { source } => {
                write!(f, "failed to locate the running binary: {}", source)
            }
            InstallError::Io { what, path, source } => {
                write!(f, "failed to {} {}: {}", what, path.display(), source)
            }
        }
    }
}

impl std::error::Error for InstallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstallError::NoConfigDir => None,
            InstallError::CurrentExe { source } => Some(source),
            InstallError::Io { source, .. } => Some(source),
        }
    }
}

fn autostart_dir() -> Result<PathBuf, InstallError> {
    dirs::config_dir()
        .map(|d| d.join("autostart"))
        .ok_or(InstallError::NoConfigDir)
}

/// The desktop entry registered under `~/.config/autostart/`.
fn desktop_entry(exec: &Path) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=Wallkeeper\n\
         Comment=Keeps the wallpaper engine running\n\
         Exec={}\n\
         X-GNOME-Autostart-enabled=true\n",
        exec.display()
    )
}

/// Copy the binary into the data directory and write the autostart entry.
/// Split from [`run_install`] so tests can point it at temp directories.
pub fn install_at(
    data_dir: &DataDir,
    autostart: &Path,
    source_exe: &Path,
    start_now: bool,
) -> Result<(), InstallError> {
    data_dir.init().map_err(|e| InstallError::Io {
        what: "create data directory",
        path: data_dir.root().to_path_buf(),
        source: e,
    })?;

    let installed = data_dir.installed_binary();
    if source_exe != installed {
        std::fs::copy(source_exe, &installed).map_err(|e| InstallError::Io {
            what: "copy binary to",
            path: installed.clone(),
            source: e,
        })?;
    }
    println!("installed binary to {}", installed.display());

    std::fs::create_dir_all(autostart).map_err(|e| InstallError::Io {
        what: "create autostart directory",
        path: autostart.to_path_buf(),
        source: e,
    })?;
    let entry_path = autostart.join(AUTOSTART_ENTRY);
    std::fs::write(&entry_path, desktop_entry(&installed)).map_err(|e| InstallError::Io {
        what: "write autostart entry",
        path: entry_path.clone(),
        source: e,
    })?;
    println!("registered autostart entry {}", entry_path.display());
    println!("wallkeeper will start automatically at login");

    if start_now {
        match std::process::Command::new(&installed).spawn() {
            Ok(child) => println!("watchdog started (pid {})", child.id()),
            Err(e) => warn!(error = %e, "could not start the installed watchdog"),
        }
    }

    Ok(())
}

/// Install the currently running binary and register it to start at login.
pub fn run_install(data_dir: &DataDir, start_now: bool) -> Result<(), InstallError> {
    let source = std::env::current_exe().map_err(|e| InstallError::CurrentExe { source: e })?;
    install_at(data_dir, &autostart_dir()?, &source, start_now)
}

/// Remove the autostart entry. Missing entry is not an error.
pub fn uninstall_at(data_dir: &DataDir, autostart: &Path) -> Result<(), InstallError> {
    let entry_path = autostart.join(AUTOSTART_ENTRY);
    match std::fs::remove_file(&entry_path) {
        Ok(()) => println!("removed autostart entry {}", entry_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("autostart entry not present, nothing to remove");
        }
        Err(e) => {
            return Err(InstallError::Io {
                what: "remove autostart entry",
                path: entry_path,
                source: e,
            })
        }
    }

    let installed = data_dir.installed_binary();
    match std::fs::remove_file(&installed) {
        Ok(()) => println!("removed installed binary {}", installed.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %installed.display(), error = %e, "could not remove binary"),
    }

    Ok(())
}

/// Terminate every running wallkeeper instance except our own process.
fn terminate_running_instances(installed: &Path) {
    let mut system = System::new();
    system.refresh_processes();
    let own_pid = std::process::id();

    for (pid, proc_) in system.processes() {
        if pid.as_u32() == own_pid {
            continue;
        }
        let matches = proc_.exe().is_some_and(|exe| exe == installed)
            || proc_.name().eq_ignore_ascii_case("wallkeeper");
        if !matches {
            continue;
        }
        match signal::kill(NixPid::from_raw(pid.as_u32() as i32), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid = pid.as_u32(), "terminated running watchdog");
                println!("stopped running watchdog (pid {})", pid.as_u32());
            }
            Err(Errno::ESRCH) | Err(Errno::EPERM) => {}
            Err(e) => warn!(pid = pid.as_u32(), error = %e, "failed to terminate watchdog"),
        }
    }
}

/// Unregister from login autostart and stop any running instance. Leaves the
/// data directory (and its log) in place for the user to inspect or delete.
pub fn run_uninstall(data_dir: &DataDir) -> Result<(), InstallError> {
    uninstall_at(data_dir, &autostart_dir()?)?;
    terminate_running_instances(&data_dir.installed_binary());
    println!(
        "uninstalled; you can delete {} to remove logs",
        data_dir.root().display()
    );
    Ok(())
}
