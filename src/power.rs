/// System power-event delivery.
///
/// The coordinator only understands two notifications, suspend and resume.
/// The production binding maps them to SIGUSR1/SIGUSR2, which a systemd
/// `system-sleep` hook (or any other sleep integration) sends to the daemon:
///
/// ```sh
/// #!/bin/sh
/// # /usr/lib/systemd/system-sleep/wallkeeper
/// case "$1" in
///   pre)  pkill -USR1 -x wallkeeper ;;
///   post) pkill -USR2 -x wallkeeper ;;
/// esac
/// ```
///
/// Events are forwarded through a channel and consumed by a single pump
/// loop, so at most one handler call is in flight per event kind.
use crate::coordinator::WatchdogCoordinator;
use crate::process::ProcessControl;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Resume,
}

/// Failed to install the signal handlers. Fatal: without sleep/wake
/// awareness the watchdog would relaunch into half-initialized sessions.
#[derive(Debug)]
pub struct SubscribeError {
    pub source: std::io::Error,
}

impl std::fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to install power event handlers: {}", self.source)
    }
}

impl std::error::Error for SubscribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Subscribe to suspend/resume notifications. Spawns a forwarding task that
/// lives until the receiver is dropped.
pub fn subscribe() -> Result<mpsc::Receiver<PowerEvent>, SubscribeError> {
    let mut suspend =
        signal(SignalKind::user_defined1()).map_err(|e| SubscribeError { source: e })?;
    let mut resume =
        signal(SignalKind::user_defined2()).map_err(|e| SubscribeError { source: e })?;

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(_) = suspend.recv() => PowerEvent::Suspend,
                Some(_) = resume.recv() => PowerEvent::Resume,
                else => break,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("power event forwarder exiting");
    });

    Ok(rx)
}

/// Consume power events until the source closes. This is the program's
/// natural idle state; it blocks between events.
pub async fn run_pump<C: ProcessControl + 'static>(
    coordinator: &WatchdogCoordinator<C>,
    mut events: mpsc::Receiver<PowerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PowerEvent::Suspend => coordinator.on_suspend().await,
            PowerEvent::Resume => coordinator.on_resume().await,
        }
    }
    debug!("power event source closed");
}
