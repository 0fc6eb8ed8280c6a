/// Sleep/wake state machine and the periodic liveness loop.
///
/// The coordinator is the single source of truth for "should the managed
/// process be running right now". The liveness loop consults that state on a
/// fixed cadence; the power-event pump mutates it and stops/starts the
/// process around system sleep, with an adaptive post-wake delay.
use crate::config::{ResumeConfig, WatchdogConfig};
use crate::eventlog::EventLog;
use crate::process::ProcessControl;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Liveness-loop timing, resolved from config once at startup.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTiming {
    pub check_interval: Duration,
    pub restart_delay: Duration,
    pub shutdown_join_timeout: Duration,
}

impl WatchdogTiming {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            restart_delay: config.restart_delay(),
            shutdown_join_timeout: config.shutdown_join_timeout(),
        }
    }
}

/// Post-wake delay policy.
#[derive(Debug, Clone, Copy)]
pub struct ResumeTiming {
    pub long_sleep_threshold: Duration,
    pub short_delay: Duration,
    pub long_delay: Duration,
}

impl ResumeTiming {
    pub fn from_config(config: &ResumeConfig) -> Self {
        Self {
            long_sleep_threshold: config.long_sleep_threshold(),
            short_delay: config.short_delay(),
            long_delay: config.long_delay(),
        }
    }
}

/// Pick the post-wake grace delay from the measured sleep duration.
///
/// The threshold is inclusive on the long side, and an unknown duration
/// (resume with no recorded suspend) is treated as long: a spurious 30s
/// wait is cheaper than relaunching against a display that isn't back yet.
pub fn classify_resume_delay(elapsed: Option<Duration>, timing: &ResumeTiming) -> Duration {
    match elapsed {
        Some(d) if d < timing.long_sleep_threshold => timing.short_delay,
        _ => timing.long_delay,
    }
}

/// Mutable state shared between the liveness loop and the power-event pump.
/// Created once per run; nothing persists across restarts.
struct WatchdogState {
    /// Whether the liveness loop should keep running.
    monitoring_active: AtomicBool,
    /// True between a suspend notification and the matching resume. While
    /// set, the loop must not attempt restarts.
    is_sleeping: AtomicBool,
    /// Set on suspend, cleared after resume; absent means "duration unknown".
    sleep_started_at: Mutex<Option<Instant>>,
}

impl WatchdogState {
    fn new() -> Self {
        Self {
            monitoring_active: AtomicBool::new(false),
            is_sleeping: AtomicBool::new(false),
            sleep_started_at: Mutex::new(None),
        }
    }

    fn sleep_started_at(&self) -> Option<Instant> {
        match self.sleep_started_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_sleep_started_at(&self, value: Option<Instant>) {
        let mut guard = match self.sleep_started_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value;
    }
}

/// Owns the restart-on-crash policy and the sleep-aware pause/resume policy.
pub struct WatchdogCoordinator<C: ProcessControl + 'static> {
    control: Arc<C>,
    state: Arc<WatchdogState>,
    timing: WatchdogTiming,
    resume: ResumeTiming,
    log: Arc<EventLog>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ProcessControl + 'static> WatchdogCoordinator<C> {
    pub fn new(
        control: Arc<C>,
        timing: WatchdogTiming,
        resume: ResumeTiming,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            control,
            state: Arc::new(WatchdogState::new()),
            timing,
            resume,
            log,
            loop_task: Mutex::new(None),
        }
    }

    /// Whether a suspend notification has been seen without a matching resume.
    #[allow(dead_code)]
    pub fn is_sleeping(&self) -> bool {
        self.state.is_sleeping.load(Ordering::SeqCst)
    }

    /// Whether the liveness loop task is currently alive.
    #[allow(dead_code)]
    pub fn is_monitoring(&self) -> bool {
        let slot = match self.loop_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start the periodic liveness loop. Idempotent: a second call while the
    /// loop task is still alive is a no-op (checked against the task itself,
    /// not just the flag).
    pub fn start_monitoring(&self) {
        let mut slot = match self.loop_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                debug!("liveness loop already running");
                return;
            }
        }

        self.state.monitoring_active.store(true, Ordering::SeqCst);
        info!(
            interval_secs = self.timing.check_interval.as_secs(),
            "starting liveness loop"
        );
        self.log.record("liveness loop started");

        let handle = tokio::spawn(liveness_loop(
            Arc::clone(&self.control),
            Arc::clone(&self.state),
            Arc::clone(&self.log),
            self.timing,
        ));
        *slot = Some(handle);
    }

    /// Stop the liveness loop and wait (bounded) for the task to exit. The
    /// loop polls the flag once per interval, so shutdown latency is bounded
    /// by the interval length.
    pub async fn stop_monitoring(&self) {
        self.state.monitoring_active.store(false, Ordering::SeqCst);

        let handle = {
            let mut slot = match self.loop_task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };

        let joined = match handle {
            Some(handle) => tokio::time::timeout(self.timing.shutdown_join_timeout, handle)
                .await
                .is_ok(),
            None => true,
        };
        if joined {
            self.log.record("liveness loop stopped");
        } else {
            // The task exits on its own at the next flag poll
            debug!("liveness loop still mid-interval at shutdown, detaching");
            self.log
                .record("liveness loop shutdown requested, task still mid-interval");
        }
    }

    /// Suspend notification: gate the loop, then stop the managed process
    /// immediately rather than waiting for the next tick.
    pub async fn on_suspend(&self) {
        self.state.set_sleep_started_at(Some(Instant::now()));
        self.state.is_sleeping.store(true, Ordering::SeqCst);

        info!("system suspending, stopping managed process");
        self.log.record("system suspending, stopping managed process");
        println!("system going to sleep, stopping managed process");

        let control = Arc::clone(&self.control);
        if let Err(e) = tokio::task::spawn_blocking(move || control.stop()).await {
            error!(error = %e, "stop task panicked");
        }
        self.log.record("managed process stopped for sleep");
    }

    /// Resume notification: hold the gate closed for a sleep-duration-scaled
    /// grace period, then clear it. The handler never calls `start` itself;
    /// the loop's next tick performs the restart, so a concurrently firing
    /// tick cannot race us into a duplicate launch.
    pub async fn on_resume(&self) {
        let elapsed = self.state.sleep_started_at().map(|t| t.elapsed());
        let delay = classify_resume_delay(elapsed, &self.resume);

        match elapsed {
            Some(d) => {
                info!(
                    slept_secs = d.as_secs(),
                    delay_secs = delay.as_secs(),
                    "system resumed"
                );
                self.log.record(&format!(
                    "system resumed after {}s sleep, waiting {}s before restart",
                    d.as_secs(),
                    delay.as_secs()
                ));
                println!(
                    "system woke after {}s, waiting {}s before restart",
                    d.as_secs(),
                    delay.as_secs()
                );
            }
            None => {
                warn!(
                    delay_secs = delay.as_secs(),
                    "system resumed with no recorded suspend, assuming long sleep"
                );
                self.log.record(&format!(
                    "system resumed, sleep duration unknown, waiting {}s before restart",
                    delay.as_secs()
                ));
                println!(
                    "system woke (duration unknown), waiting {}s before restart",
                    delay.as_secs()
                );
            }
        }

        tokio::time::sleep(delay).await;

        self.state.set_sleep_started_at(None);
        self.state.is_sleeping.store(false, Ordering::SeqCst);
        self.log.record("wake grace period over, monitoring resumed");
    }
}

/// The periodic liveness loop. Skips the whole tick while the system is
/// asleep; otherwise restarts the managed process (after a short delay, to
/// avoid racing an instance that is mid-restart on its own) whenever it is
/// found not running. Tick failures are logged and never end the loop.
async fn liveness_loop<C: ProcessControl + 'static>(
    control: Arc<C>,
    state: Arc<WatchdogState>,
    log: Arc<EventLog>,
    timing: WatchdogTiming,
) {
    while state.monitoring_active.load(Ordering::SeqCst) {
        if state.is_sleeping.load(Ordering::SeqCst) {
            // System asleep: leave the managed process alone this tick
        } else if !control.is_running() {
            warn!("managed process not running, restarting");
            log.record("managed process not running, restarting");
            println!("managed process is down, restarting...");

            tokio::time::sleep(timing.restart_delay).await;

            // Suspend may have landed during the delay
            if state.is_sleeping.load(Ordering::SeqCst) {
                debug!("suspend arrived during restart delay, skipping launch");
            } else {
                match control.start() {
                    Ok(()) => {
                        log.record("managed process started");
                        println!("managed process started");
                    }
                    Err(e) => {
                        error!(error = %e, "restart attempt failed");
                        log.record(&format!("restart attempt failed: {e}"));
                    }
                }
            }
        }

        tokio::time::sleep(timing.check_interval).await;
    }
    debug!("liveness loop exiting");
}
