//! Duty-cycle orchestration
//!
//! One call to [`CycleOrchestrator::run_cycle`] is one wake period:
//!
//! ```text
//! Booting -> LinkUp -> SessionUp -> CommandWindow -> Suspending
//! ```
//!
//! Every failure short-cuts to `Suspending` with the default interval.
//! The only exits are a suspension or a restart; nothing waits forever
//! except the link bring-up when no link limit is configured.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use aiot_core::{AiotError, AiotResult, NodeConfig, NodeIdentity, TopicSet, WakeReason};
use aiot_transport::{
    ConnectivityManager, LinkDriver, LinkOutcome, SessionManager, SessionOutcome,
    SessionTransport,
};
use aiot_wire::{sanitize_key, sanitize_value, KvPayload, NodeState};

use crate::{
    Board, CommandDispatcher, RuntimeSettings, SensorSource, Storage, StatusReporter, NEXT_KEY,
    REASON_KEY, STAGE_KEY,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Booting,
    LinkUp,
    SessionUp,
    CommandWindow,
    Suspending,
}

/// Why the cycle reached suspension
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendReason {
    /// Normal path, all phases ran
    Completed,
    /// Link failed or its wait expired
    LinkFailure,
    /// Session never came up (or dropped while being set up)
    SessionTimeout,
}

impl SuspendReason {
    /// Early suspension for an error that truncates the cycle
    ///
    /// `None` for errors the cycle cannot be suspended on.
    pub fn for_error(error: &AiotError) -> Option<Self> {
        if !error.truncates_cycle() {
            return None;
        }
        match error {
            AiotError::LinkFailure { .. } | AiotError::LinkDriver(_) => {
                Some(SuspendReason::LinkFailure)
            }
            _ => Some(SuspendReason::SessionTimeout),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleExit {
    Suspended(SuspendReason),
    /// Firmware update applied, device restarted
    Restarted,
}

/// What happened during one cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub node: NodeIdentity,
    pub wake_reason: WakeReason,
    pub phases: Vec<CyclePhase>,
    pub exit: CycleExit,
    /// Requested low-power duration; `None` on restart
    pub sleep: Option<Duration>,
    /// Link retries consumed when the session phase began
    pub retries_at_session_start: Option<u32>,
    pub commands_handled: u32,
}

impl CycleReport {
    pub fn reached(&self, phase: CyclePhase) -> bool {
        self.phases.contains(&phase)
    }
}

/// Runs one duty cycle over a board, a link driver and a session transport
pub struct CycleOrchestrator<T> {
    settings: RuntimeSettings,
    board: Board,
    link: Arc<dyn LinkDriver>,
    transport: T,
}

/// Per-cycle bookkeeping
struct Cycle {
    node: NodeIdentity,
    wake: WakeReason,
    phases: Vec<CyclePhase>,
    retries_at_session_start: Option<u32>,
    commands_handled: u32,
}

impl Cycle {
    fn enter(&mut self, phase: CyclePhase) {
        debug!(node = %self.node, ?phase, "phase");
        self.phases.push(phase);
    }

    fn finish(self, exit: CycleExit, sleep: Option<Duration>) -> CycleReport {
        CycleReport {
            node: self.node,
            wake_reason: self.wake,
            phases: self.phases,
            exit,
            sleep,
            retries_at_session_start: self.retries_at_session_start,
            commands_handled: self.commands_handled,
        }
    }
}

impl<T: SessionTransport> CycleOrchestrator<T> {
    pub fn new(
        settings: RuntimeSettings,
        board: Board,
        link: Arc<dyn LinkDriver>,
        transport: T,
    ) -> Self {
        CycleOrchestrator {
            settings,
            board,
            link,
            transport,
        }
    }

    /// Run one cycle to its single exit
    ///
    /// Link and session failures end in an early suspension and are not
    /// errors. An `Err` means storage could not be brought up and the
    /// device was restarted.
    pub async fn run_cycle(self) -> AiotResult<CycleReport> {
        let CycleOrchestrator {
            settings,
            mut board,
            link,
            transport,
        } = self;

        // Booting
        let wake = board.power.wake_reason();
        let node = board.identity.node_id();
        let topics = TopicSet::for_node(&node);
        let mut cycle = Cycle {
            node: node.clone(),
            wake,
            phases: Vec::new(),
            retries_at_session_start: None,
            commands_handled: 0,
        };
        cycle.enter(CyclePhase::Booting);
        info!(node = %node, %wake, fw = %settings.firmware_version, "boot");

        if let Err(e) = init_storage(board.storage.as_mut()) {
            return end_early(&mut board, &settings, cycle, e);
        }

        let mut config = NodeConfig::new(settings.default_sleep_secs)?;

        // LinkUp
        cycle.enter(CyclePhase::LinkUp);
        let link = ConnectivityManager::new(link, settings.link_max_retries);
        if let Err(e) = link.begin() {
            return end_early(&mut board, &settings, cycle, e);
        }
        let outcome = link.wait_outcome(settings.link_timeout).await;
        if outcome != LinkOutcome::Connected {
            debug!(?outcome, "link wait ended");
            let e = AiotError::LinkFailure {
                attempts: link.retry_budget().used(),
            };
            return end_early(&mut board, &settings, cycle, e);
        }

        // SessionUp
        cycle.enter(CyclePhase::SessionUp);
        cycle.retries_at_session_start = Some(link.retry_budget().used());

        let reporter = StatusReporter::new(
            node.clone(),
            topics.clone(),
            settings.firmware_version.clone(),
        );
        let will = reporter.will()?;
        let birth = reporter.birth(wake)?;

        let mut session = SessionManager::new(transport)
            .with_broker_uri(settings.broker_uri.as_str())
            .with_birth(birth);
        let connected = match session.connect(&node, &topics, will) {
            Ok(()) => session.wait_connected(settings.session_timeout).await,
            Err(e) => Err(e),
        };
        match connected {
            Ok(SessionOutcome::Connected) => {}
            Ok(SessionOutcome::TimedOut) => {
                return end_early(&mut board, &settings, cycle, AiotError::SessionTimeout);
            }
            Err(e) => {
                // Any setup failure (e.g. the command subscription) ends the session
                warn!(error = %e, "session setup failed");
                return end_early(&mut board, &settings, cycle, AiotError::SessionClosed);
            }
        }

        let online = KvPayload::new().with(REASON_KEY, wake);
        log_failure(
            "online status",
            reporter
                .announce_retained(&session, NodeState::Online, &online)
                .await,
        );
        let telemetry = sample_sensors(&mut board.sensors, reporter.telemetry_base(wake));
        log_failure(
            "telemetry",
            reporter.emit_telemetry(&session, &telemetry).await,
        );

        // CommandWindow
        cycle.enter(CyclePhase::CommandWindow);
        let mut dispatcher = CommandDispatcher::new();
        let deadline = Instant::now() + settings.command_window;
        while let Some(raw) = session.next_command(deadline).await {
            log_failure(
                "command ack",
                dispatcher
                    .handle(&raw, &mut config, &reporter, &session)
                    .await,
            );
        }
        cycle.commands_handled = dispatcher.handled();

        // Suspending
        cycle.enter(CyclePhase::Suspending);
        if config.is_update_pending() {
            let stage = KvPayload::new().with(STAGE_KEY, "requested");
            log_failure(
                "ota status",
                reporter
                    .announce_retained(&session, NodeState::Ota, &stage)
                    .await,
            );

            let url = config.pending_update_url().unwrap_or_default().to_string();
            match board.updater.as_mut() {
                None => {
                    warn!(%url, "no update agent on this build");
                    let event = KvPayload::event("ota_requested_but_not_applied_here");
                    log_failure("ota event", reporter.emit_event(&session, &event).await);
                }
                Some(updater) => match updater.apply_update(&url) {
                    Ok(()) => {
                        info!(%url, "update applied, restarting");
                        board.power.restart();
                        return Ok(cycle.finish(CycleExit::Restarted, None));
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "update failed");
                        let event = KvPayload::event("ota_failed")
                            .with(REASON_KEY, sanitize_value(&e.to_string()));
                        log_failure("ota event", reporter.emit_event(&session, &event).await);
                    }
                },
            }
            config.clear_update_request();
        }

        let next = KvPayload::new().with(NEXT_KEY, config.sleep_interval_secs());
        log_failure(
            "sleep status",
            reporter
                .announce_retained(&session, NodeState::Sleep, &next)
                .await,
        );
        sleep(settings.flush_grace).await;

        let duration = config.sleep_interval();
        info!(node = %node, secs = duration.as_secs(), "suspending");
        board.power.suspend(duration);

        // The session and its signals are abandoned here, not closed
        Ok(cycle.finish(
            CycleExit::Suspended(SuspendReason::Completed),
            Some(duration),
        ))
    }
}

/// Bring up storage, erasing it once if the layout is unusable
fn init_storage(storage: &mut dyn Storage) -> AiotResult<()> {
    match storage.init() {
        Ok(()) => Ok(()),
        Err(fault) if fault.needs_erase() => {
            warn!(%fault, "storage incompatible, erasing");
            storage
                .erase_and_init()
                .map_err(|e| AiotError::StorageInit(e.to_string()))
        }
        Err(fault) => Err(AiotError::StorageInit(fault.to_string())),
    }
}

/// Append one pair per sensor; a failed read is reported, not fatal
///
/// Keys are sanitized so one badly named sensor cannot spoil the snapshot.
fn sample_sensors(sensors: &mut [Box<dyn SensorSource>], mut telemetry: KvPayload) -> KvPayload {
    for sensor in sensors.iter_mut() {
        match sensor.read() {
            Ok(m) => telemetry.push(sanitize_key(&m.key), m.value),
            Err(e) => {
                warn!(sensor = sensor.name(), error = %e, "sensor read failed");
                telemetry.push(sanitize_key(&format!("{}_err", sensor.name())), "read");
            }
        }
    }
    telemetry
}

/// Suspend early or restart, depending on how the error is classified
fn end_early(
    board: &mut Board,
    settings: &RuntimeSettings,
    cycle: Cycle,
    error: AiotError,
) -> AiotResult<CycleReport> {
    match SuspendReason::for_error(&error) {
        Some(reason) => {
            warn!(node = %cycle.node, error = %error, "cycle cut short");
            Ok(suspend_early(board, settings, cycle, reason))
        }
        None => {
            error!(node = %cycle.node, error = %error, fatal = error.is_fatal(), "restarting");
            board.power.restart();
            Err(error)
        }
    }
}

/// Suspend with the default interval without publishing anything
fn suspend_early(
    board: &mut Board,
    settings: &RuntimeSettings,
    mut cycle: Cycle,
    reason: SuspendReason,
) -> CycleReport {
    cycle.enter(CyclePhase::Suspending);
    let duration = settings.default_sleep();
    info!(node = %cycle.node, ?reason, secs = duration.as_secs(), "suspending early");
    board.power.suspend(duration);
    cycle.finish(CycleExit::Suspended(reason), Some(duration))
}

fn log_failure<V>(what: &str, result: AiotResult<V>) {
    if let Err(e) = result {
        warn!(error = %e, "{} not published", what);
    }
}
