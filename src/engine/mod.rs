//! # Telemetry Engine
//!
//! The single logical context that owns the transport, the command
//! scheduler, the vehicle state store, and the alarm engine. Everything
//! runs on one `select!` loop, so state mutation never races: inbound
//! frames, timer ticks, and control requests from [`EngineHandle`] are all
//! serialized through it.
//!
//! The engine never reconnects on its own. When the channel closes it
//! cleans up, emits [`Notice::Disconnected`], and returns from [`run`].
//!
//! [`run`]: TelemetryEngine::run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmContext, AlarmEngine, SpeechSink};
use crate::config::Config;
use crate::flightlog::{FlightLogRecorder, TelemetryRecord};
use crate::location::LocationProvider;
use crate::msp::protocol::{build_set_waypoint, Direction, MspFrame, MSP_STATUS, WAYPOINT_POSHOLD};
use crate::scheduler::{CommandRegistrant, CommandScheduler, RegistrantId};
use crate::transport::{Transport, TransportEvent};
use crate::vehicle::Vehicle;

/// Engine events surfaced to the user interface layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The link watchdog tripped; telemetry is stale
    NoDataReceived,
    /// Data started flowing again after a watchdog trip
    DataResumed,
    /// The communication channel closed; the engine has shut down
    Disconnected,
    /// The UI should keep the display awake (or stop doing so)
    DisableIdleTimer(bool),
}

/// Control requests accepted by the running engine
enum Control {
    Stop,
    EnterBackground { allow_polling_while_recording: bool },
    EnterForeground,
    SetFollowActive(bool),
    Register(Box<dyn CommandRegistrant>, oneshot::Sender<RegistrantId>),
    Unregister(RegistrantId),
    SendCommand {
        frame: MspFrame,
        expected_response: Option<u8>,
        callback: Option<Box<dyn FnOnce(bool) + Send>>,
    },
}

/// Cloneable remote control for a running [`TelemetryEngine`]
///
/// All methods are fire-and-forget against the engine's control queue; a
/// send to an already-stopped engine is silently dropped.
#[derive(Clone)]
pub struct EngineHandle {
    control_tx: mpsc::UnboundedSender<Control>,
}

impl EngineHandle {
    /// Shut the engine down; the channel is closed and `run` returns
    pub fn stop(&self) {
        let _ = self.control_tx.send(Control::Stop);
    }

    /// The app moved to the background; polling is suspended unless an
    /// armed flight is being recorded and `allow_polling_while_recording`
    /// permits it
    pub fn enter_background(&self, allow_polling_while_recording: bool) {
        let _ = self.control_tx.send(Control::EnterBackground {
            allow_polling_while_recording,
        });
    }

    /// The app returned to the foreground; polling resumes
    pub fn enter_foreground(&self) {
        let _ = self.control_tx.send(Control::EnterForeground);
    }

    /// Enable or disable follow mode (steer the vehicle toward the
    /// ground station's position)
    pub fn set_follow_active(&self, active: bool) {
        let _ = self.control_tx.send(Control::SetFollowActive(active));
    }

    /// Register a command producer to run on every scheduler tick
    pub async fn register(&self, registrant: Box<dyn CommandRegistrant>) -> Option<RegistrantId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(Control::Register(registrant, reply_tx))
            .ok()?;
        reply_rx.await.ok()
    }

    /// Remove a previously registered command producer
    pub fn unregister(&self, id: RegistrantId) {
        let _ = self.control_tx.send(Control::Unregister(id));
    }

    /// Send a one-off command; if `expected_response` is set, `callback`
    /// fires with `true` on a matching response and `false` on timeout
    /// or channel close
    pub fn send_command(
        &self,
        frame: MspFrame,
        expected_response: Option<u8>,
        callback: Option<Box<dyn FnOnce(bool) + Send>>,
    ) {
        let _ = self.control_tx.send(Control::SendCommand {
            frame,
            expected_response,
            callback,
        });
    }
}

/// Timing and behavior knobs, distilled from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub interval_floor: Duration,
    pub interval_ceiling: Duration,
    pub command_timeout: Duration,
    pub follow_interval: Duration,
    pub alarms_enabled: bool,
    pub alarm_repeat_interval: Duration,
    pub min_satellites: u32,
    pub continue_in_background: bool,
    pub disable_idle_timer: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval_floor: Duration::from_millis(config.scheduler.interval_floor_ms),
            interval_ceiling: Duration::from_millis(config.scheduler.interval_ceiling_ms),
            command_timeout: Duration::from_millis(config.scheduler.command_timeout_ms),
            follow_interval: Duration::from_millis(config.scheduler.follow_interval_ms),
            alarms_enabled: config.alarms.enabled,
            alarm_repeat_interval: Duration::from_secs(config.alarms.repeat_interval_s),
            min_satellites: config.alarms.min_satellites,
            continue_in_background: config.recording.continue_in_background,
            disable_idle_timer: config.preferences.disable_idle_timer,
        }
    }
}

/// What the next timer wakeup is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    SchedulerTick,
    AlarmRepeat,
    PendingTimeout,
    FollowUpdate,
    None,
}

pub struct TelemetryEngine {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    notices: mpsc::UnboundedSender<Notice>,
    scheduler: CommandScheduler,
    vehicle: Vehicle,
    alarms: AlarmEngine,
    settings: EngineSettings,
    location: Option<Box<dyn LocationProvider>>,
    recorder: Option<FlightLogRecorder>,
    follow_active: bool,
    next_follow_at: Instant,
    /// Set by the pending callback of an unacknowledged follow update
    follow_retry: Option<Arc<AtomicBool>>,
    in_background: bool,
}

impl TelemetryEngine {
    /// Wire an engine onto an open transport
    ///
    /// Returns the engine itself (drive it with [`run`]), a cloneable
    /// control handle, and the notice stream for the UI.
    ///
    /// [`run`]: TelemetryEngine::run
    pub fn new(
        transport: Transport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        settings: EngineSettings,
        speech: Box<dyn SpeechSink>,
        location: Option<Box<dyn LocationProvider>>,
        recorder: Option<FlightLogRecorder>,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<Notice>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let scheduler = CommandScheduler::new(settings.interval_floor, settings.interval_ceiling);
        let alarms = AlarmEngine::with_settings(
            speech,
            settings.alarm_repeat_interval,
            settings.min_satellites,
        );

        let engine = Self {
            transport,
            events,
            control_rx,
            notices: notice_tx,
            scheduler,
            vehicle: Vehicle::new(),
            alarms,
            settings,
            location,
            recorder,
            follow_active: false,
            next_follow_at: Instant::now(),
            follow_retry: None,
            in_background: false,
        };
        let handle = EngineHandle { control_tx };
        (engine, handle, notice_rx)
    }

    /// Run the engine until the channel closes or [`EngineHandle::stop`]
    /// is called
    pub async fn run(mut self) {
        info!("telemetry engine started");
        self.vehicle.connected.set(true);

        if self.settings.disable_idle_timer {
            let _ = self.notices.send(Notice::DisableIdleTimer(true));
        }

        self.scheduler.start(Instant::now());

        loop {
            let (wake, deadline) = self.next_wake();

            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(TransportEvent::Frame(frame)) => self.on_frame(&frame),
                        Some(TransportEvent::Closed) | None => {
                            self.on_channel_closed();
                            break;
                        }
                    }
                }
                control = self.control_rx.recv() => {
                    match control {
                        Some(Control::Stop) | None => {
                            debug!("engine stop requested");
                            self.shutdown();
                            break;
                        }
                        Some(control) => self.on_control(control),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.on_wake(wake);
                }
            }
        }

        if self.settings.disable_idle_timer {
            let _ = self.notices.send(Notice::DisableIdleTimer(false));
        }
        info!("telemetry engine stopped");
    }

    /// Earliest of the armed timers, and what it is for
    fn next_wake(&self) -> (Wake, Instant) {
        let mut wake = Wake::None;
        // Nothing armed: park for an hour, the select loop re-evaluates
        // whenever anything else happens
        let mut at = Instant::now() + Duration::from_secs(3600);

        let mut consider = |candidate: Wake, when: Option<Instant>| {
            if let Some(when) = when {
                if when < at {
                    wake = candidate;
                    at = when;
                }
            }
        };

        consider(Wake::SchedulerTick, self.scheduler.next_tick_at());
        consider(Wake::PendingTimeout, self.scheduler.next_pending_deadline());
        if self.settings.alarms_enabled {
            consider(Wake::AlarmRepeat, self.alarms.next_due());
        }
        if self.follow_active && self.transport.connected() {
            consider(Wake::FollowUpdate, Some(self.next_follow_at));
        }

        (wake, at)
    }

    fn on_wake(&mut self, wake: Wake) {
        let now = Instant::now();
        match wake {
            Wake::SchedulerTick => {
                let report = self.scheduler.tick(&mut self.transport, now);
                if report.became_unhealthy {
                    warn!("no telemetry data received");
                    self.vehicle.no_data_received.set(true);
                    let _ = self.notices.send(Notice::NoDataReceived);
                    self.check_alarms(now);
                }
            }
            Wake::AlarmRepeat => {
                let ctx = self.alarm_context();
                self.alarms.fire_due(&ctx, now);
            }
            Wake::PendingTimeout => {
                self.scheduler.expire_pending(now);
                // A failed follow update forfeits its slot in the period;
                // send the next fix right away instead of waiting it out
                if let Some(flag) = &self.follow_retry {
                    if flag.swap(false, Ordering::SeqCst) && self.follow_active {
                        self.next_follow_at = now;
                    }
                }
            }
            Wake::FollowUpdate => {
                self.send_follow_update(now);
            }
            Wake::None => {}
        }
    }

    fn on_frame(&mut self, frame: &MspFrame) {
        self.vehicle.apply_frame(frame);
        self.scheduler
            .resolve_pending(frame.command, frame.direction != Direction::Error);

        if self.scheduler.note_data_received() {
            info!("telemetry data resumed");
            self.vehicle.no_data_received.set(false);
            let _ = self.notices.send(Notice::DataResumed);
        }

        self.check_alarms(Instant::now());

        // One log line per status frame keeps the record rate tied to
        // the polling rate
        if frame.command == MSP_STATUS {
            self.record_snapshot();
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            // Stop is intercepted by the select loop before reaching here
            Control::Stop => {}
            Control::EnterBackground { allow_polling_while_recording } => {
                self.on_enter_background(allow_polling_while_recording)
            }
            Control::EnterForeground => self.on_enter_foreground(),
            Control::SetFollowActive(active) => {
                if active != self.follow_active {
                    debug!("follow mode {}", if active { "on" } else { "off" });
                }
                self.follow_active = active;
                if active {
                    self.next_follow_at = Instant::now();
                }
            }
            Control::Register(registrant, reply) => {
                let id = self.scheduler.register(registrant);
                let _ = reply.send(id);
            }
            Control::Unregister(id) => self.scheduler.unregister(id),
            Control::SendCommand { frame, expected_response, callback } => {
                if let Some(response) = expected_response {
                    let callback = callback.unwrap_or_else(|| Box::new(|_| {}));
                    self.scheduler.add_pending(
                        response,
                        self.settings.command_timeout,
                        Instant::now(),
                        callback,
                    );
                } else if let Some(callback) = callback {
                    // No acknowledgment to wait for; report the send itself
                    callback(self.transport.connected());
                }
                self.transport.send(&frame, true);
            }
        }
    }

    fn on_enter_background(&mut self, allow_polling_while_recording: bool) {
        self.in_background = true;
        let keep_polling = allow_polling_while_recording
            && self.recorder.is_some()
            && *self.vehicle.armed.get();
        if keep_polling {
            debug!("backgrounded while recording an armed flight, polling continues");
            return;
        }
        debug!("backgrounded, polling suspended");
        self.scheduler.stop();
        self.alarms.stop_alerts();
    }

    fn on_enter_foreground(&mut self) {
        if !self.in_background {
            return;
        }
        self.in_background = false;
        if self.transport.connected() && !self.scheduler.is_armed() {
            debug!("foregrounded, polling resumes");
            self.scheduler.start(Instant::now());
        }
    }

    /// Steer the vehicle toward the ground station's current position
    fn send_follow_update(&mut self, now: Instant) {
        // Period elapses whether or not the update could be sent
        self.next_follow_at = now + self.settings.follow_interval;

        let Some(provider) = self.location.as_mut() else {
            return;
        };
        let Some(position) = provider.current_position() else {
            debug!("follow update skipped, no ground position fix");
            return;
        };

        let frame = build_set_waypoint(WAYPOINT_POSHOLD, position.latitude, position.longitude, 0);
        let retry = Arc::new(AtomicBool::new(false));
        self.follow_retry = Some(Arc::clone(&retry));
        self.scheduler.add_pending(
            crate::msp::protocol::MSP_SET_WP,
            self.settings.command_timeout,
            now,
            move |acknowledged| {
                if !acknowledged {
                    warn!("follow waypoint update was not acknowledged");
                    retry.store(true, Ordering::SeqCst);
                }
            },
        );
        self.transport.send(&frame, true);
    }

    fn alarm_context(&self) -> AlarmContext {
        AlarmContext {
            // For alarm purposes a tripped watchdog counts as lost
            // communication even while the channel is still open
            connected: self.transport.connected() && self.scheduler.healthy(),
            armed: *self.vehicle.armed.get(),
            gps_position_mode: *self.vehicle.gps_position_mode.get(),
            gps_fix: *self.vehicle.gps_fix.get(),
            gps_num_sats: *self.vehicle.gps_num_sats.get(),
            battery_volts: *self.vehicle.battery_volts.get(),
            battery_cells: *self.vehicle.battery_cells.get(),
            vbat_warning_cell: *self.vehicle.vbat_warning_cell.get(),
            vbat_min_cell: *self.vehicle.vbat_min_cell.get(),
        }
    }

    fn check_alarms(&mut self, now: Instant) {
        if !self.settings.alarms_enabled {
            return;
        }
        let ctx = self.alarm_context();
        self.alarms.check_all(&ctx, now);
    }

    fn record_snapshot(&mut self) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let record = TelemetryRecord::from_vehicle(&self.vehicle);
        if let Err(e) = recorder.record(&record) {
            warn!("flight log write failed, recording stopped: {}", e);
            self.recorder = None;
        }
    }

    /// The far side went away; tear everything down exactly once
    fn on_channel_closed(&mut self) {
        info!("communication channel closed");
        self.vehicle.connected.set(false);

        // An armed vehicle losing its link is the communication-lost
        // condition itself; voice it before teardown clears the alerts
        if self.settings.alarms_enabled {
            let mut ctx = self.alarm_context();
            ctx.connected = false;
            self.alarms.check_all(&ctx, Instant::now());
        }

        self.shutdown();
        let _ = self.notices.send(Notice::Disconnected);
    }

    fn shutdown(&mut self) {
        self.scheduler.stop();
        self.scheduler.cancel_all_pending();
        self.alarms.stop_alerts();
        self.transport.close();
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.close() {
                warn!("flight log close failed: {}", e);
            }
        }
    }
}
