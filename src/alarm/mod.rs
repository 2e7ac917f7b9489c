//! # Alarm Engine
//!
//! Condition-driven voice alarm engine with debounce and repeat
//! semantics.
//!
//! Each alarm kind pairs a predicate with speech text. When a predicate
//! becomes true and no live alert exists for that kind, an alert is
//! created and spoken immediately, then re-spoken every repeat interval
//! for as long as the predicate holds. The predicate is re-evaluated at
//! every repeat tick, and the alert is removed the instant it goes false.
//! Re-checking an already-active alert only refreshes its speech text, so
//! a condition whose message escalates ("Battery low" to "Battery level
//! critical") keeps its cadence instead of restarting it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

/// Default repeat cadence for a firing alarm
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default minimum satellite count before the GPS fix counts as usable
pub const DEFAULT_MIN_SATELLITES: u32 = 5;

/// External voice output, consumed as a fire-and-forget sink
pub trait SpeechSink: Send {
    fn speak(&mut self, text: &str);
}

/// Speech sink that routes alarm text to the log
///
/// Stands in for a real text-to-speech backend.
#[derive(Debug, Default)]
pub struct TracingSpeech;

impl SpeechSink for TracingSpeech {
    fn speak(&mut self, text: &str) {
        info!(target: "msp_link::voice", "{}", text);
    }
}

/// Battery charge assessment from per-cell voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Good,
    Warning,
    Critical,
}

/// Snapshot of the state the alarm predicates evaluate against
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmContext {
    pub connected: bool,
    pub armed: bool,
    pub gps_position_mode: bool,
    pub gps_fix: bool,
    pub gps_num_sats: u32,
    pub battery_volts: f64,
    pub battery_cells: u32,
    pub vbat_warning_cell: f64,
    pub vbat_min_cell: f64,
}

/// The alarm conditions the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    /// Armed but the channel reports disconnected
    CommunicationLost,
    /// Armed, in a GPS-dependent mode, and the fix is absent or thin.
    /// Suppressed while communication is lost to avoid alarm storms.
    GpsFixLost,
    /// Per-cell voltage at or below the warning or critical threshold.
    /// Suppressed entirely while disconnected.
    BatteryLow,
}

impl AlarmKind {
    /// All kinds, in the order they are checked
    pub const ALL: [AlarmKind; 3] = [
        AlarmKind::CommunicationLost,
        AlarmKind::GpsFixLost,
        AlarmKind::BatteryLow,
    ];

    /// Evaluate this alarm's predicate against a state snapshot
    pub fn is_on(self, ctx: &AlarmContext, min_satellites: u32) -> bool {
        match self {
            AlarmKind::CommunicationLost => ctx.armed && !ctx.connected,
            AlarmKind::GpsFixLost => {
                if AlarmKind::CommunicationLost.is_on(ctx, min_satellites) {
                    return false;
                }
                ctx.armed
                    && ctx.gps_position_mode
                    && (!ctx.gps_fix || ctx.gps_num_sats < min_satellites)
            }
            AlarmKind::BatteryLow => battery_status(ctx) != BatteryStatus::Good,
        }
    }

    /// Speech text for the current state
    pub fn speech_text(self, ctx: &AlarmContext) -> String {
        match self {
            AlarmKind::CommunicationLost => "Communication lost".to_string(),
            AlarmKind::GpsFixLost => "GPS fix lost".to_string(),
            AlarmKind::BatteryLow => match battery_status(ctx) {
                BatteryStatus::Critical => "Battery level critical".to_string(),
                _ => "Battery low".to_string(),
            },
        }
    }
}

/// Assess the battery from the snapshot's per-cell voltage
///
/// A lost link reads as `Good`: there is no point voicing a battery alarm
/// for a vehicle we cannot hear.
pub fn battery_status(ctx: &AlarmContext) -> BatteryStatus {
    if !ctx.connected {
        return BatteryStatus::Good;
    }
    if ctx.battery_cells == 0 || ctx.battery_volts <= 0.0 {
        return BatteryStatus::Good;
    }

    let volts_per_cell = ctx.battery_volts / ctx.battery_cells as f64;
    if volts_per_cell <= ctx.vbat_min_cell {
        BatteryStatus::Critical
    } else if volts_per_cell <= ctx.vbat_warning_cell {
        BatteryStatus::Warning
    } else {
        BatteryStatus::Good
    }
}

/// The live instance of a firing alarm condition
#[derive(Debug, Clone)]
pub struct ActiveAlert {
    /// Current speech text; mutable so an escalating condition can update
    /// an alert already in flight
    pub speech: String,
    /// When the next repeat is due
    pub next_due: Instant,
}

/// Evaluates alarm conditions and drives the repeat-until-false cadence
pub struct AlarmEngine {
    alerts: HashMap<AlarmKind, ActiveAlert>,
    speech: Box<dyn SpeechSink>,
    repeat_interval: Duration,
    min_satellites: u32,
}

impl std::fmt::Debug for AlarmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmEngine")
            .field("active_alerts", &self.alerts.len())
            .field("repeat_interval", &self.repeat_interval)
            .finish_non_exhaustive()
    }
}

impl AlarmEngine {
    pub fn new(speech: Box<dyn SpeechSink>) -> Self {
        Self::with_settings(speech, DEFAULT_REPEAT_INTERVAL, DEFAULT_MIN_SATELLITES)
    }

    pub fn with_settings(
        speech: Box<dyn SpeechSink>,
        repeat_interval: Duration,
        min_satellites: u32,
    ) -> Self {
        Self {
            alerts: HashMap::new(),
            speech,
            repeat_interval,
            min_satellites,
        }
    }

    /// Evaluate one condition against a snapshot
    ///
    /// A newly-true condition speaks immediately and starts its cadence.
    /// An already-active one only has its speech text refreshed: the
    /// cadence is never restarted while the alert lives. A false
    /// condition is simply never instantiated; teardown of an active
    /// alert happens at its repeat tick, where the predicate is
    /// re-evaluated.
    pub fn check_alarm(&mut self, kind: AlarmKind, ctx: &AlarmContext, now: Instant) {
        if !kind.is_on(ctx, self.min_satellites) {
            return;
        }

        let text = kind.speech_text(ctx);
        if let Some(alert) = self.alerts.get_mut(&kind) {
            alert.speech = text;
            return;
        }

        debug!("alarm {:?} raised: {}", kind, text);
        self.speech.speak(&text);
        self.alerts.insert(
            kind,
            ActiveAlert {
                speech: text,
                next_due: now + self.repeat_interval,
            },
        );
    }

    /// Evaluate every condition against a snapshot
    pub fn check_all(&mut self, ctx: &AlarmContext, now: Instant) {
        for kind in AlarmKind::ALL {
            self.check_alarm(kind, ctx, now);
        }
    }

    /// Earliest repeat deadline among live alerts
    pub fn next_due(&self) -> Option<Instant> {
        self.alerts.values().map(|alert| alert.next_due).min()
    }

    /// Drive due alerts: re-evaluate each predicate, re-speak while true,
    /// remove the instant it is false
    pub fn fire_due(&mut self, ctx: &AlarmContext, now: Instant) {
        let due: Vec<AlarmKind> = self
            .alerts
            .iter()
            .filter(|(_, alert)| alert.next_due <= now)
            .map(|(&kind, _)| kind)
            .collect();

        for kind in due {
            if !kind.is_on(ctx, self.min_satellites) {
                debug!("alarm {:?} cleared", kind);
                self.alerts.remove(&kind);
                continue;
            }
            if let Some(alert) = self.alerts.get_mut(&kind) {
                alert.speech = kind.speech_text(ctx);
                self.speech.speak(&alert.speech);
                alert.next_due = now + self.repeat_interval;
            }
        }
    }

    /// Cancel every live alert unconditionally (teardown/disconnect)
    pub fn stop_alerts(&mut self) {
        if !self.alerts.is_empty() {
            debug!("stopping {} active alert(s)", self.alerts.len());
        }
        self.alerts.clear();
    }

    /// The live alert for a kind, if any
    pub fn active_alert(&self, kind: AlarmKind) -> Option<&ActiveAlert> {
        self.alerts.get(&kind)
    }

    pub fn active_alert_count(&self) -> usize {
        self.alerts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSpeech {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechSink for RecordingSpeech {
        fn speak(&mut self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }
    }

    fn engine() -> (AlarmEngine, RecordingSpeech) {
        let speech = RecordingSpeech::default();
        let engine = AlarmEngine::with_settings(
            Box::new(speech.clone()),
            Duration::from_secs(10),
            DEFAULT_MIN_SATELLITES,
        );
        (engine, speech)
    }

    fn healthy_ctx() -> AlarmContext {
        AlarmContext {
            connected: true,
            armed: true,
            gps_position_mode: false,
            gps_fix: true,
            gps_num_sats: 10,
            battery_volts: 15.6,
            battery_cells: 4,
            vbat_warning_cell: 3.5,
            vbat_min_cell: 3.3,
        }
    }

    #[test]
    fn test_battery_status_thresholds() {
        let mut ctx = healthy_ctx();
        assert_eq!(battery_status(&ctx), BatteryStatus::Good); // 3.9 V/cell

        ctx.battery_volts = 13.8; // 3.45 V/cell
        assert_eq!(battery_status(&ctx), BatteryStatus::Warning);

        ctx.battery_volts = 13.2; // 3.3 V/cell
        assert_eq!(battery_status(&ctx), BatteryStatus::Critical);
    }

    #[test]
    fn test_battery_status_good_when_disconnected() {
        let mut ctx = healthy_ctx();
        ctx.battery_volts = 12.0; // deeply critical if we could hear it
        ctx.connected = false;
        assert_eq!(battery_status(&ctx), BatteryStatus::Good);
    }

    #[test]
    fn test_battery_status_good_with_unknown_cell_count() {
        let mut ctx = healthy_ctx();
        ctx.battery_cells = 0;
        ctx.battery_volts = 3.0;
        assert_eq!(battery_status(&ctx), BatteryStatus::Good);
    }

    #[test]
    fn test_communication_lost_requires_armed() {
        let mut ctx = healthy_ctx();
        ctx.connected = false;
        assert!(AlarmKind::CommunicationLost.is_on(&ctx, 5));

        ctx.armed = false;
        assert!(!AlarmKind::CommunicationLost.is_on(&ctx, 5));
    }

    #[test]
    fn test_gps_fix_lost_predicate() {
        let mut ctx = healthy_ctx();
        ctx.gps_position_mode = true;

        ctx.gps_fix = false;
        assert!(AlarmKind::GpsFixLost.is_on(&ctx, 5));

        ctx.gps_fix = true;
        ctx.gps_num_sats = 4;
        assert!(AlarmKind::GpsFixLost.is_on(&ctx, 5));

        ctx.gps_num_sats = 5;
        assert!(!AlarmKind::GpsFixLost.is_on(&ctx, 5));

        // Not in a GPS-dependent mode: never fires
        ctx.gps_position_mode = false;
        ctx.gps_fix = false;
        assert!(!AlarmKind::GpsFixLost.is_on(&ctx, 5));
    }

    #[test]
    fn test_gps_fix_lost_suppressed_while_comm_lost() {
        let mut ctx = healthy_ctx();
        ctx.gps_position_mode = true;
        ctx.gps_fix = false;
        ctx.connected = false;

        assert!(AlarmKind::CommunicationLost.is_on(&ctx, 5));
        assert!(!AlarmKind::GpsFixLost.is_on(&ctx, 5));
    }

    #[test]
    fn test_new_alert_speaks_immediately() {
        let (mut engine, speech) = engine();
        let mut ctx = healthy_ctx();
        ctx.connected = false;

        let now = Instant::now();
        engine.check_alarm(AlarmKind::CommunicationLost, &ctx, now);

        assert_eq!(*speech.spoken.lock().unwrap(), vec!["Communication lost"]);
        assert_eq!(
            engine.active_alert(AlarmKind::CommunicationLost).unwrap().next_due,
            now + Duration::from_secs(10)
        );
    }

    #[test]
    fn test_repeat_while_condition_holds() {
        let (mut engine, speech) = engine();
        let mut ctx = healthy_ctx();
        ctx.connected = false;

        let t0 = Instant::now();
        engine.check_alarm(AlarmKind::CommunicationLost, &ctx, t0);
        engine.fire_due(&ctx, t0 + Duration::from_secs(10));
        engine.fire_due(&ctx, t0 + Duration::from_secs(20));

        assert_eq!(speech.spoken.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_alert_removed_when_condition_clears() {
        let (mut engine, speech) = engine();
        let mut ctx = healthy_ctx();
        ctx.connected = false;

        let t0 = Instant::now();
        engine.check_alarm(AlarmKind::CommunicationLost, &ctx, t0);

        ctx.connected = true;
        engine.fire_due(&ctx, t0 + Duration::from_secs(10));

        assert_eq!(engine.active_alert_count(), 0);
        assert_eq!(speech.spoken.lock().unwrap().len(), 1); // only the initial speak
    }

    #[test]
    fn test_debounce_no_overlapping_cadence() {
        // Condition flips true -> false -> true within one repeat
        // interval: the existing alert must absorb the re-check instead
        // of spawning a second cadence.
        let (mut engine, speech) = engine();
        let mut ctx = healthy_ctx();
        ctx.connected = false;

        let t0 = Instant::now();
        engine.check_alarm(AlarmKind::CommunicationLost, &ctx, t0);

        ctx.connected = true; // briefly back
        ctx.connected = false; // and gone again
        engine.check_alarm(AlarmKind::CommunicationLost, &ctx, t0 + Duration::from_secs(3));

        assert_eq!(engine.active_alert_count(), 1);
        assert_eq!(speech.spoken.lock().unwrap().len(), 1);
        // Cadence unchanged: still due at t0 + 10s, not t0 + 13s
        assert_eq!(
            engine.active_alert(AlarmKind::CommunicationLost).unwrap().next_due,
            t0 + Duration::from_secs(10)
        );
    }

    #[test]
    fn test_battery_escalation_keeps_cadence() {
        // 3.9 -> 3.45 -> 3.3 V per cell with warning 3.5 and critical
        // 3.3: Good -> Warning -> Critical, and the spoken text changes
        // without restarting the repeat timer.
        let (mut engine, speech) = engine();
        let mut ctx = healthy_ctx();
        let t0 = Instant::now();

        engine.check_alarm(AlarmKind::BatteryLow, &ctx, t0);
        assert_eq!(engine.active_alert_count(), 0); // Good: nothing fires

        ctx.battery_volts = 13.8; // Warning
        engine.check_alarm(AlarmKind::BatteryLow, &ctx, t0 + Duration::from_secs(1));
        assert_eq!(*speech.spoken.lock().unwrap(), vec!["Battery low"]);
        let due_after_warning = engine.active_alert(AlarmKind::BatteryLow).unwrap().next_due;

        ctx.battery_volts = 13.2; // Critical
        engine.check_alarm(AlarmKind::BatteryLow, &ctx, t0 + Duration::from_secs(2));
        let alert = engine.active_alert(AlarmKind::BatteryLow).unwrap();
        assert_eq!(alert.speech, "Battery level critical");
        assert_eq!(alert.next_due, due_after_warning, "cadence must not restart");

        // Next repeat voices the escalated text
        engine.fire_due(&ctx, due_after_warning);
        assert_eq!(
            *speech.spoken.lock().unwrap(),
            vec!["Battery low", "Battery level critical"]
        );
    }

    #[test]
    fn test_stop_alerts_cancels_everything() {
        let (mut engine, _speech) = engine();
        let mut ctx = healthy_ctx();
        ctx.connected = false;
        ctx.battery_volts = 13.2;

        let now = Instant::now();
        engine.check_all(&ctx, now);
        assert!(engine.active_alert_count() > 0);

        engine.stop_alerts();
        assert_eq!(engine.active_alert_count(), 0);
        assert_eq!(engine.next_due(), None);
    }

    #[test]
    fn test_next_due_is_earliest() {
        let (mut engine, _speech) = engine();
        let mut ctx = healthy_ctx();
        ctx.connected = false;

        let t0 = Instant::now();
        engine.check_alarm(AlarmKind::CommunicationLost, &ctx, t0);
        assert_eq!(engine.next_due(), Some(t0 + Duration::from_secs(10)));
    }
}
