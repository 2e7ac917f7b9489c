//! # Command Scheduler
//!
//! Periodic driver of the telemetry link.
//!
//! Each tick emits a fixed core set of status requests (each independently
//! useful if others are dropped), alternates between the raw and derived
//! position requests on a toggle, lets every registered command producer
//! inject its own frames, then flushes the batch in one write. The tick
//! reschedules itself for exactly one future firing, with the period
//! adapted to the observed round-trip latency, so interval changes take
//! effect on the very next cycle.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::msp::protocol::{
    build_waypoint_request, MspFrame, MSP_ALTITUDE, MSP_ANALOG, MSP_ATTITUDE, MSP_COMP_GPS,
    MSP_RAW_GPS, MSP_STATUS, WAYPOINT_HOME, WAYPOINT_POSHOLD,
};
use crate::transport::Transport;

/// Multiplier applied to the smoothed latency when sizing the next tick
const INTERVAL_LATENCY_FACTOR: f64 = 1.33;

/// Fastest allowed polling period (prevents tight-looping on a fast link)
pub const INTERVAL_FLOOR: Duration = Duration::from_millis(100);

/// Slowest allowed polling period (bounds staleness on a slow link)
pub const INTERVAL_CEILING: Duration = Duration::from_secs(1);

/// Minimum silence before the watchdog flags the link unhealthy
pub const WATCHDOG_MIN_THRESHOLD: Duration = Duration::from_millis(750);

/// External producer of outbound frames, invoked once per tick in
/// registration order
pub trait CommandRegistrant: Send {
    fn send_commands(&mut self, transport: &mut Transport);
}

/// Identity of a registered command producer
pub type RegistrantId = u64;

/// A command awaiting acknowledgment from the flight controller
pub struct PendingCommand {
    pub expected_response: u8,
    pub issued_at: Instant,
    pub timeout: Duration,
    callback: Box<dyn FnOnce(bool) + Send>,
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("expected_response", &self.expected_response)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Scheduler state: Idle (no timer pending) or Armed (periodic request
/// in flight). Distinct from the vehicle's own arming state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
}

/// Outcome of one tick, surfaced to the engine context
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    /// The watchdog flagged the link unhealthy on this tick
    pub became_unhealthy: bool,
}

/// Adaptive periodic command driver
pub struct CommandScheduler {
    state: SchedulerState,
    interval: Duration,
    floor: Duration,
    ceiling: Duration,
    next_tick_at: Instant,
    /// Alternates raw-position vs. derived-position requests; the
    /// telemetry source refreshes GPS slowly, so alternating doubles
    /// coverage without doubling bandwidth
    status_toggle: bool,
    /// Alternates the polled waypoint slot (home vs. position hold);
    /// deliberately independent of the status toggle
    waypoint_toggle: bool,
    registrants: Vec<(RegistrantId, Box<dyn CommandRegistrant>)>,
    next_registrant_id: RegistrantId,
    pending: Vec<PendingCommand>,
    healthy: bool,
}

impl std::fmt::Debug for CommandScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandScheduler")
            .field("state", &self.state)
            .field("interval", &self.interval)
            .field("registrants", &self.registrants.len())
            .field("pending", &self.pending.len())
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl Default for CommandScheduler {
    fn default() -> Self {
        Self::new(INTERVAL_FLOOR, INTERVAL_CEILING)
    }
}

impl CommandScheduler {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            state: SchedulerState::Idle,
            interval: floor,
            floor,
            ceiling,
            next_tick_at: Instant::now(),
            status_toggle: false,
            waypoint_toggle: false,
            registrants: Vec::new(),
            next_registrant_id: 0,
            pending: Vec::new(),
            healthy: true,
        }
    }

    /// Arm the scheduler; the first tick fires immediately
    pub fn start(&mut self, now: Instant) {
        if self.state == SchedulerState::Armed {
            return;
        }
        debug!("scheduler armed");
        self.state = SchedulerState::Armed;
        self.next_tick_at = now;
    }

    /// Back to Idle; no further ticks fire
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Idle {
            return;
        }
        debug!("scheduler idle");
        self.state = SchedulerState::Idle;
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == SchedulerState::Armed
    }

    /// When the next tick is due, if armed
    pub fn next_tick_at(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Armed => Some(self.next_tick_at),
            SchedulerState::Idle => None,
        }
    }

    /// Current adaptive polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the watchdog currently considers the link healthy
    pub fn healthy(&self) -> bool {
        self.healthy
    }

    /// Next interval for an observed latency:
    /// `clamp(latency * 1.33, floor, ceiling)`
    pub fn compute_interval(&self, latency: Duration) -> Duration {
        let scaled = latency.as_secs_f64() * INTERVAL_LATENCY_FACTOR;
        Duration::from_secs_f64(scaled.clamp(self.floor.as_secs_f64(), self.ceiling.as_secs_f64()))
    }

    /// Silence threshold before the link is flagged unhealthy; scales
    /// with the interval so slow links are not falsely flagged
    pub fn watchdog_threshold(&self) -> Duration {
        WATCHDOG_MIN_THRESHOLD.max(self.interval)
    }

    /// Run one tick: emit the core request set and registrant frames,
    /// evaluate the watchdog, and schedule exactly one future firing
    pub fn tick(&mut self, transport: &mut Transport, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        if self.state != SchedulerState::Armed {
            return report;
        }

        // Core status set; all batched, flushed once below. Every frame
        // is independently decodable, so a dropped one costs only itself.
        transport.send(&MspFrame::request(MSP_STATUS), false);

        self.status_toggle = !self.status_toggle;
        if self.status_toggle {
            transport.send(&MspFrame::request(MSP_RAW_GPS), false);
        } else {
            transport.send(&MspFrame::request(MSP_COMP_GPS), false);
        }

        transport.send(&MspFrame::request(MSP_ALTITUDE), false);
        transport.send(&MspFrame::request(MSP_ATTITUDE), false);
        transport.send(&MspFrame::request(MSP_ANALOG), false);

        self.waypoint_toggle = !self.waypoint_toggle;
        let slot = if self.waypoint_toggle {
            WAYPOINT_HOME
        } else {
            WAYPOINT_POSHOLD
        };
        transport.send(&build_waypoint_request(slot), false);

        // Registrants run in registration order and may emit zero or
        // more frames each; the list only changes between ticks.
        for (_, registrant) in &mut self.registrants {
            registrant.send_commands(transport);
        }

        transport.flush_outbox();

        // Watchdog: silence longer than the threshold flags the link
        if self.healthy && transport.connected() {
            if let Some(last_data) = transport.last_data_at() {
                if now.saturating_duration_since(last_data) > self.watchdog_threshold() {
                    debug!("watchdog: no data for over {:?}", self.watchdog_threshold());
                    self.healthy = false;
                    report.became_unhealthy = true;
                }
            }
        }

        self.interval = self.compute_interval(transport.latency());
        self.next_tick_at = now + self.interval;
        trace!("next tick in {:?}", self.interval);

        report
    }

    /// Inbound data observed; clears the watchdog. Returns true when
    /// this transitions the link back to healthy.
    pub fn note_data_received(&mut self) -> bool {
        if self.healthy {
            return false;
        }
        self.healthy = true;
        true
    }

    /// Register a command producer; invoked on every subsequent tick
    pub fn register(&mut self, registrant: Box<dyn CommandRegistrant>) -> RegistrantId {
        let id = self.next_registrant_id;
        self.next_registrant_id += 1;
        self.registrants.push((id, registrant));
        id
    }

    /// Remove a producer by identity; a no-op for unknown ids
    pub fn unregister(&mut self, id: RegistrantId) {
        self.registrants.retain(|(rid, _)| *rid != id);
    }

    pub fn registrant_count(&self) -> usize {
        self.registrants.len()
    }

    /// Track a command that expects an acknowledgment
    pub fn add_pending(
        &mut self,
        expected_response: u8,
        timeout: Duration,
        now: Instant,
        callback: impl FnOnce(bool) + Send + 'static,
    ) {
        self.pending.push(PendingCommand {
            expected_response,
            issued_at: now,
            timeout,
            callback: Box::new(callback),
        });
    }

    /// A reply arrived; settle every pending command it matches.
    /// `acknowledged` is false for an error-direction reply, which still
    /// removes the command but reports the rejection to its callback.
    pub fn resolve_pending(&mut self, response_command: u8, acknowledged: bool) {
        let mut keep = Vec::new();
        for pending in self.pending.drain(..) {
            if pending.expected_response == response_command {
                if !acknowledged {
                    debug!("command 0x{:02X} rejected", response_command);
                }
                (pending.callback)(acknowledged);
            } else {
                keep.push(pending);
            }
        }
        self.pending = keep;
    }

    /// Fail every pending command whose deadline has elapsed
    pub fn expire_pending(&mut self, now: Instant) {
        let mut keep = Vec::new();
        for pending in self.pending.drain(..) {
            if now.saturating_duration_since(pending.issued_at) >= pending.timeout {
                debug!(
                    "command expecting 0x{:02X} timed out",
                    pending.expected_response
                );
                (pending.callback)(false);
            } else {
                keep.push(pending);
            }
        }
        self.pending = keep;
    }

    /// Earliest pending-command deadline, if any
    pub fn next_pending_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .map(|pending| pending.issued_at + pending.timeout)
            .min()
    }

    /// Fail every pending command immediately (channel closed)
    pub fn cancel_all_pending(&mut self) {
        for pending in self.pending.drain(..) {
            (pending.callback)(false);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::decoder::{DecodeStatus, FrameDecoder};
    use crate::msp::protocol::MSP_SET_WP;
    use crate::transport::IoLink;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_interval_bounds_over_full_latency_range() {
        let scheduler = CommandScheduler::default();
        for latency_ms in (0..=10_000).step_by(50) {
            let interval = scheduler.compute_interval(Duration::from_millis(latency_ms));
            assert!(
                interval >= INTERVAL_FLOOR && interval <= INTERVAL_CEILING,
                "latency {}ms produced out-of-range interval {:?}",
                latency_ms,
                interval
            );
        }
    }

    #[test]
    fn test_interval_tracks_latency() {
        let scheduler = CommandScheduler::default();
        let interval = scheduler.compute_interval(Duration::from_millis(300));
        assert!((interval.as_secs_f64() - 0.399).abs() < 1e-9);
    }

    #[test]
    fn test_watchdog_threshold_scales_with_interval() {
        let mut scheduler = CommandScheduler::default();
        assert_eq!(scheduler.watchdog_threshold(), WATCHDOG_MIN_THRESHOLD);

        scheduler.interval = Duration::from_millis(900);
        assert_eq!(scheduler.watchdog_threshold(), Duration::from_millis(900));
    }

    #[test]
    fn test_start_stop_state_machine() {
        let mut scheduler = CommandScheduler::default();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.next_tick_at().is_none());

        let now = Instant::now();
        scheduler.start(now);
        assert_eq!(scheduler.state(), SchedulerState::Armed);
        assert_eq!(scheduler.next_tick_at(), Some(now));

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.next_tick_at().is_none());
    }

    #[test]
    fn test_note_data_received_clears_watchdog_once() {
        let mut scheduler = CommandScheduler::default();
        scheduler.healthy = false;
        assert!(scheduler.note_data_received());
        assert!(!scheduler.note_data_received());
        assert!(scheduler.healthy());
    }

    /// Drive `ticks` scheduler ticks and decode everything emitted
    async fn collect_tick_frames(ticks: usize) -> Vec<Vec<MspFrame>> {
        let (near, far) = tokio::io::duplex(16 * 1024);
        let (mut transport, _events) = crate::transport::Transport::open(Box::new(IoLink(near)));
        let (mut far_read, _far_write) = tokio::io::split(far);

        let mut scheduler = CommandScheduler::default();
        scheduler.start(Instant::now());

        let mut per_tick = Vec::new();
        for _ in 0..ticks {
            scheduler.tick(&mut transport, Instant::now());

            let mut buf = vec![0u8; 4096];
            let n = far_read.read(&mut buf).await.unwrap();
            let mut decoder = FrameDecoder::new();
            decoder.push(&buf[..n]);

            let mut frames = Vec::new();
            while let DecodeStatus::Frame(frame) = decoder.poll() {
                frames.push(frame);
            }
            per_tick.push(frames);
        }
        per_tick
    }

    #[tokio::test]
    async fn test_tick_emits_core_request_set() {
        let ticks = collect_tick_frames(1).await;
        let commands: Vec<u8> = ticks[0].iter().map(|f| f.command).collect();

        assert_eq!(
            commands,
            vec![MSP_STATUS, MSP_RAW_GPS, MSP_ALTITUDE, MSP_ATTITUDE, MSP_ANALOG, crate::msp::protocol::MSP_WP]
        );
    }

    #[tokio::test]
    async fn test_position_request_alternates_every_tick() {
        let ticks = collect_tick_frames(10).await;

        let sequence: Vec<u8> = ticks.iter().map(|frames| frames[1].command).collect();
        for (i, &command) in sequence.iter().enumerate() {
            let expected = if i % 2 == 0 { MSP_RAW_GPS } else { MSP_COMP_GPS };
            assert_eq!(command, expected, "tick {} requested the wrong position frame", i);
        }
    }

    #[tokio::test]
    async fn test_waypoint_slot_alternates_independently() {
        let ticks = collect_tick_frames(4).await;

        let slots: Vec<u8> = ticks.iter().map(|frames| frames[5].payload[0]).collect();
        assert_eq!(slots, vec![WAYPOINT_HOME, WAYPOINT_POSHOLD, WAYPOINT_HOME, WAYPOINT_POSHOLD]);
    }

    struct CountingRegistrant {
        calls: Arc<AtomicUsize>,
        order_log: Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    impl CommandRegistrant for CountingRegistrant {
        fn send_commands(&mut self, transport: &mut Transport) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order_log.lock().unwrap().push(self.tag);
            transport.send(&MspFrame::request(MSP_SET_WP), false);
        }
    }

    #[tokio::test]
    async fn test_registrants_invoked_in_registration_order() {
        let (near, _far) = tokio::io::duplex(16 * 1024);
        let (mut transport, _events) = crate::transport::Transport::open(Box::new(IoLink(near)));

        let calls = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut scheduler = CommandScheduler::default();
        let first = scheduler.register(Box::new(CountingRegistrant {
            calls: Arc::clone(&calls),
            order_log: Arc::clone(&order),
            tag: "first",
        }));
        scheduler.register(Box::new(CountingRegistrant {
            calls: Arc::clone(&calls),
            order_log: Arc::clone(&order),
            tag: "second",
        }));

        scheduler.start(Instant::now());
        scheduler.tick(&mut transport, Instant::now());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

        // Removal between ticks must be safe
        scheduler.unregister(first);
        scheduler.tick(&mut transport, Instant::now());
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first", "second", "second"]
        );
        assert_eq!(scheduler.registrant_count(), 1);
    }

    #[test]
    fn test_pending_resolved_by_matching_response() {
        let mut scheduler = CommandScheduler::default();
        let outcome = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&outcome);
        scheduler.add_pending(MSP_SET_WP, Duration::from_secs(1), Instant::now(), move |ok| {
            *slot.lock().unwrap() = Some(ok);
        });

        scheduler.resolve_pending(MSP_STATUS, true); // unrelated response
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.resolve_pending(MSP_SET_WP, true);
        assert_eq!(*outcome.lock().unwrap(), Some(true));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_pending_settled_with_failure_on_rejection() {
        let mut scheduler = CommandScheduler::default();
        let outcome = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&outcome);
        scheduler.add_pending(MSP_SET_WP, Duration::from_secs(1), Instant::now(), move |ok| {
            *slot.lock().unwrap() = Some(ok);
        });

        // Error-direction reply: the command is settled, not left to
        // time out, and the caller hears about the rejection
        scheduler.resolve_pending(MSP_SET_WP, false);
        assert_eq!(*outcome.lock().unwrap(), Some(false));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_pending_times_out_with_failure() {
        let mut scheduler = CommandScheduler::default();
        let outcome = Arc::new(Mutex::new(None));
        let t0 = Instant::now();

        let slot = Arc::clone(&outcome);
        scheduler.add_pending(MSP_SET_WP, Duration::from_secs(1), t0, move |ok| {
            *slot.lock().unwrap() = Some(ok);
        });

        scheduler.expire_pending(t0 + Duration::from_millis(500));
        assert_eq!(*outcome.lock().unwrap(), None);

        scheduler.expire_pending(t0 + Duration::from_secs(1));
        assert_eq!(*outcome.lock().unwrap(), Some(false));
    }

    #[test]
    fn test_cancel_all_pending_fails_immediately() {
        let mut scheduler = CommandScheduler::default();
        let failed = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&failed);
        scheduler.add_pending(MSP_SET_WP, Duration::from_secs(5), Instant::now(), move |ok| {
            flag.store(!ok, Ordering::SeqCst);
        });

        scheduler.cancel_all_pending();
        assert!(failed.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_next_pending_deadline_is_earliest() {
        let mut scheduler = CommandScheduler::default();
        let t0 = Instant::now();

        scheduler.add_pending(MSP_SET_WP, Duration::from_secs(5), t0, |_| {});
        scheduler.add_pending(crate::msp::protocol::MSP_WP, Duration::from_secs(2), t0, |_| {});

        assert_eq!(scheduler.next_pending_deadline(), Some(t0 + Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_idle_scheduler_emits_nothing() {
        let (near, far) = tokio::io::duplex(1024);
        let (mut transport, _events) = crate::transport::Transport::open(Box::new(IoLink(near)));
        let (mut far_read, _far_write) = tokio::io::split(far);

        let mut scheduler = CommandScheduler::default();
        scheduler.tick(&mut transport, Instant::now());

        // Nothing was flushed; a zero-byte read would block, so check the
        // outbox path instead: a subsequent armed tick emits immediately
        scheduler.start(Instant::now());
        scheduler.tick(&mut transport, Instant::now());
        let mut buf = vec![0u8; 1024];
        let n = far_read.read(&mut buf).await.unwrap();
        assert!(n > 0);
    }
}
