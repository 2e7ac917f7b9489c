//! # Transport Channel Module
//!
//! Owns the byte-level connection to the flight controller.
//!
//! This module handles:
//! - Spawning the I/O task that reads bytes and decodes frames
//! - Handing decoded frames back to the single logical engine context
//! - Batched sends (`flush = false`) to cut per-frame transport overhead
//! - Round-trip latency sampling between a request and its response
//! - A one-shot `connected` transition on link loss, with no auto-reconnect

pub mod link;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::msp::decoder::{DecodeStatus, FrameDecoder};
use crate::msp::encoder::encode_frame;
use crate::msp::protocol::{Direction, MspFrame};

pub use link::{ByteLink, IoLink, SerialByteLink, MSP_BAUD_RATE};

/// Smoothing factor for the latency exponential moving average
const LATENCY_SMOOTHING: f64 = 0.3;

/// Read buffer size for the I/O task
const READ_BUFFER_SIZE: usize = 1024;

/// Events delivered from the I/O task to the engine context
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded, checksum-valid inbound frame
    Frame(MspFrame),

    /// The underlying link is gone; delivered exactly once
    Closed,
}

#[derive(Debug, Default)]
struct SharedInner {
    connected: bool,
    latency: Duration,
    has_latency_sample: bool,
    last_data_at: Option<Instant>,
    request_sent_at: HashMap<u8, Instant>,
}

/// Connection state shared between the I/O task and the engine
#[derive(Debug, Default)]
pub(crate) struct LinkShared {
    inner: Mutex<SharedInner>,
}

impl LinkShared {
    fn new_connected() -> Self {
        Self {
            inner: Mutex::new(SharedInner {
                connected: true,
                ..Default::default()
            }),
        }
    }

    /// Record that a request went out, for latency pairing.
    ///
    /// An already-outstanding request for the same command keeps its
    /// original timestamp so a burst of identical requests does not skew
    /// the sample low.
    fn note_request(&self, command: u8, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.request_sent_at.entry(command).or_insert(now);
    }

    /// Record inbound data; pairs responses with outstanding requests and
    /// folds the round trip into the smoothed latency estimate
    fn note_frame(&self, command: u8, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_data_at = Some(now);

        if let Some(sent_at) = inner.request_sent_at.remove(&command) {
            let sample = now.saturating_duration_since(sent_at);
            if inner.has_latency_sample {
                let smoothed = inner.latency.as_secs_f64() * (1.0 - LATENCY_SMOOTHING)
                    + sample.as_secs_f64() * LATENCY_SMOOTHING;
                inner.latency = Duration::from_secs_f64(smoothed);
            } else {
                inner.latency = sample;
                inner.has_latency_sample = true;
            }
        }
    }

    /// Returns true only on the first call, so the disconnect transition
    /// is observed exactly once
    fn mark_disconnected(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let was_connected = inner.connected;
        inner.connected = false;
        inner.request_sent_at.clear();
        was_connected
    }

    fn connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn latency(&self) -> Duration {
        self.inner.lock().unwrap().latency
    }

    fn last_data_at(&self) -> Option<Instant> {
        self.inner.lock().unwrap().last_data_at
    }
}

enum Outbound {
    Bytes(Vec<u8>),
    Shutdown,
}

/// Transport channel over a [`ByteLink`]
///
/// Created on open, destroyed on close. Decoded frames arrive on the
/// receiver returned by [`Transport::open`]; the engine is the single
/// consumer, so frames reach the vehicle state store in receive order.
pub struct Transport {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    shared: Arc<LinkShared>,
    outbox: Vec<u8>,
    io_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.connected())
            .field("outbox_len", &self.outbox.len())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Open the channel over a link, spawning the I/O task
    ///
    /// # Returns
    ///
    /// The transport handle plus the inbound event stream. The stream
    /// yields [`TransportEvent::Closed`] exactly once when the link dies
    /// or the channel is closed.
    pub fn open(link: Box<dyn ByteLink>) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LinkShared::new_connected());

        let io_task = tokio::spawn(io_loop(link, Arc::clone(&shared), event_tx, outbound_rx));

        (
            Self {
                outbound_tx,
                shared,
                outbox: Vec::new(),
                io_task: Some(io_task),
            },
            event_rx,
        )
    }

    /// Queue a frame for sending
    ///
    /// With `flush = false` the frame is batched into the outbox and only
    /// hits the wire on the next flushing send; `flush = true` transmits
    /// the whole batch in a single underlying write. Time-sensitive
    /// commands should flush.
    pub fn send(&mut self, frame: &MspFrame, flush: bool) {
        if !self.connected() {
            trace!("dropping send of 0x{:02X}: link not connected", frame.command);
            return;
        }

        if frame.direction == Direction::Request {
            self.shared.note_request(frame.command, Instant::now());
        }
        self.outbox.extend_from_slice(&encode_frame(frame));

        if flush {
            self.flush_outbox();
        }
    }

    /// Transmit any batched frames now
    pub fn flush_outbox(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.outbox);
        // Ignore a send failure here: the I/O task exiting is reported
        // through TransportEvent::Closed.
        let _ = self.outbound_tx.send(Outbound::Bytes(batch));
    }

    /// Whether the underlying link is still up
    pub fn connected(&self) -> bool {
        self.shared.connected()
    }

    /// Smoothed round-trip latency estimate
    pub fn latency(&self) -> Duration {
        self.shared.latency()
    }

    /// When the last inbound data was observed, if any
    pub fn last_data_at(&self) -> Option<Instant> {
        self.shared.last_data_at()
    }

    /// Close the channel
    ///
    /// Idempotent and safe to call from a terminating or backgrounding
    /// path. Reconnection is the caller's decision, never the transport's.
    pub fn close(&mut self) {
        if let Some(task) = self.io_task.take() {
            debug!("closing transport channel");
            let _ = self.outbound_tx.send(Outbound::Shutdown);
            drop(task); // the I/O task exits on the shutdown message
        }
        self.outbox.clear();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// The I/O task: the only place that touches the link.
///
/// Reads are decoded incrementally; framing errors are recovered locally
/// by resynchronization and never surfaced beyond a trace log.
async fn io_loop(
    mut link: Box<dyn ByteLink>,
    shared: Arc<LinkShared>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    enum IoStep {
        Outbound(Option<Outbound>),
        Inbound(std::io::Result<usize>),
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        // Resolve the select first so the read future releases the link
        // before any write happens
        let step = tokio::select! {
            outbound = outbound_rx.recv() => IoStep::Outbound(outbound),
            result = link.read(&mut buf) => IoStep::Inbound(result),
        };

        match step {
            IoStep::Outbound(Some(Outbound::Bytes(bytes))) => {
                if let Err(e) = link.write_all(&bytes).await {
                    warn!("link write failed: {}", e);
                    break;
                }
                if let Err(e) = link.flush().await {
                    warn!("link flush failed: {}", e);
                    break;
                }
                trace!("sent batch of {} bytes", bytes.len());
            }
            IoStep::Outbound(Some(Outbound::Shutdown)) | IoStep::Outbound(None) => break,
            IoStep::Inbound(Ok(0)) => {
                debug!("link closed by peer");
                break;
            }
            IoStep::Inbound(Ok(n)) => {
                decoder.push(&buf[..n]);
                drain_decoder(&mut decoder, &shared, &event_tx);
            }
            IoStep::Inbound(Err(e)) => {
                warn!("link read failed: {}", e);
                break;
            }
        }
    }

    if shared.mark_disconnected() {
        let _ = event_tx.send(TransportEvent::Closed);
    }
}

fn drain_decoder(
    decoder: &mut FrameDecoder,
    shared: &LinkShared,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        match decoder.poll() {
            DecodeStatus::Frame(frame) => {
                shared.note_frame(frame.command, Instant::now());
                let _ = event_tx.send(TransportEvent::Frame(frame));
            }
            DecodeStatus::Invalid => {
                trace!("skipped corrupt bytes ({} framing errors)", decoder.framing_errors());
            }
            DecodeStatus::NeedMoreData => break,
        }
    }
}
