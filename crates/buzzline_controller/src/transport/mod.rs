//! # Bus Transport
//!
//! Send/receive of decoded frames over the shared buzzer bus.
//!
//! ## Design
//!
//! ```text
//!  bus driver context                     tick loop
//!  ──────────────────                     ─────────
//!  RawFrame ─► ReceivePath ─decode─► [bounded queue] ─► poll_inbound()
//!                  │                                     (never blocks)
//!                  └─ press timestamp ─► LatencyBoard
//!
//!  BusEndpoint ◄─ [bounded queue] ◄─encode─ send()
//! ```
//!
//! - No retry queue: a failed send is reported and the caller re-issues on
//!   its own cadence
//! - Malformed frames are counted and discarded
//! - Bus faults travel in-band as [`BusEvent::Alert`]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use buzzline_protocol::{Frame, FrameBody, RawFrame};
use crossbeam_channel::{Receiver, Sender, TryIter, TrySendError};

use crate::error::TransportError;
use crate::latency::LatencyBoard;

/// Bus-level fault conditions reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusAlert {
    /// Bus error counted by the controller hardware.
    BusError {
        /// Errors since the previous alert.
        error_count: u32,
    },
    /// Node entered error-passive state.
    ErrorPassive,
    /// Receive queue overflowed; frames were lost.
    RxQueueFull {
        /// Frames dropped since the previous report.
        missed: u64,
    },
    /// Bus-off recovery started.
    Recovering,
    /// Bus-off recovery completed.
    Recovered,
}

/// Item yielded by [`BusTransport::poll_inbound`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusEvent {
    /// Decoded frame.
    Frame(Frame),
    /// Side-channel fault report.
    Alert(BusAlert),
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames queued for transmission.
    pub frames_sent: u64,
    /// Frames decoded and queued for the tick loop.
    pub frames_received: u64,
    /// Sends rejected (saturated or down).
    pub send_errors: u64,
    /// Inbound frames that failed to decode.
    pub malformed_dropped: u64,
    /// Inbound frames lost to a full queue.
    pub rx_missed: u64,
}

/// Physical bus abstraction driven by the tick loop.
pub trait BusTransport {
    /// Iterator returned by [`BusTransport::poll_inbound`].
    type Inbound<'a>: Iterator<Item = BusEvent>
    where
        Self: 'a;

    /// Encodes and queues a frame.
    ///
    /// # Errors
    ///
    /// [`TransportError::Saturated`] if the transmit queue is full,
    /// [`TransportError::BusDown`] if the driver is gone.
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Returns what was received since the last call. Never blocks and
    /// always terminates.
    fn poll_inbound(&mut self) -> Self::Inbound<'_>;

    /// Discards everything queued inbound. Returns the number dropped.
    fn flush(&mut self) -> usize;

    /// Current counters.
    fn stats(&self) -> TransportStats;
}

/// Sends `frame`, logging instead of propagating a failure.
pub(crate) fn send_or_log<B: BusTransport>(bus: &mut B, frame: &Frame) -> bool {
    match bus.send(frame) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                error = %err,
                address = ?frame.address,
                intent = ?frame.intent(),
                "bus send failed"
            );
            false
        }
    }
}

/// Counters shared with the receive path.
#[derive(Debug, Default)]
struct SharedStats {
    frames_received: AtomicU64,
    malformed_dropped: AtomicU64,
    rx_missed: AtomicU64,
    /// Missed since the last overflow alert was handed out.
    rx_missed_unreported: AtomicU64,
}

/// Channel-backed [`BusTransport`].
///
/// The driver side is a [`BusEndpoint`], which may live on another thread.
pub struct ChannelBus {
    outbound: Sender<RawFrame>,
    inbound: Receiver<BusEvent>,
    shared: Arc<SharedStats>,
    frames_sent: u64,
    send_errors: u64,
}

impl ChannelBus {
    /// Creates a connected bus and driver endpoint with `capacity` slots in
    /// each direction.
    #[must_use]
    pub fn pair(capacity: usize, board: Arc<LatencyBoard>) -> (Self, BusEndpoint) {
        let (out_tx, out_rx) = crossbeam_channel::bounded(capacity);
        let (in_tx, in_rx) = crossbeam_channel::bounded(capacity);
        let shared = Arc::new(SharedStats::default());

        let bus = Self {
            outbound: out_tx,
            inbound: in_rx,
            shared: Arc::clone(&shared),
            frames_sent: 0,
            send_errors: 0,
        };
        let endpoint = BusEndpoint {
            outbound: out_rx,
            receive: ReceivePath {
                inbound: in_tx,
                board,
                shared,
            },
        };
        (bus, endpoint)
    }
}

/// Inbound iterator for [`ChannelBus`].
pub struct ChannelInbound<'a> {
    overflow: Option<BusAlert>,
    queued: std::iter::Take<TryIter<'a, BusEvent>>,
}

impl Iterator for ChannelInbound<'_> {
    type Item = BusEvent;

    fn next(&mut self) -> Option<BusEvent> {
        self.overflow.take().map(BusEvent::Alert).or_else(|| self.queued.next())
    }
}

impl BusTransport for ChannelBus {
    type Inbound<'a> = ChannelInbound<'a>;

    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        match self.outbound.try_send(frame.encode()) {
            Ok(()) => {
                self.frames_sent += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.send_errors += 1;
                Err(TransportError::Saturated)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.send_errors += 1;
                Err(TransportError::BusDown)
            }
        }
    }

    fn poll_inbound(&mut self) -> ChannelInbound<'_> {
        let missed = self.shared.rx_missed_unreported.swap(0, Ordering::AcqRel);
        // Bounded by what is queued now so a chatty bus cannot stall a tick.
        let available = self.inbound.len();
        ChannelInbound {
            overflow: (missed > 0).then_some(BusAlert::RxQueueFull { missed }),
            queued: self.inbound.try_iter().take(available),
        }
    }

    fn flush(&mut self) -> usize {
        self.inbound.try_iter().count()
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            frames_sent: self.frames_sent,
            frames_received: self.shared.frames_received.load(Ordering::Relaxed),
            send_errors: self.send_errors,
            malformed_dropped: self.shared.malformed_dropped.load(Ordering::Relaxed),
            rx_missed: self.shared.rx_missed.load(Ordering::Relaxed),
        }
    }
}

/// Receive side of the bus, handed to the driver context.
#[derive(Clone)]
pub struct ReceivePath {
    inbound: Sender<BusEvent>,
    board: Arc<LatencyBoard>,
    shared: Arc<SharedStats>,
}

impl ReceivePath {
    /// Decodes a raw frame and queues it for the tick loop.
    ///
    /// A press carrying a timestamp publishes it to the latency board before
    /// the frame is queued. Returns false if the frame was discarded.
    pub fn deliver(&self, raw: &RawFrame) -> bool {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                self.shared.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    error = %err,
                    identifier = raw.identifier,
                    "malformed frame discarded"
                );
                return false;
            }
        };

        if let (Some(id), FrameBody::Press { nonce, latency_ms: Some(latency) }) =
            (frame.sender(), frame.body)
        {
            self.board.publish(id, nonce, latency);
        }

        self.enqueue(BusEvent::Frame(frame))
    }

    /// Reads a raw frame from an adapter buffer and delivers it.
    pub fn deliver_bytes(&self, bytes: &[u8]) -> bool {
        match RawFrame::from_bytes(bytes) {
            Ok(raw) => self.deliver(&raw),
            Err(err) => {
                self.shared.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(error = %err, "adapter buffer discarded");
                false
            }
        }
    }

    /// Queues a fault report.
    pub fn report_alert(&self, alert: BusAlert) -> bool {
        self.enqueue(BusEvent::Alert(alert))
    }

    fn enqueue(&self, event: BusEvent) -> bool {
        match self.inbound.try_send(event) {
            Ok(()) => {
                if matches!(event, BusEvent::Frame(_)) {
                    self.shared.frames_received.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                self.shared.rx_missed.fetch_add(1, Ordering::Relaxed);
                self.shared.rx_missed_unreported.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Driver side of a [`ChannelBus`].
pub struct BusEndpoint {
    outbound: Receiver<RawFrame>,
    receive: ReceivePath,
}

impl BusEndpoint {
    /// Returns a handle for delivering received traffic.
    #[must_use]
    pub fn receive_path(&self) -> ReceivePath {
        self.receive.clone()
    }

    /// Delivers a frame as if it arrived from the bus.
    pub fn deliver(&self, frame: &Frame) -> bool {
        self.receive.deliver(&frame.encode())
    }

    /// Takes the next transmitted frame.
    #[must_use]
    pub fn try_recv_outbound(&self) -> Option<RawFrame> {
        self.outbound.try_recv().ok()
    }

    /// Takes every transmitted frame.
    #[must_use]
    pub fn drain_outbound(&self) -> Vec<RawFrame> {
        self.outbound.try_iter().collect()
    }

    /// Takes every transmitted frame that decodes.
    #[must_use]
    pub fn drain_outbound_frames(&self) -> Vec<Frame> {
        self.outbound
            .try_iter()
            .filter_map(|raw| Frame::decode(&raw).ok())
            .collect()
    }
}
