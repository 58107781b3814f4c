//! # Peripheral Registry & Presence Monitor
//!
//! Owns one [`Peripheral`] record per configured buzzer. Presence is never
//! stored as a flag: `online` is computed from `last_seen_at` on every query.
//!
//! ## Design
//!
//! ```text
//!   frame ──► on_frame_received ──► last_seen_at, presence edge
//!         └─► record_press ───────► nonce check ──► pending press queue
//!                                                        │
//!                          RoundArbitrator::resolve ◄────┘
//! ```
//!
//! - Entries are created at configuration and live for the whole process
//! - Round flags are reset by [`PeripheralRegistry::reset_round_flags`]
//! - Pending presses keep arrival order across peripherals

use std::collections::BTreeMap;

use buzzline_protocol::{Frame, PeripheralId};

use crate::clock::Timestamp;

/// Where a recorded latency came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatencySource {
    /// Embedded timestamp from the peripheral's own clock.
    Peripheral,
    /// Measured locally while the authoritative timestamp is outstanding.
    Provisional,
    /// Operator-simulated press, measured locally.
    Operator,
}

/// Measured press latency for the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PressLatency {
    /// Milliseconds since the round's arming instant.
    pub ms: u32,
    /// Provenance.
    pub source: LatencySource,
}

impl PressLatency {
    /// Latency reported by the peripheral itself.
    #[must_use]
    pub const fn peripheral(ms: u32) -> Self {
        Self {
            ms,
            source: LatencySource::Peripheral,
        }
    }

    /// Locally measured stand-in for an outstanding timestamp.
    #[must_use]
    pub const fn provisional(ms: u32) -> Self {
        Self {
            ms,
            source: LatencySource::Provisional,
        }
    }

    /// Locally measured operator press.
    #[must_use]
    pub const fn operator(ms: u32) -> Self {
        Self {
            ms,
            source: LatencySource::Operator,
        }
    }
}

/// What produced a press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressOrigin {
    /// A press frame on the bus.
    Bus {
        /// Nonce carried by the frame.
        nonce: u8,
    },
    /// The operator's simulated press.
    Operator,
}

/// A press waiting for the arbitrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPress {
    /// Who pressed.
    pub id: PeripheralId,
    /// What produced it.
    pub origin: PressOrigin,
    /// Whether the peripheral was armed when the press arrived.
    pub while_armed: bool,
    /// Local arrival time.
    pub received_at: Timestamp,
    /// Arrival sequence number.
    pub order: u64,
}

/// Outcome of [`PeripheralRegistry::record_press`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressDisposition {
    /// Queued for arbitration.
    Accepted,
    /// Same nonce as the last processed press.
    Duplicate,
    /// First frame after being offline; not trusted.
    Untrusted,
    /// Id was never registered.
    Unknown,
}

/// Online/offline transition observed by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceChange {
    /// Peripheral concerned.
    pub id: PeripheralId,
    /// New state.
    pub online: bool,
    /// When the transition was observed.
    pub at: Timestamp,
}

/// One known buzzer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peripheral {
    /// Stable identity.
    pub id: PeripheralId,
    /// Participates in the current match.
    pub eligible: bool,
    /// Most recent frame from this id.
    pub last_seen_at: Option<Timestamp>,
    /// Sole legitimate scorer of the current round.
    pub armed: bool,
    /// A press was recorded this round, legal or not.
    pub pressed: bool,
    /// Latency of the scoring press.
    pub press_latency: Option<PressLatency>,
    /// Nonce of the most recently processed press.
    pub last_press_nonce: Option<u8>,
    /// Last nonce processed before the current round began.
    carried_nonce: Option<u8>,
    /// Peripheral was already online when its latest frame arrived.
    trusted_link: bool,
    /// Last state handed out as a [`PresenceChange`].
    reported_online: bool,
}

impl Peripheral {
    fn new(id: PeripheralId, eligible: bool) -> Self {
        Self {
            id,
            eligible,
            last_seen_at: None,
            armed: false,
            pressed: false,
            press_latency: None,
            last_press_nonce: None,
            carried_nonce: None,
            trusted_link: false,
            reported_online: false,
        }
    }

    /// True iff a frame arrived within `window_ms` before `now`.
    #[inline]
    #[must_use]
    pub fn is_online(&self, now: Timestamp, window_ms: u64) -> bool {
        self.last_seen_at
            .is_some_and(|seen| now.millis_since(seen) < window_ms)
    }

    fn reset_round_flags(&mut self) {
        self.armed = false;
        self.pressed = false;
        self.press_latency = None;
        if let Some(nonce) = self.last_press_nonce.take() {
            self.carried_nonce = Some(nonce);
        }
    }

    /// Retransmissions of the previous round's last press are duplicates too.
    fn is_duplicate(&self, nonce: u8) -> bool {
        self.last_press_nonce == Some(nonce) || self.carried_nonce == Some(nonce)
    }
}

/// Registry of every configured buzzer.
#[derive(Debug)]
pub struct PeripheralRegistry {
    peripherals: BTreeMap<PeripheralId, Peripheral>,
    liveness_window_ms: u64,
    trust_press_without_liveness: bool,
    pending: Vec<PendingPress>,
    next_order: u64,
}

impl PeripheralRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(liveness_window_ms: u64, trust_press_without_liveness: bool) -> Self {
        Self {
            peripherals: BTreeMap::new(),
            liveness_window_ms,
            trust_press_without_liveness,
            pending: Vec::new(),
            next_order: 0,
        }
    }

    /// Registers a buzzer. Registering an existing id only updates its
    /// eligibility.
    pub fn register_peripheral(&mut self, id: PeripheralId, eligible: bool) {
        self.peripherals
            .entry(id)
            .and_modify(|p| p.eligible = eligible)
            .or_insert_with(|| Peripheral::new(id, eligible));
    }

    /// Changes match participation. Returns false for unknown ids.
    pub fn set_eligible(&mut self, id: PeripheralId, eligible: bool) -> bool {
        match self.peripherals.get_mut(&id) {
            Some(p) => {
                if p.eligible != eligible {
                    tracing::info!(peripheral = %id, eligible, "eligibility changed");
                }
                p.eligible = eligible;
                true
            }
            None => false,
        }
    }

    /// Liveness window in milliseconds.
    #[inline]
    #[must_use]
    pub const fn liveness_window_ms(&self) -> u64 {
        self.liveness_window_ms
    }

    /// Looks up a peripheral.
    #[must_use]
    pub fn get(&self, id: PeripheralId) -> Option<&Peripheral> {
        self.peripherals.get(&id)
    }

    /// Iterates over peripherals in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Peripheral> {
        self.peripherals.values()
    }

    /// Number of registered peripherals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Updates liveness for the frame's sender.
    ///
    /// Returns an online edge when the sender was not reported online
    /// before. Frames from unregistered ids and controller-originated
    /// frames are ignored.
    pub fn on_frame_received(&mut self, frame: &Frame, now: Timestamp) -> Option<PresenceChange> {
        let id = frame.sender()?;
        let window = self.liveness_window_ms;
        let Some(peripheral) = self.peripherals.get_mut(&id) else {
            tracing::debug!(peripheral = %id, "frame from unregistered id ignored");
            return None;
        };

        peripheral.trusted_link = peripheral.is_online(now, window);
        peripheral.last_seen_at = Some(now);

        if peripheral.reported_online {
            return None;
        }
        peripheral.reported_online = true;
        tracing::info!(peripheral = %id, "peripheral online");
        Some(PresenceChange {
            id,
            online: true,
            at: now,
        })
    }

    /// `now - last_seen_at < window`; false if nothing was ever received.
    #[must_use]
    pub fn is_online(&self, id: PeripheralId, now: Timestamp) -> bool {
        self.peripherals
            .get(&id)
            .is_some_and(|p| p.is_online(now, self.liveness_window_ms))
    }

    /// Reports peripherals whose liveness window has lapsed since the last
    /// call.
    pub fn refresh_presence(&mut self, now: Timestamp) -> Vec<PresenceChange> {
        let window = self.liveness_window_ms;
        let mut changes = Vec::new();
        for peripheral in self.peripherals.values_mut() {
            if peripheral.reported_online && !peripheral.is_online(now, window) {
                peripheral.reported_online = false;
                tracing::info!(peripheral = %peripheral.id, "peripheral offline");
                changes.push(PresenceChange {
                    id: peripheral.id,
                    online: false,
                    at: now,
                });
            }
        }
        changes
    }

    /// Records a press frame. Must follow [`Self::on_frame_received`] for
    /// the same frame.
    pub fn record_press(
        &mut self,
        id: PeripheralId,
        nonce: u8,
        now: Timestamp,
    ) -> PressDisposition {
        let trust_first_frame = self.trust_press_without_liveness;
        let Some(peripheral) = self.peripherals.get_mut(&id) else {
            return PressDisposition::Unknown;
        };

        if peripheral.is_duplicate(nonce) {
            tracing::trace!(peripheral = %id, nonce, "duplicate press suppressed");
            return PressDisposition::Duplicate;
        }
        peripheral.last_press_nonce = Some(nonce);

        if !peripheral.trusted_link && !trust_first_frame {
            tracing::debug!(peripheral = %id, nonce, "press without prior liveness ignored");
            return PressDisposition::Untrusted;
        }

        peripheral.pressed = true;
        let while_armed = peripheral.armed;
        self.push_pending(id, PressOrigin::Bus { nonce }, while_armed, now);
        PressDisposition::Accepted
    }

    /// Records the operator's simulated press on behalf of `id`.
    pub fn record_operator_press(&mut self, id: PeripheralId, now: Timestamp) -> bool {
        let Some(peripheral) = self.peripherals.get_mut(&id) else {
            return false;
        };
        peripheral.pressed = true;
        let while_armed = peripheral.armed;
        self.push_pending(id, PressOrigin::Operator, while_armed, now);
        true
    }

    fn push_pending(
        &mut self,
        id: PeripheralId,
        origin: PressOrigin,
        while_armed: bool,
        now: Timestamp,
    ) {
        self.pending.push(PendingPress {
            id,
            origin,
            while_armed,
            received_at: now,
            order: self.next_order,
        });
        self.next_order += 1;
    }

    /// Removes and returns unprocessed presses in arrival order.
    pub fn take_pending_presses(&mut self) -> Vec<PendingPress> {
        let mut presses = std::mem::take(&mut self.pending);
        presses.sort_by_key(|p| p.order);
        presses
    }

    /// True if presses are waiting for arbitration.
    #[must_use]
    pub fn has_pending_presses(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Clears per-round flags on every peripheral and drops pending presses.
    pub fn reset_round_flags(&mut self) {
        for peripheral in self.peripherals.values_mut() {
            peripheral.reset_round_flags();
        }
        self.pending.clear();
    }

    /// Arms `id` and disarms everyone else. Returns false for unknown ids.
    pub fn arm(&mut self, id: PeripheralId) -> bool {
        if !self.peripherals.contains_key(&id) {
            return false;
        }
        for peripheral in self.peripherals.values_mut() {
            peripheral.armed = peripheral.id == id;
        }
        true
    }

    /// Disarms every peripheral.
    pub fn disarm_all(&mut self) {
        for peripheral in self.peripherals.values_mut() {
            peripheral.armed = false;
        }
    }

    /// The currently armed peripheral, if any.
    #[must_use]
    pub fn armed(&self) -> Option<PeripheralId> {
        self.peripherals.values().find(|p| p.armed).map(|p| p.id)
    }

    /// Number of peripherals taking part in the match, online or not.
    #[must_use]
    pub fn eligible_count(&self) -> usize {
        self.peripherals.values().filter(|p| p.eligible).count()
    }

    /// Peripherals that may be armed right now, in id order.
    #[must_use]
    pub fn arming_candidates(&self, now: Timestamp, require_online: bool) -> Vec<PeripheralId> {
        self.peripherals
            .values()
            .filter(|p| p.eligible)
            .filter(|p| !require_online || p.is_online(now, self.liveness_window_ms))
            .map(|p| p.id)
            .collect()
    }

    /// Stores the scoring latency for `id`.
    pub fn set_press_latency(&mut self, id: PeripheralId, latency: PressLatency) {
        if let Some(peripheral) = self.peripherals.get_mut(&id) {
            peripheral.press_latency = Some(latency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeripheralRegistry {
        let mut registry = PeripheralRegistry::new(1000, false);
        for id in 1..=4 {
            registry.register_peripheral(PeripheralId(id), true);
        }
        registry
    }

    fn seen(registry: &mut PeripheralRegistry, id: u8, at: u64) -> Option<PresenceChange> {
        registry.on_frame_received(&Frame::presence(PeripheralId(id)), Timestamp(at))
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = registry();
        registry.register_peripheral(PeripheralId(2), false);
        assert_eq!(registry.len(), 4);
        assert!(!registry.get(PeripheralId(2)).unwrap().eligible);
    }

    #[test]
    fn test_never_seen_is_offline() {
        let registry = registry();
        assert!(!registry.is_online(PeripheralId(1), Timestamp(0)));
        assert!(!registry.is_online(PeripheralId(99), Timestamp(0)));
    }

    #[test]
    fn test_liveness_window_boundary() {
        let mut registry = registry();
        let edge = seen(&mut registry, 2, 100);
        assert_eq!(
            edge,
            Some(PresenceChange {
                id: PeripheralId(2),
                online: true,
                at: Timestamp(100),
            })
        );
        assert!(registry.is_online(PeripheralId(2), Timestamp(1099)));
        assert!(!registry.is_online(PeripheralId(2), Timestamp(1100)));
    }

    #[test]
    fn test_offline_edge_reported_once() {
        let mut registry = registry();
        seen(&mut registry, 1, 0);
        assert!(seen(&mut registry, 1, 500).is_none());
        assert!(registry.refresh_presence(Timestamp(900)).is_empty());

        let changes = registry.refresh_presence(Timestamp(1500));
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].online);
        assert!(registry.refresh_presence(Timestamp(1600)).is_empty());

        // Coming back is a fresh online edge.
        assert!(seen(&mut registry, 1, 1700).is_some());
    }

    #[test]
    fn test_duplicate_nonce_counted_once() {
        let mut registry = registry();
        seen(&mut registry, 3, 0);
        let press = Frame::press(PeripheralId(3), 9, None);
        registry.on_frame_received(&press, Timestamp(10));
        assert_eq!(
            registry.record_press(PeripheralId(3), 9, Timestamp(10)),
            PressDisposition::Accepted
        );
        registry.on_frame_received(&press, Timestamp(12));
        assert_eq!(
            registry.record_press(PeripheralId(3), 9, Timestamp(12)),
            PressDisposition::Duplicate
        );
        assert_eq!(registry.take_pending_presses().len(), 1);
    }

    #[test]
    fn test_press_as_first_frame_is_untrusted() {
        let mut registry = registry();
        let press = Frame::press(PeripheralId(1), 1, None);
        registry.on_frame_received(&press, Timestamp(5000));
        assert_eq!(
            registry.record_press(PeripheralId(1), 1, Timestamp(5000)),
            PressDisposition::Untrusted
        );
        assert!(!registry.get(PeripheralId(1)).unwrap().pressed);

        // The retransmission of the stale press stays suppressed.
        registry.on_frame_received(&press, Timestamp(5010));
        assert_eq!(
            registry.record_press(PeripheralId(1), 1, Timestamp(5010)),
            PressDisposition::Duplicate
        );

        // A new press after the link is established counts.
        registry.on_frame_received(&Frame::press(PeripheralId(1), 2, None), Timestamp(5020));
        assert_eq!(
            registry.record_press(PeripheralId(1), 2, Timestamp(5020)),
            PressDisposition::Accepted
        );
    }

    #[test]
    fn test_trust_flag_accepts_first_frame_press() {
        let mut registry = PeripheralRegistry::new(1000, true);
        registry.register_peripheral(PeripheralId(1), true);
        registry.on_frame_received(&Frame::press(PeripheralId(1), 1, None), Timestamp(0));
        assert_eq!(
            registry.record_press(PeripheralId(1), 1, Timestamp(0)),
            PressDisposition::Accepted
        );
    }

    #[test]
    fn test_unknown_press() {
        let mut registry = registry();
        assert_eq!(
            registry.record_press(PeripheralId(42), 1, Timestamp(0)),
            PressDisposition::Unknown
        );
    }

    #[test]
    fn test_single_armed_peripheral() {
        let mut registry = registry();
        assert!(registry.arm(PeripheralId(1)));
        assert!(registry.arm(PeripheralId(3)));
        assert_eq!(registry.armed(), Some(PeripheralId(3)));
        assert_eq!(registry.iter().filter(|p| p.armed).count(), 1);
        assert!(!registry.arm(PeripheralId(9)));
        assert_eq!(registry.armed(), Some(PeripheralId(3)));
        registry.disarm_all();
        assert_eq!(registry.armed(), None);
    }

    #[test]
    fn test_arming_candidates_filter() {
        let mut registry = registry();
        seen(&mut registry, 1, 0);
        seen(&mut registry, 2, 0);
        registry.set_eligible(PeripheralId(2), false);

        let now = Timestamp(100);
        assert_eq!(registry.arming_candidates(now, true), vec![PeripheralId(1)]);
        assert_eq!(
            registry.arming_candidates(now, false),
            vec![PeripheralId(1), PeripheralId(3), PeripheralId(4)]
        );
    }

    #[test]
    fn test_reset_round_flags() {
        let mut registry = registry();
        seen(&mut registry, 2, 0);
        registry.arm(PeripheralId(2));
        registry.on_frame_received(&Frame::press(PeripheralId(2), 4, None), Timestamp(10));
        registry.record_press(PeripheralId(2), 4, Timestamp(10));
        registry.set_press_latency(PeripheralId(2), PressLatency::provisional(10));

        registry.reset_round_flags();
        let p = registry.get(PeripheralId(2)).unwrap();
        assert!(!p.armed && !p.pressed);
        assert_eq!(p.press_latency, None);
        assert_eq!(p.last_press_nonce, None);
        assert_eq!(p.last_seen_at, Some(Timestamp(10)));
        assert!(!registry.has_pending_presses());
    }

    #[test]
    fn test_retransmission_across_round_boundary() {
        let mut registry = registry();
        seen(&mut registry, 2, 0);
        registry.on_frame_received(&Frame::press(PeripheralId(2), 4, None), Timestamp(10));
        registry.record_press(PeripheralId(2), 4, Timestamp(10));
        registry.reset_round_flags();

        let retransmitted = Frame::press(PeripheralId(2), 4, Some(90));
        registry.on_frame_received(&retransmitted, Timestamp(20));
        assert_eq!(
            registry.record_press(PeripheralId(2), 4, Timestamp(20)),
            PressDisposition::Duplicate
        );
        registry.on_frame_received(&Frame::press(PeripheralId(2), 5, None), Timestamp(30));
        assert_eq!(
            registry.record_press(PeripheralId(2), 5, Timestamp(30)),
            PressDisposition::Accepted
        );

        // Still a duplicate after this round's own press.
        registry.on_frame_received(&retransmitted, Timestamp(40));
        assert_eq!(
            registry.record_press(PeripheralId(2), 4, Timestamp(40)),
            PressDisposition::Duplicate
        );
    }
}
