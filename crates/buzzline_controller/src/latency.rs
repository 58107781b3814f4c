//! # Latency Handoff
//!
//! The bus receive path may run on a different thread from the tick loop.
//! Authoritative press latencies cross over through [`LatencyCell`]s: a
//! single `AtomicU64` packing the press nonce with the latency, plus an
//! explicit unset sentinel so a real zero latency is never mistaken for
//! "nothing arrived yet". [`LatencyBoard`] keeps a small ring of cells per
//! peripheral, indexed by nonce.
//!
//! ```text
//!   bit 63 ........ 32 31 ........ 0
//!       nonce (u8)       latency ms
//!   u64::MAX = unset
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use buzzline_protocol::PeripheralId;

const UNSET: u64 = u64::MAX;

#[inline]
const fn pack(nonce: u8, latency_ms: u32) -> u64 {
    ((nonce as u64) << 32) | latency_ms as u64
}

#[inline]
const fn unpack(slot: u64) -> (u8, u32) {
    ((slot >> 32) as u8, slot as u32)
}

/// Single-writer, single-reader latency slot.
#[derive(Debug)]
pub struct LatencyCell {
    slot: AtomicU64,
}

impl LatencyCell {
    /// Creates an unset cell.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: AtomicU64::new(UNSET),
        }
    }

    /// Publishes the peripheral-reported latency of press `nonce`,
    /// replacing whatever was there.
    #[inline]
    pub fn publish(&self, nonce: u8, latency_ms: u32) {
        self.slot.store(pack(nonce, latency_ms), Ordering::Release);
    }

    /// Consumes the latency for press `nonce`, if it has arrived.
    pub fn take(&self, nonce: u8) -> Option<u32> {
        let mut current = self.slot.load(Ordering::Acquire);
        loop {
            if current == UNSET {
                return None;
            }
            let (stored_nonce, latency) = unpack(current);
            if stored_nonce != nonce {
                return None;
            }
            match self
                .slot
                .compare_exchange(current, UNSET, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(latency),
                Err(actual) => current = actual,
            }
        }
    }

    /// Reads the latency for press `nonce` without consuming it.
    #[must_use]
    pub fn peek(&self, nonce: u8) -> Option<u32> {
        let current = self.slot.load(Ordering::Acquire);
        if current == UNSET {
            return None;
        }
        let (stored_nonce, latency) = unpack(current);
        (stored_nonce == nonce).then_some(latency)
    }

    /// Resets to unset.
    pub fn clear(&self) {
        self.slot.store(UNSET, Ordering::Release);
    }
}

impl Default for LatencyCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Cells per peripheral. A nonce lands in slot `nonce % LATENCY_SLOTS`.
pub const LATENCY_SLOTS: usize = 8;

/// A ring of [`LatencyCell`]s per configured peripheral.
///
/// Several presses from one peripheral can be outstanding at once (the
/// current round's press next to a late retransmission of the previous
/// one), so each nonce gets its own slot. A slot is only reused by a nonce
/// [`LATENCY_SLOTS`] presses later.
///
/// The set of cells is fixed at construction, so the board is shared via
/// `Arc` without a lock.
#[derive(Debug, Default)]
pub struct LatencyBoard {
    cells: HashMap<PeripheralId, [LatencyCell; LATENCY_SLOTS]>,
}

impl LatencyBoard {
    /// Creates a board with a ring of cells for each id.
    pub fn new(ids: impl IntoIterator<Item = PeripheralId>) -> Self {
        Self {
            cells: ids
                .into_iter()
                .map(|id| (id, std::array::from_fn(|_| LatencyCell::new())))
                .collect(),
        }
    }

    /// Publishes a latency. Returns false if `id` has no cells.
    pub fn publish(&self, id: PeripheralId, nonce: u8, latency_ms: u32) -> bool {
        match self.cell(id, nonce) {
            Some(cell) => {
                cell.publish(nonce, latency_ms);
                true
            }
            None => false,
        }
    }

    /// Consumes the latency for `id`'s press `nonce`.
    pub fn take(&self, id: PeripheralId, nonce: u8) -> Option<u32> {
        self.cell(id, nonce)?.take(nonce)
    }

    /// Returns the cell that holds `id`'s press `nonce`.
    #[must_use]
    pub fn cell(&self, id: PeripheralId, nonce: u8) -> Option<&LatencyCell> {
        self.cells
            .get(&id)
            .map(|ring| &ring[usize::from(nonce) % LATENCY_SLOTS])
    }

    /// Resets every cell.
    pub fn clear_all(&self) {
        for cell in self.cells.values().flatten() {
            cell.clear();
        }
    }
}
