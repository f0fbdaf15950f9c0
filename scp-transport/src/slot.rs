use crate::request::{Direction, RequestId};
use scp_wire::Header;
use std::time::Instant;

/// Lifecycle of an outstanding-slot, excluding the orthogonal `cancelled`
/// latch. "Pending send" in the occupancy invariant means
/// `SendQueued | Sending`: the packet has been handed to (or queued for)
/// the I/O substrate and its completion has not been observed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Free for binding.
    Idle,
    /// A transmission was requested; `poll_transmit` has not picked it up.
    SendQueued,
    /// The driver holds the datagram; the send completion is outstanding.
    Sending,
    /// Send completed, response timer armed.
    Awaiting,
}

/// Per-variant bookkeeping mirrored from the request at bind time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotKind {
    Single {
        n_args_recv: u8,
        resp_capacity: usize,
    },
    Transfer {
        dir: Direction,
        /// Slice of the transfer buffer this packet covers.
        offset: usize,
        len: usize,
    },
}

/// One entry of the fixed in-flight window. Allocated once at connection
/// creation and reused for many packets; the packed wire bytes are kept
/// until release so retransmissions are bit-identical.
#[derive(Debug)]
pub(crate) struct Slot {
    pub state: SlotState,
    /// Set when cancellation had to be deferred behind an in-progress send;
    /// the send completion performs the physical release.
    pub cancelled: bool,
    pub id: RequestId,
    pub seq: u16,
    pub attempts: u8,
    pub deadline: Option<Instant>,
    pub kind: Option<SlotKind>,
    wire: Vec<u8>,
}

impl Slot {
    fn new(wire_capacity: usize) -> Self {
        Self {
            state: SlotState::Idle,
            cancelled: false,
            id: RequestId(0),
            seq: 0,
            attempts: 0,
            deadline: None,
            kind: None,
            wire: Vec::with_capacity(wire_capacity),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != SlotState::Idle
    }

    /// Binds a request to this slot and packs its wire bytes. The slot
    /// enters `SendQueued` with one attempt counted.
    pub fn activate(
        &mut self,
        id: RequestId,
        kind: SlotKind,
        header: &Header,
        payload: &[u8],
        framed: bool,
        data_limit: usize,
    ) {
        debug_assert_eq!(self.state, SlotState::Idle);
        self.state = SlotState::SendQueued;
        self.cancelled = false;
        self.id = id;
        self.seq = header.seq;
        self.attempts = 1;
        self.deadline = None;
        self.kind = Some(kind);
        scp_wire::pack(&mut self.wire, framed, header, payload, data_limit);
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the slot to `Idle`. The wire buffer keeps its allocation.
    pub fn reset(&mut self) {
        self.state = SlotState::Idle;
        self.cancelled = false;
        self.deadline = None;
        self.kind = None;
        self.wire.clear();
    }
}

/// The fixed-width table of in-flight packet contexts. Slots never migrate;
/// membership is the `is_active` predicate and every lookup is a linear
/// scan, which is the right trade for the small windows this engine runs.
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new(window: usize, wire_capacity: usize) -> Self {
        Self {
            slots: (0..window).map(|_| Slot::new(wire_capacity)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// First free slot, if any.
    pub fn free_index(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.is_active())
    }

    /// First slot queued for transmission, if any.
    pub fn send_queued_index(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state == SlotState::SendQueued && !s.cancelled)
    }

    /// Locates the live slot owning `seq`. Cancelled slots no longer match;
    /// their request already received its terminal event.
    pub fn find_by_seq(&self, seq: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.is_active() && !s.cancelled && s.seq == seq)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    pub fn any_send_in_progress(&self) -> bool {
        self.slots.iter().any(|s| s.state == SlotState::Sending)
    }

    /// True if a slot other than `except` still carries a live fragment of
    /// the given bulk transfer.
    pub fn any_other_transfer(&self, id: RequestId, except: usize) -> bool {
        self.slots.iter().enumerate().any(|(i, s)| {
            i != except
                && s.is_active()
                && !s.cancelled
                && s.id == id
                && matches!(s.kind, Some(SlotKind::Transfer { .. }))
        })
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.slots.iter().filter_map(|s| s.deadline).min()
    }
}
