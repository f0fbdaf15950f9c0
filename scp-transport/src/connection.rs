use crate::ConnectionEvent;
use crate::error::ScpError;
use crate::flat_map::FlatMap;
use crate::queue::BlockQueue;
use crate::request::{CommandRequest, Direction, Request, RequestId, Transfer};
use crate::slot::{SlotKind, SlotState, SlotTable};
use crate::time::TimeProvider;
use rand::RngCore;
use scp_wire::Header;
use scp_wire::constants::{
    CMD_READ, CMD_WRITE, DEFAULT_DATA_LENGTH, DEFAULT_N_TRIES, DEFAULT_TIMEOUT_MS, DEFAULT_WINDOW,
    MAX_ARGS, RC_OK,
};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Returned by [`Connection::next_wakeup`] when nothing is pending.
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// Connection parameters, frozen at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum SCP data field length per packet, in bytes (D).
    pub scp_data_length: usize,
    /// Response timeout per transmission attempt (T).
    pub timeout: Duration,
    /// Transmission attempts per packet before giving up (A).
    pub n_tries: u8,
    /// Number of outstanding-packet slots (N).
    pub window: usize,
    /// Whether datagrams carry the two-byte zero framing prefix. Must match
    /// the remote's dialect.
    pub framed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scp_data_length: DEFAULT_DATA_LENGTH,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            n_tries: DEFAULT_N_TRIES,
            window: DEFAULT_WINDOW,
            framed: false,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), ScpError> {
        if self.scp_data_length == 0 || self.n_tries == 0 || self.window == 0 {
            return Err(ScpError::InvalidConfig);
        }
        Ok(())
    }
}

/// Identifies one outstanding transmission handed to the driver. The driver
/// must echo it back in [`Connection::handle_send_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendToken {
    pub(crate) slot: usize,
    pub(crate) seq: u16,
}

/// A datagram the driver should put on the wire.
#[derive(Debug)]
pub struct Transmit {
    pub token: SendToken,
    pub destination: SocketAddr,
    pub contents: Vec<u8>,
}

/// The transport engine of a single SCP connection.
///
/// `Connection` is a sans-IO state machine: it owns no socket and no timers.
/// A driver feeds it datagrams via [`handle_datagram`](Self::handle_datagram),
/// drains outbound packets via [`poll_transmit`](Self::poll_transmit),
/// reports each send's completion via
/// [`handle_send_complete`](Self::handle_send_complete), fires
/// [`handle_timeout`](Self::handle_timeout) no later than
/// [`next_wakeup`](Self::next_wakeup), and collects request completions from
/// [`poll_event`](Self::poll_event). All submissions are multiplexed over
/// the fixed window of outstanding slots; bulk reads and writes are split
/// into slot-sized fragments and reassembled transparently.
pub struct Connection {
    remote: SocketAddr,
    config: Config,
    time: Arc<dyn TimeProvider>,
    next_seq: u16,
    next_request_id: u64,
    queue: BlockQueue<Request>,
    slots: SlotTable,
    /// Transfers whose final fragment has been bound but whose completion is
    /// still outstanding, keyed by bulk-id.
    in_flight: FlatMap<RequestId, Transfer>,
    events: VecDeque<ConnectionEvent>,
    closing: bool,
    closed: bool,
    retransmits: u64,
}

impl Connection {
    /// Creates a connection to `remote`. The initial sequence number is
    /// randomized; the counter then advances monotonically per bound packet,
    /// wrapping at 16 bits.
    pub fn new(
        remote: SocketAddr,
        config: Config,
        time: Arc<dyn TimeProvider>,
        rng: &mut dyn RngCore,
    ) -> Result<Self, ScpError> {
        config.validate()?;
        let wire_capacity = scp_wire::max_packet_len(config.framed, config.scp_data_length);
        Ok(Self {
            remote,
            next_seq: rng.next_u32() as u16,
            next_request_id: 0,
            queue: BlockQueue::new(),
            slots: SlotTable::new(config.window, wire_capacity),
            in_flight: FlatMap::new(),
            events: VecDeque::new(),
            closing: false,
            closed: false,
            retransmits: 0,
            config,
            time,
        })
    }

    /// Enqueues a single SCP command.
    ///
    /// Payload bytes beyond the connection's data field length are silently
    /// dropped at pack time; the response payload is truncated to
    /// `resp_capacity` the same way.
    pub fn send_command(&mut self, command: CommandRequest) -> Result<RequestId, ScpError> {
        if self.closing {
            return Err(ScpError::Closed);
        }
        let id = self.alloc_id();
        self.queue.push(Request::Single { id, command });
        self.process_queue();
        Ok(id)
    }

    /// Enqueues a bulk write of `data` to `address`. The buffer is handed
    /// back in the terminal event.
    pub fn write(
        &mut self,
        dest_addr: u16,
        dest_cpu: u8,
        address: u32,
        data: Vec<u8>,
    ) -> Result<RequestId, ScpError> {
        self.submit_transfer(Direction::Write, dest_addr, dest_cpu, address, data)
    }

    /// Enqueues a bulk read of `len` bytes from `address`. The filled buffer
    /// arrives in the terminal event.
    pub fn read(
        &mut self,
        dest_addr: u16,
        dest_cpu: u8,
        address: u32,
        len: usize,
    ) -> Result<RequestId, ScpError> {
        self.submit_transfer(Direction::Read, dest_addr, dest_cpu, address, vec![0; len])
    }

    fn submit_transfer(
        &mut self,
        dir: Direction,
        dest_addr: u16,
        dest_cpu: u8,
        address: u32,
        buffer: Vec<u8>,
    ) -> Result<RequestId, ScpError> {
        if self.closing {
            return Err(ScpError::Closed);
        }
        let id = self.alloc_id();
        if buffer.is_empty() {
            // Zero-length transfers complete synchronously with zero fragments.
            self.events
                .push_back(ConnectionEvent::TransferCompleted { id, buffer });
            return Ok(id);
        }
        self.queue.push(Request::Transfer(Transfer {
            id,
            dir,
            dest_addr,
            dest_cpu,
            address,
            offset: 0,
            buffer,
        }));
        self.process_queue();
        Ok(id)
    }

    fn alloc_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    /// Binds queue heads to free slots until one of the two runs out.
    /// Singles are consumed whole; a transfer surrenders one fragment per
    /// free slot and leaves the head only with its final fragment.
    fn process_queue(&mut self) {
        if self.closing {
            return;
        }
        loop {
            let Some(slot_idx) = self.slots.free_index() else {
                break;
            };
            if self.queue.is_empty() {
                break;
            }
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            let framed = self.config.framed;
            let data_limit = self.config.scp_data_length;

            if matches!(self.queue.peek(), Some(Request::Single { .. })) {
                let Some(Request::Single { id, command }) = self.queue.pop() else {
                    unreachable!()
                };
                let header = Header {
                    dest_addr: command.dest_addr,
                    dest_cpu: command.dest_cpu,
                    cmd_rc: command.cmd,
                    seq,
                    n_args: command.n_args_send.min(MAX_ARGS as u8),
                    args: command.args,
                };
                let kind = SlotKind::Single {
                    n_args_recv: command.n_args_recv.min(MAX_ARGS as u8),
                    resp_capacity: command.resp_capacity,
                };
                self.slots.get_mut(slot_idx).activate(
                    id,
                    kind,
                    &header,
                    &command.payload,
                    framed,
                    data_limit,
                );
            } else {
                let Some(Request::Transfer(transfer)) = self.queue.peek_mut() else {
                    unreachable!()
                };
                let fragment = transfer.next_fragment(data_limit);
                let id = transfer.id;
                let dir = transfer.dir;
                let header = Header {
                    dest_addr: transfer.dest_addr,
                    dest_cpu: transfer.dest_cpu,
                    cmd_rc: match dir {
                        Direction::Read => CMD_READ,
                        Direction::Write => CMD_WRITE,
                    },
                    seq,
                    n_args: MAX_ARGS as u8,
                    args: [fragment.address, fragment.len as u32, fragment.unit as u32],
                };
                let payload: &[u8] = match dir {
                    Direction::Write => {
                        &transfer.buffer[fragment.offset..fragment.offset + fragment.len]
                    }
                    Direction::Read => &[],
                };
                let kind = SlotKind::Transfer {
                    dir,
                    offset: fragment.offset,
                    len: fragment.len,
                };
                self.slots
                    .get_mut(slot_idx)
                    .activate(id, kind, &header, payload, framed, data_limit);
                if fragment.last {
                    let Some(Request::Transfer(transfer)) = self.queue.pop() else {
                        unreachable!()
                    };
                    self.in_flight.insert(transfer.id, transfer);
                }
            }
        }
    }

    /// Hands the next queued packet to the driver. The slot stays
    /// send-in-progress until the matching
    /// [`handle_send_complete`](Self::handle_send_complete) arrives.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        let idx = self.slots.send_queued_index()?;
        let slot = self.slots.get_mut(idx);
        slot.state = SlotState::Sending;
        Some(Transmit {
            token: SendToken {
                slot: idx,
                seq: slot.seq,
            },
            destination: self.remote,
            contents: slot.wire().to_vec(),
        })
    }

    /// Reports the outcome of a transmission previously handed out by
    /// [`poll_transmit`](Self::poll_transmit).
    pub fn handle_send_complete(&mut self, token: SendToken, result: Result<(), i32>) {
        let now = self.time.now_instant();
        self.handle_send_complete_at(token, result, now);
    }

    pub fn handle_send_complete_at(
        &mut self,
        token: SendToken,
        result: Result<(), i32>,
        now: Instant,
    ) {
        if token.slot >= self.slots.len() {
            debug!(slot = token.slot, "ignoring completion for unknown slot");
            return;
        }
        let slot = self.slots.get_mut(token.slot);
        if slot.state != SlotState::Sending || slot.seq != token.seq {
            debug!(seq = token.seq, "ignoring stale send completion");
            return;
        }
        if slot.cancelled {
            // Deferred cancellation: the terminal event already went out,
            // this completion just performs the physical release.
            slot.reset();
            self.check_teardown();
            self.process_queue();
            return;
        }
        match result {
            Ok(()) => {
                slot.state = SlotState::Awaiting;
                slot.deadline = Some(now + self.config.timeout);
            }
            Err(code) => {
                warn!(code, seq = token.seq, "send failed");
                self.cancel_slot(token.slot, ScpError::Transport { code });
            }
        }
    }

    /// Fires expired per-attempt timers, retransmitting or giving up.
    pub fn handle_timeout(&mut self) {
        let now = self.time.now_instant();
        self.handle_timeout_at(now);
    }

    pub fn handle_timeout_at(&mut self, now: Instant) {
        let expired: SmallVec<usize, 8> = (0..self.slots.len())
            .filter(|&i| {
                let slot = self.slots.get(i);
                slot.state == SlotState::Awaiting && slot.deadline.is_some_and(|d| d <= now)
            })
            .collect();
        for idx in expired {
            self.retry_slot(idx);
        }
    }

    fn retry_slot(&mut self, idx: usize) {
        let slot = self.slots.get_mut(idx);
        // A sibling's cancellation cascade may have released this slot after
        // it was collected as expired.
        if slot.state != SlotState::Awaiting {
            return;
        }
        if slot.attempts >= self.config.n_tries {
            debug!(seq = slot.seq, attempts = slot.attempts, "giving up");
            self.cancel_slot(idx, ScpError::Timeout);
            return;
        }
        slot.attempts += 1;
        slot.state = SlotState::SendQueued;
        slot.deadline = None;
        debug!(seq = slot.seq, attempt = slot.attempts, "retransmitting");
        self.retransmits += 1;
    }

    /// Earliest instant by which the driver should call
    /// [`handle_timeout`](Self::handle_timeout) again. Returns `now` while
    /// transmissions are waiting in [`poll_transmit`](Self::poll_transmit).
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        if self.slots.send_queued_index().is_some() {
            return now;
        }
        self.slots
            .earliest_deadline()
            .unwrap_or(now + IDLE_WAKEUP)
    }

    /// Feeds one received datagram into the engine. Short, malformed,
    /// unmatched and duplicate datagrams are ignored.
    pub fn handle_datagram(&mut self, datagram: &[u8]) {
        let framed = self.config.framed;
        let Some(seq) = scp_wire::unpack_seq(datagram, framed) else {
            debug!(len = datagram.len(), "ignoring short datagram");
            return;
        };
        let Some(idx) = self.slots.find_by_seq(seq) else {
            debug!(seq, "ignoring unmatched datagram");
            return;
        };
        let (id, kind) = {
            let slot = self.slots.get(idx);
            (slot.id, slot.kind.unwrap())
        };

        match kind {
            SlotKind::Single {
                n_args_recv,
                resp_capacity,
            } => {
                let Some(resp) = scp_wire::unpack(datagram, framed, n_args_recv) else {
                    return;
                };
                let take = resp
                    .payload
                    .len()
                    .min(resp_capacity)
                    .min(self.config.scp_data_length);
                self.events.push_back(ConnectionEvent::SingleCompleted {
                    id,
                    cmd_rc: resp.cmd_rc,
                    n_args: resp.n_args,
                    args: resp.args,
                    payload: resp.payload[..take].to_vec(),
                });
                self.release_slot(idx);
                self.process_queue();
            }
            SlotKind::Transfer { dir, offset, len } => {
                let Some(resp) = scp_wire::unpack(datagram, framed, 0) else {
                    return;
                };
                if resp.cmd_rc != RC_OK {
                    debug!(seq, rc = resp.cmd_rc, "bulk fragment rejected by remote");
                    self.cancel_slot(idx, ScpError::BadReturnCode { rc: resp.cmd_rc });
                    return;
                }
                if dir == Direction::Read {
                    let take = resp.payload.len().min(len);
                    if let Some(transfer) = self.transfer_mut(id) {
                        transfer.buffer[offset..offset + take]
                            .copy_from_slice(&resp.payload[..take]);
                    }
                }
                // This fragment completes the transfer iff no sibling slot is
                // live and the queue head is not issuing more of it.
                let last = !self.slots.any_other_transfer(id, idx) && !self.queue_head_is(id);
                self.release_slot(idx);
                if last && let Some(transfer) = self.in_flight.remove(&id) {
                    self.events.push_back(ConnectionEvent::TransferCompleted {
                        id,
                        buffer: transfer.buffer,
                    });
                }
                self.process_queue();
            }
        }
    }

    /// Locates the transfer owning a fragment: either fully issued and
    /// tracked in `in_flight`, or still being fragmented at the queue head.
    fn transfer_mut(&mut self, id: RequestId) -> Option<&mut Transfer> {
        if self.in_flight.contains_key(&id) {
            return self.in_flight.get_mut(&id);
        }
        match self.queue.peek_mut() {
            Some(Request::Transfer(t)) if t.id == id => Some(t),
            _ => None,
        }
    }

    fn queue_head_is(&self, id: RequestId) -> bool {
        matches!(self.queue.peek(), Some(Request::Transfer(t)) if t.id == id)
    }

    /// Returns a slot to the free pool, deferring the physical release while
    /// a send is in progress (the substrate still owns the packet).
    fn release_slot(&mut self, idx: usize) {
        let slot = self.slots.get_mut(idx);
        if slot.state == SlotState::Sending {
            slot.cancelled = true;
            slot.deadline = None;
        } else {
            slot.reset();
        }
    }

    /// Cancels the request bound to `idx` with `error`, delivering its
    /// terminal event. For a bulk fragment this cancels every sibling slot
    /// and the queued remainder; the transfer's event fires exactly once.
    fn cancel_slot(&mut self, idx: usize, error: ScpError) {
        let slot = self.slots.get(idx);
        if !slot.is_active() || slot.cancelled {
            return;
        }
        let id = slot.id;
        match slot.kind.unwrap() {
            SlotKind::Single { .. } => {
                self.release_slot(idx);
                self.events
                    .push_back(ConnectionEvent::SingleFailed { id, error });
            }
            SlotKind::Transfer { .. } => {
                let siblings: SmallVec<usize, 8> = (0..self.slots.len())
                    .filter(|&i| {
                        let s = self.slots.get(i);
                        s.is_active() && !s.cancelled && s.id == id
                    })
                    .collect();
                for i in siblings {
                    self.release_slot(i);
                }
                let buffer = if self.queue_head_is(id) {
                    let Some(Request::Transfer(t)) = self.queue.pop() else {
                        unreachable!()
                    };
                    t.buffer
                } else {
                    self.in_flight.remove(&id).map(|t| t.buffer).unwrap_or_default()
                };
                debug!(id = %id, error = %error, "cancelling bulk transfer");
                self.events
                    .push_back(ConnectionEvent::TransferFailed { id, error, buffer });
            }
        }
        self.process_queue();
    }

    /// Begins (or re-enters) teardown. Every pending and in-flight request
    /// receives a terminal `Closed` event; once the last in-progress send
    /// has completed, a single [`ConnectionEvent::Closed`] is emitted.
    /// Calling this again is a no-op.
    pub fn close(&mut self) {
        if self.closing {
            self.check_teardown();
            return;
        }
        self.closing = true;
        debug!("tearing down connection");
        for idx in 0..self.slots.len() {
            self.cancel_slot(idx, ScpError::Closed);
        }
        while let Some(request) = self.queue.pop() {
            match request {
                Request::Single { id, .. } => {
                    self.events.push_back(ConnectionEvent::SingleFailed {
                        id,
                        error: ScpError::Closed,
                    });
                }
                Request::Transfer(t) => {
                    self.events.push_back(ConnectionEvent::TransferFailed {
                        id: t.id,
                        error: ScpError::Closed,
                        buffer: t.buffer,
                    });
                }
            }
        }
        let leftovers: Vec<(RequestId, Transfer)> = self.in_flight.drain().collect();
        for (id, transfer) in leftovers {
            self.events.push_back(ConnectionEvent::TransferFailed {
                id,
                error: ScpError::Closed,
                buffer: transfer.buffer,
            });
        }
        self.check_teardown();
    }

    fn check_teardown(&mut self) {
        if self.closing && !self.closed && !self.slots.any_send_in_progress() {
            self.closed = true;
            debug!("teardown complete");
            self.events.push_back(ConnectionEvent::Closed);
        }
    }

    /// Drains the next completion event, if any.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn scp_data_length(&self) -> usize {
        self.config.scp_data_length
    }

    /// Number of slots currently holding an in-flight packet.
    pub fn outstanding(&self) -> usize {
        self.slots.active_count()
    }

    /// Number of requests waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn retransmit_count(&self) -> u64 {
        self.retransmits
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
