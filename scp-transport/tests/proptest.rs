use proptest::prelude::*;
use rand::SeedableRng;
use scp_transport::{
    BlockQueue, CommandRequest, Config, Connection, ConnectionEvent, ManualTimeProvider,
    RequestId,
};
use scp_wire::Header;
use scp_wire::constants::{CMD_READ, CMD_WRITE, RC_OK};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WINDOW: usize = 3;
const TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
enum Op {
    /// Submit a single command with the given payload length.
    Single(usize),
    /// Submit a bulk read of the given length.
    Read(usize),
    /// Submit a bulk write of the given length.
    Write(usize),
    /// Drain transmissions; per-packet bits decide reply-now / stash / drop.
    Pump(u8),
    /// Deliver one stashed (delayed) reply, possibly long after its slot
    /// moved on.
    Deliver,
    /// Advance time by one timeout period and fire expiries.
    Timeout,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..40).prop_map(Op::Single),
        (0usize..100).prop_map(Op::Read),
        (0usize..100).prop_map(Op::Write),
        any::<u8>().prop_map(Op::Pump),
        Just(Op::Deliver),
        Just(Op::Timeout),
    ]
}

fn build_reply(request: &[u8]) -> Vec<u8> {
    let req = scp_wire::unpack(request, false, 3).unwrap();
    let payload: Vec<u8> = match req.cmd_rc {
        CMD_READ => vec![0x5A; req.args[1] as usize],
        CMD_WRITE => Vec::new(),
        _ => req.payload.to_vec(),
    };
    let rc = match req.cmd_rc {
        CMD_READ | CMD_WRITE => RC_OK,
        cmd => cmd,
    };
    let mut out = Vec::new();
    scp_wire::pack(
        &mut out,
        false,
        &Header {
            dest_addr: 0,
            dest_cpu: 0,
            cmd_rc: rc,
            seq: req.seq,
            n_args: 0,
            args: [0; 3],
        },
        &payload,
        1024,
    );
    out
}

proptest! {
    /// Drives a connection through an arbitrary schedule of submissions,
    /// transmissions, losses, delayed replies and timeouts, then closes it.
    /// Checks the window bound throughout and that every request receives
    /// exactly one terminal event, with exactly one final `Closed`.
    #[test]
    fn test_window_bound_and_exactly_one_terminal_event(
        ops in prop::collection::vec(op_strategy(), 1..50),
        seed in any::<u64>(),
    ) {
        let now = Instant::now();
        let tp = Arc::new(ManualTimeProvider::new(now, 0));
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let remote: SocketAddr = "127.0.0.1:17893".parse().unwrap();
        let config = Config {
            scp_data_length: 32,
            timeout: TIMEOUT,
            n_tries: 3,
            window: WINDOW,
            framed: false,
        };
        let mut conn = Connection::new(remote, config, tp, &mut rng).unwrap();

        let mut t = now;
        let mut submitted: Vec<RequestId> = Vec::new();
        let mut terminal: HashMap<RequestId, usize> = HashMap::new();
        let mut closed_events = 0usize;
        let mut stash: Vec<Vec<u8>> = Vec::new();

        let record = |events: Vec<ConnectionEvent>,
                          terminal: &mut HashMap<RequestId, usize>,
                          closed_events: &mut usize| {
            for event in events {
                match event {
                    ConnectionEvent::SingleCompleted { id, .. }
                    | ConnectionEvent::SingleFailed { id, .. }
                    | ConnectionEvent::TransferCompleted { id, .. }
                    | ConnectionEvent::TransferFailed { id, .. } => {
                        *terminal.entry(id).or_insert(0) += 1;
                    }
                    ConnectionEvent::Closed => *closed_events += 1,
                }
            }
        };

        for op in ops {
            match op {
                Op::Single(len) => {
                    let id = conn
                        .send_command(CommandRequest {
                            dest_addr: 1,
                            dest_cpu: 0,
                            cmd: 0,
                            n_args_send: 1,
                            n_args_recv: 1,
                            args: [7, 0, 0],
                            payload: vec![1; len],
                            resp_capacity: 64,
                        })
                        .unwrap();
                    submitted.push(id);
                }
                Op::Read(len) => {
                    submitted.push(conn.read(1, 0, 0x100, len).unwrap());
                }
                Op::Write(len) => {
                    submitted.push(conn.write(1, 0, 0x100, vec![2; len]).unwrap());
                }
                Op::Pump(mask) => {
                    let mut i = 0;
                    while let Some(tx) = conn.poll_transmit() {
                        conn.handle_send_complete_at(tx.token, Ok(()), t);
                        match (mask >> (i % 8)) & 3 {
                            0 | 1 => {
                                let reply = build_reply(&tx.contents);
                                conn.handle_datagram(&reply);
                            }
                            2 => stash.push(build_reply(&tx.contents)),
                            _ => {} // dropped on the floor
                        }
                        i += 1;
                    }
                }
                Op::Deliver => {
                    if let Some(reply) = stash.pop() {
                        conn.handle_datagram(&reply);
                    }
                }
                Op::Timeout => {
                    t += TIMEOUT;
                    conn.handle_timeout_at(t);
                }
            }

            prop_assert!(conn.outstanding() <= WINDOW);
            let mut events = Vec::new();
            while let Some(event) = conn.poll_event() {
                events.push(event);
            }
            record(events, &mut terminal, &mut closed_events);
        }

        // Flush whatever is still on the wire, then tear down.
        while let Some(tx) = conn.poll_transmit() {
            conn.handle_send_complete_at(tx.token, Ok(()), t);
        }
        conn.close();
        prop_assert!(conn.is_closed());

        let mut events = Vec::new();
        while let Some(event) = conn.poll_event() {
            events.push(event);
        }
        record(events, &mut terminal, &mut closed_events);

        prop_assert_eq!(closed_events, 1);
        for id in &submitted {
            prop_assert_eq!(
                terminal.get(id).copied().unwrap_or(0),
                1,
                "request {} did not get exactly one terminal event",
                id
            );
        }
        prop_assert_eq!(terminal.len(), submitted.len());
    }

    /// The block queue behaves exactly like a plain deque under arbitrary
    /// interleavings, while its capacity only ever grows.
    #[test]
    fn test_block_queue_matches_model(ops in prop::collection::vec(any::<Option<u16>>(), 0..300)) {
        let mut queue = BlockQueue::new();
        let mut model = VecDeque::new();
        let mut max_capacity = queue.capacity();

        for op in ops {
            match op {
                Some(value) => {
                    queue.push(value);
                    model.push_back(value);
                }
                None => {
                    prop_assert_eq!(queue.pop(), model.pop_front());
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.peek(), model.front());
            prop_assert!(queue.capacity() >= max_capacity);
            max_capacity = queue.capacity();
        }

        while let Some(value) = model.pop_front() {
            prop_assert_eq!(queue.pop(), Some(value));
        }
        prop_assert!(queue.is_empty());
    }
}
