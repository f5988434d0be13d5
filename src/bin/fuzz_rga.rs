//! AFL fuzz harness for replica convergence
//!
//! Three replicas edit locally and exchange operations through per-replica
//! inboxes. The fuzzer picks which message is delivered next, so delivery
//! is out of order and may repeat. Checked properties:
//! 1. Convergence: once every inbox is drained, all replicas hold the same text
//! 2. Nothing stays buffered after a full drain
//! 3. Visible length matches the materialized text

use afl::fuzz;
use cotext::EngineConfig;
use cotext::Operation;
use cotext::crdt::primitives::ReplicaId;
use cotext::crdt::replica::Replica;

const NUM_USERS: usize = 3;

/// Operation types the fuzzer can generate
#[derive(Debug, Clone, Copy)]
enum FuzzOp {
    /// User types a run of characters
    Insert { user: u8, pos_frac: u8, len: u8 },
    /// User deletes one character
    Delete { user: u8, pos_frac: u8 },
    /// Deliver one pending message, chosen by index, to a user
    Deliver { to: u8, pick: u8 },
    /// Send a copy of an already delivered message again
    Redeliver { to: u8, pick: u8 },
    /// Drain every inbox
    FullSync,
}

impl FuzzOp {
    fn from_bytes(bytes: &[u8]) -> Option<(FuzzOp, &[u8])> {
        if bytes.is_empty() {
            return None;
        }

        let op_type = bytes[0] % 5;
        let rest = &bytes[1..];

        match op_type {
            0 if rest.len() >= 3 => {
                let op = FuzzOp::Insert {
                    user: rest[0] % NUM_USERS as u8,
                    pos_frac: rest[1],
                    len: (rest[2] % 8).saturating_add(1),
                };
                Some((op, &rest[3..]))
            }
            1 if rest.len() >= 2 => {
                let op = FuzzOp::Delete {
                    user: rest[0] % NUM_USERS as u8,
                    pos_frac: rest[1],
                };
                Some((op, &rest[2..]))
            }
            2 if rest.len() >= 2 => {
                let op = FuzzOp::Deliver {
                    to: rest[0] % NUM_USERS as u8,
                    pick: rest[1],
                };
                Some((op, &rest[2..]))
            }
            3 if rest.len() >= 2 => {
                let op = FuzzOp::Redeliver {
                    to: rest[0] % NUM_USERS as u8,
                    pick: rest[1],
                };
                Some((op, &rest[2..]))
            }
            4 => Some((FuzzOp::FullSync, rest)),
            _ => None,
        }
    }
}

struct Network {
    replicas: Vec<Replica>,
    inboxes: Vec<Vec<Operation>>,
    sent: Vec<Operation>,
}

impl Network {
    fn new() -> Network {
        let config = EngineConfig::default();
        Network {
            replicas: (0..NUM_USERS).map(|i| Replica::new(ReplicaId(i as u64 + 2), &config)).collect(),
            inboxes: vec![Vec::new(); NUM_USERS],
            sent: Vec::new(),
        }
    }

    fn broadcast(&mut self, from: usize, op: Operation) {
        for (i, inbox) in self.inboxes.iter_mut().enumerate() {
            if i != from {
                inbox.push(op);
            }
        }
        self.sent.push(op);
    }

    fn deliver(&mut self, to: usize, op: Operation) {
        if op.replica() == self.replicas[to].replica() {
            return;
        }
        let delivery = self.replicas[to]
            .apply_remote_operation(op, None)
            .expect("well-formed operation rejected");
        assert!(delivery.expired.is_empty(), "operation expired: {:?}", delivery.expired);
    }

    fn drain(&mut self) {
        for to in 0..NUM_USERS {
            let inbox = std::mem::take(&mut self.inboxes[to]);
            for op in inbox.into_iter().rev() {
                self.deliver(to, op);
            }
        }
    }

    fn check(&self) {
        let first = self.replicas[0].materialize();
        for (i, r) in self.replicas.iter().enumerate() {
            assert_eq!(r.materialize(), first, "Convergence failure! User {} != User 0", i);
            assert_eq!(r.pending_len(), 0, "User {} still has buffered operations", i);
            assert_eq!(r.materialize().chars().count(), r.len(), "Length mismatch");
        }
    }
}

fn main() {
    fuzz!(|data: &[u8]| {
        let mut net = Network::new();
        let mut remaining = data;

        while let Some((op, rest)) = FuzzOp::from_bytes(remaining) {
            remaining = rest;

            match op {
                FuzzOp::Insert { user, pos_frac, len } => {
                    let user = user as usize;
                    let doc_len = net.replicas[user].len();
                    let pos = (pos_frac as usize * doc_len / 256).min(doc_len);
                    for i in 0..len {
                        let value = (b'A' + (user as u8).wrapping_add(i) % 26) as char;
                        let op = net.replicas[user].apply_local_insert(pos + i as usize, value).unwrap();
                        net.broadcast(user, op);
                    }
                }

                FuzzOp::Delete { user, pos_frac } => {
                    let user = user as usize;
                    let doc_len = net.replicas[user].len();
                    if doc_len > 0 {
                        let pos = (pos_frac as usize * doc_len / 256).min(doc_len - 1);
                        let op = net.replicas[user].apply_local_delete(pos).unwrap();
                        net.broadcast(user, op);
                    }
                }

                FuzzOp::Deliver { to, pick } => {
                    let to = to as usize;
                    if !net.inboxes[to].is_empty() {
                        let idx = pick as usize % net.inboxes[to].len();
                        let op = net.inboxes[to].swap_remove(idx);
                        net.deliver(to, op);
                    }
                }

                FuzzOp::Redeliver { to, pick } => {
                    if !net.sent.is_empty() {
                        let op = net.sent[pick as usize % net.sent.len()];
                        net.deliver(to as usize, op);
                    }
                }

                FuzzOp::FullSync => {
                    net.drain();
                    net.check();
                }
            }
        }

        net.drain();
        net.check();
    });
}
