//! Cotext - a replicated text document engine for collaborative editing.
//!
//! Every replica holds a sequence CRDT of characters. Local edits are
//! applied immediately and produce an [`Operation`] for broadcast; remote
//! operations go through a causal buffer and converge to the same text on
//! every replica regardless of delivery order.
//!
//! # Quick Start
//!
//! ```
//! use cotext::crdt::primitives::ReplicaId;
//! use cotext::crdt::replica::Replica;
//! use cotext::EngineConfig;
//!
//! let config = EngineConfig::default();
//! let mut alice = Replica::new(ReplicaId(2), &config);
//! let mut bob = Replica::new(ReplicaId(3), &config);
//!
//! let h = alice.apply_local_insert(0, 'h').unwrap();
//! let i = alice.apply_local_insert(1, 'i').unwrap();
//!
//! // Out of order delivery is buffered until the dependency arrives.
//! bob.apply_remote_operation(i, None).unwrap();
//! bob.apply_remote_operation(h, None).unwrap();
//!
//! assert_eq!(alice.materialize(), "hi");
//! assert_eq!(bob.materialize(), "hi");
//! ```
//!
//! # Concurrent inserts at the same place
//!
//! When two replicas insert into the same gap without seeing each other,
//! the insert with the higher [`crdt::primitives::ElementId`] (counter
//! first, then replica id) ends up nearest the left neighbor, and the
//! lower one after it. Every replica reaches the same order whichever
//! arrives first:
//!
//! ```
//! use cotext::crdt::primitives::ReplicaId;
//! use cotext::crdt::replica::Replica;
//! use cotext::EngineConfig;
//!
//! let config = EngineConfig::default();
//! let mut alice = Replica::new(ReplicaId(2), &config);
//! let mut bob = Replica::new(ReplicaId(3), &config);
//!
//! // Both at counter 1; bob's replica id is higher
//! let a = alice.apply_local_insert(0, 'a').unwrap();
//! let b = bob.apply_local_insert(0, 'b').unwrap();
//! alice.apply_remote_operation(b, None).unwrap();
//! bob.apply_remote_operation(a, None).unwrap();
//!
//! assert_eq!(alice.materialize(), "ba");
//! assert_eq!(bob.materialize(), "ba");
//! ```
//!
//! Documents, roles, share codes and cursors are managed by the
//! [`session::SessionCoordinator`]; connected users and their colors by the
//! [`presence::PresenceTracker`].

pub mod config;
pub mod crdt;
pub mod error;
pub mod presence;
pub mod session;

pub use config::EngineConfig;
pub use crdt::op::Operation;
pub use error::Error;
pub use error::Result;
