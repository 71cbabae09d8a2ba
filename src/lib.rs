// corekv — in-memory data-structure engine for a single-node key-value server

pub mod cli;
pub mod clock;
pub mod command;
pub mod config;
pub mod db;
pub mod dict;
pub mod event;
pub mod intset;
pub mod packlist;
pub mod server;
pub mod siphash;
pub mod tx;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level re-exports for the common entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Sorted integer set with self-promoting width encoding.
pub use intset::IntSet;

/// Packed entry list: length-prefixed strings/integers in one blob.
pub use packlist::{PackList, PackValue};

/// Incremental-rehash hash table.
pub use dict::{Dict, DictKey, ResizeGuard};

/// The reactor and its handler/flag vocabulary.
pub use event::{EventLoop, TimerNext, ALL_EVENTS, BARRIER, DONT_WAIT, READABLE, WRITABLE};

/// Cross-thread submission into the reactor.
pub use event::{Mailbox, Remote};

/// Server state, sessions and reactor wiring.
pub use server::{Server, SessionId};

/// Command dispatch reply type.
pub use command::Reply;

/// Runtime configuration.
pub use config::Config;

/// Process-wide hash seed management.
pub use siphash::{hash_seed, set_hash_seed};
