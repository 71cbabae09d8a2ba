// config.rs — Compile-time tuning constants and the runtime server config.
//
// The constants are the knobs the containers and the reactor read; the
// `Config` struct is what the binary fills in from command-line flags and
// hands to `Server::new`.

/// Initial (and minimum) bucket-array size of a hash table.
/// Every capacity is a power of two and never drops below this.
pub const DICT_INITIAL_SIZE: usize = 4;

/// Load factor (`used / size`) above which a hash table expands even while
/// automatic resizing is globally disabled (e.g. around a persistence fork).
pub const DICT_FORCE_RESIZE_RATIO: usize = 5;

/// Empty-bucket visit budget multiplier for one incremental rehash request:
/// a request for `n` steps may skip at most `10 * n` empty buckets.
pub const DICT_REHASH_EMPTY_VISITS: usize = 10;

/// Steps batched between clock checks in `Dict::rehash_ms`.
pub const DICT_REHASH_BATCH: usize = 100;

/// Sample size used by `Dict::fair_random_entry`.
pub const DICT_FAIR_RANDOM_SAMPLE: usize = 15;

/// Buckets cleared between progress callbacks in `Dict::clear_with`.
pub const DICT_CLEAR_CALLBACK_PERIOD: usize = 65_536;

/// Hard ceiling on a packed entry list blob. Additions that would push the
/// blob past this must be rejected by the caller via `safe_to_add`.
pub const PACKLIST_SAFETY_LIMIT: usize = 1 << 30;

/// Set values hold an integer-set blob until they grow past this many
/// members (or gain a non-integer member), then convert to a hash table.
pub const SET_MAX_INTSET_ENTRIES: usize = 512;

/// Keys sampled from the expires table per active-expiry cycle.
pub const EXPIRE_CYCLE_LOOKUPS: usize = 20;

/// Period of the active-expiry time event, in milliseconds.
pub const EXPIRE_CYCLE_PERIOD_MS: u64 = 100;

/// Default fd capacity of the reactor. Every registered fd must be below
/// this; raise it with `--setsize` for servers expecting many connections.
pub const DEFAULT_SETSIZE: usize = 1024;

/// Default TCP port of `corekv-server`.
pub const DEFAULT_PORT: u16 = 7379;

/// Default number of databases (SELECT 0..n-1).
pub const DEFAULT_DATABASES: usize = 16;

/// Runtime configuration assembled by the binary and consumed by
/// `Server::new`. All fields have usable defaults so tests can build a
/// server with `Config::default()`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listening socket binds to.
    pub bind: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Reactor fd capacity.
    pub setsize: usize,
    /// Number of databases addressable via SELECT.
    pub databases: usize,
    /// Integer-set to hash-table conversion threshold for set values.
    pub set_max_intset_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            setsize: DEFAULT_SETSIZE,
            databases: DEFAULT_DATABASES,
            set_max_intset_entries: SET_MAX_INTSET_ENTRIES,
        }
    }
}
