//! Command table, dispatch and the data-type command handlers.
//!
//! Dispatch is where the transaction coordinator interposes: a session in
//! MULTI gets its commands buffered (after name/arity/permission checks)
//! instead of executed; everything else goes straight to the handler.
//! Handlers mutate the keyspace through `Server` and return a [`Reply`],
//! which the network layer serializes into the session's output buffer.

use crate::clock;
use crate::db::{Key, Object};
use crate::dict::Dict;
use crate::intset::IntSet;
use crate::packlist::{encoding, PackList};
use crate::server::{QueuedCommand, Server, SessionId};
use crate::tx;

// ─────────────────────────────────────────────────────────────────────────────
// Reply
// ─────────────────────────────────────────────────────────────────────────────

/// A command reply, serialized with the usual one-byte type prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
    NullArray,
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    pub fn err(msg: &str) -> Reply {
        Reply::Error(msg.to_string())
    }

    pub fn wrong_type() -> Reply {
        Reply::err("WRONGTYPE Operation against a key holding the wrong kind of value")
    }

    /// Wire form: `+simple`, `-error`, `:int`, `$bulk`, `*array`, with
    /// `$-1`/`*-1` for the null cases.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Int(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(b) => {
                out.push(b'$');
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.serialize(out);
                }
            }
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command table
// ─────────────────────────────────────────────────────────────────────────────

pub type Handler = fn(&mut Server, SessionId, &[Vec<u8>]) -> Reply;

/// One command table row. Arity counts the command name itself; a negative
/// value means "at least that many".
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub handler: Handler,
    /// Executed immediately even inside MULTI.
    pub queue_exempt: bool,
}

const fn cmd(name: &'static str, arity: i32, handler: Handler) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        handler,
        queue_exempt: false,
    }
}

const fn cmd_exempt(name: &'static str, arity: i32, handler: Handler) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        handler,
        queue_exempt: true,
    }
}

pub static COMMANDS: &[CommandSpec] = &[
    cmd("PING", -1, cmd_ping),
    cmd("ECHO", 2, cmd_echo),
    cmd_exempt("QUIT", 1, cmd_quit),
    cmd("SELECT", 2, cmd_select),
    cmd("DBSIZE", 1, cmd_dbsize),
    cmd("FLUSHDB", 1, cmd_flushdb),
    cmd("SWAPDB", 3, cmd_swapdb),
    cmd("SHUTDOWN", -1, cmd_shutdown),
    cmd("SET", 3, cmd_set),
    cmd("GET", 2, cmd_get),
    cmd("DEL", -2, cmd_del),
    cmd("EXISTS", -2, cmd_exists),
    cmd("TYPE", 2, cmd_type),
    cmd("EXPIRE", 3, cmd_expire),
    cmd("PEXPIRE", 3, cmd_pexpire),
    cmd("TTL", 2, cmd_ttl),
    cmd("PTTL", 2, cmd_pttl),
    cmd("PERSIST", 2, cmd_persist),
    cmd("SADD", -3, cmd_sadd),
    cmd("SREM", -3, cmd_srem),
    cmd("SISMEMBER", 3, cmd_sismember),
    cmd("SCARD", 2, cmd_scard),
    cmd("SMEMBERS", 2, cmd_smembers),
    cmd("SRANDMEMBER", 2, cmd_srandmember),
    cmd("LPUSH", -3, cmd_lpush),
    cmd("RPUSH", -3, cmd_rpush),
    cmd("LPOP", 2, cmd_lpop),
    cmd("RPOP", 2, cmd_rpop),
    cmd("LLEN", 2, cmd_llen),
    cmd("LINDEX", 3, cmd_lindex),
    cmd("LRANGE", 4, cmd_lrange),
    cmd("LINSERT", 5, cmd_linsert),
    cmd("LREM", 4, cmd_lrem),
    cmd("HSET", -4, cmd_hset),
    cmd("HGET", 3, cmd_hget),
    cmd("HDEL", -3, cmd_hdel),
    cmd("HLEN", 2, cmd_hlen),
    cmd("HGETALL", 2, cmd_hgetall),
    cmd("SCAN", -2, cmd_scan),
    cmd_exempt("MULTI", 1, tx::cmd_multi),
    cmd_exempt("EXEC", 1, tx::cmd_exec),
    cmd_exempt("DISCARD", 1, tx::cmd_discard),
    cmd_exempt("WATCH", -2, tx::cmd_watch),
    cmd_exempt("UNWATCH", 1, tx::cmd_unwatch),
];

/// Case-normalized table lookup.
pub fn lookup_command(name: &str) -> Option<(usize, &'static CommandSpec)> {
    COMMANDS
        .iter()
        .enumerate()
        .find(|(_, spec)| spec.name.eq_ignore_ascii_case(name))
}

fn arity_ok(arity: i32, argc: usize) -> bool {
    if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= (-arity) as usize
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

impl Server {
    /// Entry point for every parsed command line.
    pub fn dispatch(&mut self, sid: SessionId, argv: Vec<Vec<u8>>) -> Reply {
        if argv.is_empty() {
            return Reply::err("ERR protocol error: empty command");
        }
        let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();
        let in_multi = self.session(sid).in_multi;

        let (idx, spec) = match lookup_command(&name) {
            Some(found) => found,
            None => {
                if in_multi {
                    self.session(sid).dirty_queue = true;
                }
                return Reply::Error(format!("ERR unknown command '{name}'"));
            }
        };
        if !arity_ok(spec.arity, argv.len()) {
            if in_multi {
                self.session(sid).dirty_queue = true;
            }
            return Reply::Error(format!(
                "ERR wrong number of arguments for '{}' command",
                spec.name.to_ascii_lowercase()
            ));
        }

        if in_multi && !spec.queue_exempt {
            if self.session(sid).is_denied(spec.name) {
                self.session(sid).dirty_queue = true;
                return noperm(spec.name);
            }
            self.session(sid).multi_queue.push(QueuedCommand { cmd: idx, argv });
            return Reply::Simple("QUEUED".to_string());
        }

        self.run_command(idx, sid, &argv)
    }

    /// Run a resolved command, re-applying the permission check (EXEC runs
    /// queued commands through here so a permission lost between queue and
    /// exec surfaces as NOPERM in the reply array).
    pub(crate) fn run_command(&mut self, idx: usize, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
        let spec = &COMMANDS[idx];
        if self.session(sid).is_denied(spec.name) {
            return noperm(spec.name);
        }
        (spec.handler)(self, sid, argv)
    }
}

fn noperm(name: &str) -> Reply {
    Reply::Error(format!(
        "NOPERM this user has no permissions to run the '{}' command",
        name.to_ascii_lowercase()
    ))
}

/// Strict signed-decimal parse (same rules the packed list uses to decide
/// integer encoding).
fn parse_i64(bytes: &[u8]) -> Option<i64> {
    encoding::parse_int(bytes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection-level commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_ping(_srv: &mut Server, _sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    match argv.len() {
        1 => Reply::Simple("PONG".to_string()),
        2 => Reply::Bulk(argv[1].clone()),
        _ => Reply::err("ERR wrong number of arguments for 'ping' command"),
    }
}

fn cmd_echo(_srv: &mut Server, _sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    Reply::Bulk(argv[1].clone())
}

fn cmd_quit(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    srv.session(sid).closing = true;
    Reply::ok()
}

fn cmd_select(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let idx = match parse_i64(&argv[1]) {
        Some(i) if i >= 0 && (i as usize) < srv.dbs.len() => i as usize,
        Some(_) => return Reply::err("ERR DB index is out of range"),
        None => return Reply::err("ERR value is not an integer or out of range"),
    };
    srv.session(sid).db_index = idx;
    Reply::ok()
}

fn cmd_dbsize(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    Reply::Int(srv.dbs[dbi].dict.len() as i64)
}

fn cmd_flushdb(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    srv.touch_all_watched(dbi);
    srv.dbs[dbi].clear_keyspace();
    Reply::ok()
}

fn cmd_swapdb(srv: &mut Server, _sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let (a, b) = match (parse_i64(&argv[1]), parse_i64(&argv[2])) {
        (Some(a), Some(b)) => (a, b),
        _ => return Reply::err("ERR invalid first DB index"),
    };
    let (a, b) = (a as usize, b as usize);
    if a >= srv.dbs.len() || b >= srv.dbs.len() {
        return Reply::err("ERR DB index is out of range");
    }
    if a == b {
        return Reply::ok();
    }
    // Watchers are invalidated for keys present in either keyspace; the
    // watch registries themselves stay with their database slots.
    srv.touch_watched_for_swap(a, b);
    let (lo, hi) = (a.min(b), a.max(b));
    let (left, right) = srv.dbs.split_at_mut(hi);
    std::mem::swap(&mut left[lo].dict, &mut right[0].dict);
    std::mem::swap(&mut left[lo].expires, &mut right[0].expires);
    Reply::ok()
}

fn cmd_shutdown(srv: &mut Server, _sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    srv.shutdown = true;
    Reply::ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Strings and keyspace
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_set(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    srv.dbs[dbi].dict.replace(key.clone(), Object::Str(argv[2].clone()));
    srv.dbs[dbi].expires.delete(&key);
    srv.touch_watched_key(dbi, &key);
    Reply::ok()
}

fn cmd_get(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Nil;
    }
    match srv.dbs[dbi].dict.get(&key) {
        Some(Object::Str(v)) => Reply::Bulk(v.clone()),
        Some(_) => Reply::wrong_type(),
        None => Reply::Nil,
    }
}

fn cmd_del(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let mut removed = 0i64;
    for key in &argv[1..] {
        if srv.key_live(dbi, key) && srv.dbs[dbi].remove_key(key) {
            srv.touch_watched_key(dbi, key);
            removed += 1;
        }
    }
    Reply::Int(removed)
}

fn cmd_exists(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let mut count = 0i64;
    for key in &argv[1..] {
        if srv.key_live(dbi, key) {
            count += 1;
        }
    }
    Reply::Int(count)
}

fn cmd_type(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Simple("none".to_string());
    }
    match srv.dbs[dbi].dict.get(&key) {
        Some(obj) => Reply::Simple(obj.type_name().to_string()),
        None => Reply::Simple("none".to_string()),
    }
}

fn generic_expire(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>], unit_ms: i64) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    let ttl = match parse_i64(&argv[2]) {
        Some(t) => t,
        None => return Reply::err("ERR value is not an integer or out of range"),
    };
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    if ttl <= 0 {
        // Immediate expiry acts as a delete.
        srv.dbs[dbi].remove_key(&key);
        srv.touch_watched_key(dbi, &key);
        return Reply::Int(1);
    }
    let at = clock::now_ms().saturating_add((ttl as u64).saturating_mul(unit_ms as u64));
    srv.dbs[dbi].expires.replace(key.clone(), at);
    srv.touch_watched_key(dbi, &key);
    Reply::Int(1)
}

fn cmd_expire(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_expire(srv, sid, argv, 1_000)
}

fn cmd_pexpire(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_expire(srv, sid, argv, 1)
}

fn generic_ttl(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>], in_seconds: bool) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(-2);
    }
    match srv.dbs[dbi].expire_at(&key) {
        None => Reply::Int(-1),
        Some(at) => {
            let remaining = at.saturating_sub(clock::now_ms()) as i64;
            if in_seconds {
                Reply::Int((remaining + 500) / 1_000)
            } else {
                Reply::Int(remaining)
            }
        }
    }
}

fn cmd_ttl(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_ttl(srv, sid, argv, true)
}

fn cmd_pttl(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_ttl(srv, sid, argv, false)
}

fn cmd_persist(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    if srv.dbs[dbi].expires.delete(&key).is_some() {
        srv.touch_watched_key(dbi, &key);
        Reply::Int(1)
    } else {
        Reply::Int(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Convert a packed integer set into a hash-table set.
fn set_convert(is: &IntSet) -> Dict<Key, ()> {
    let mut d = Dict::new();
    for v in is.iter() {
        d.add(v.to_string().into_bytes(), ());
    }
    d
}

fn cmd_sadd(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    srv.key_live(dbi, &key);
    let max_intset = srv.config.set_max_intset_entries;

    if !srv.dbs[dbi].dict.contains(&key) {
        // First member decides the starting representation.
        let obj = if parse_i64(&argv[2]).is_some() {
            Object::IntSet(IntSet::new())
        } else {
            Object::HashSet(Dict::new())
        };
        srv.dbs[dbi].dict.add(key.clone(), obj);
    }

    let mut added = 0i64;
    {
        let obj = srv.dbs[dbi].dict.get_mut(&key).unwrap();
        match obj {
            Object::IntSet(_) | Object::HashSet(_) => {}
            _ => return Reply::wrong_type(),
        }
        for member in &argv[2..] {
            let converted = match obj {
                Object::IntSet(is) => match parse_i64(member) {
                    Some(v) => {
                        if is.add(v) {
                            added += 1;
                        }
                        if is.len() > max_intset {
                            Some(set_convert(is))
                        } else {
                            None
                        }
                    }
                    None => {
                        let mut d = set_convert(is);
                        if d.add(member.clone(), ()) {
                            added += 1;
                        }
                        Some(d)
                    }
                },
                Object::HashSet(d) => {
                    if d.add(member.clone(), ()) {
                        added += 1;
                    }
                    None
                }
                _ => unreachable!(),
            };
            if let Some(d) = converted {
                *obj = Object::HashSet(d);
            }
        }
    }
    if added > 0 {
        srv.touch_watched_key(dbi, &key);
    }
    Reply::Int(added)
}

fn cmd_srem(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    let mut removed = 0i64;
    let now_empty;
    {
        let obj = match srv.dbs[dbi].dict.get_mut(&key) {
            Some(o) => o,
            None => return Reply::Int(0),
        };
        match obj {
            Object::IntSet(is) => {
                for member in &argv[2..] {
                    if let Some(v) = parse_i64(member) {
                        if is.remove(v) {
                            removed += 1;
                        }
                    }
                }
            }
            Object::HashSet(d) => {
                for member in &argv[2..] {
                    if d.delete(member).is_some() {
                        removed += 1;
                    }
                }
            }
            _ => return Reply::wrong_type(),
        }
        now_empty = obj.set_len() == 0;
    }
    if now_empty {
        srv.dbs[dbi].remove_key(&key);
    }
    if removed > 0 {
        srv.touch_watched_key(dbi, &key);
    }
    Reply::Int(removed)
}

fn cmd_sismember(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    match srv.dbs[dbi].dict.get_mut(&key) {
        Some(Object::IntSet(is)) => match parse_i64(&argv[2]) {
            Some(v) => Reply::Int(i64::from(is.find(v))),
            None => Reply::Int(0),
        },
        Some(Object::HashSet(d)) => Reply::Int(i64::from(d.contains(&argv[2]))),
        Some(_) => Reply::wrong_type(),
        None => Reply::Int(0),
    }
}

fn cmd_scard(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    match srv.dbs[dbi].dict.get(&key) {
        Some(obj @ (Object::IntSet(_) | Object::HashSet(_))) => Reply::Int(obj.set_len() as i64),
        Some(_) => Reply::wrong_type(),
        None => Reply::Int(0),
    }
}

fn cmd_smembers(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Array(Vec::new());
    }
    match srv.dbs[dbi].dict.get(&key) {
        Some(Object::IntSet(is)) => Reply::Array(
            is.iter()
                .map(|v| Reply::Bulk(v.to_string().into_bytes()))
                .collect(),
        ),
        Some(Object::HashSet(d)) => Reply::Array(
            d.iter().map(|(m, _)| Reply::Bulk(m.clone())).collect(),
        ),
        Some(_) => Reply::wrong_type(),
        None => Reply::Array(Vec::new()),
    }
}

fn cmd_srandmember(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Nil;
    }
    match srv.dbs[dbi].dict.get_mut(&key) {
        Some(Object::IntSet(is)) => match is.random_member() {
            Some(v) => Reply::Bulk(v.to_string().into_bytes()),
            None => Reply::Nil,
        },
        Some(Object::HashSet(d)) => match d.fair_random_entry() {
            Some((m, _)) => Reply::Bulk(m.clone()),
            None => Reply::Nil,
        },
        Some(_) => Reply::wrong_type(),
        None => Reply::Nil,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lists
// ─────────────────────────────────────────────────────────────────────────────

fn generic_push(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>], head: bool) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    srv.key_live(dbi, &key);
    if !srv.dbs[dbi].dict.contains(&key) {
        srv.dbs[dbi].dict.add(key.clone(), Object::List(PackList::new()));
    }
    let len;
    {
        let obj = srv.dbs[dbi].dict.get_mut(&key).unwrap();
        let pl = match obj {
            Object::List(pl) => pl,
            _ => return Reply::wrong_type(),
        };
        for value in &argv[2..] {
            if !pl.safe_to_add(value.len()) {
                return Reply::err("ERR list is too large to grow further");
            }
            let pushed = if head {
                pl.push_head(value)
            } else {
                pl.push_tail(value)
            };
            if pushed.is_err() {
                return Reply::err("ERR list is too large to grow further");
            }
        }
        len = pl.len();
    }
    srv.touch_watched_key(dbi, &key);
    Reply::Int(len as i64)
}

fn cmd_lpush(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_push(srv, sid, argv, true)
}

fn cmd_rpush(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_push(srv, sid, argv, false)
}

fn generic_pop(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>], head: bool) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Nil;
    }
    let value;
    let now_empty;
    {
        let obj = match srv.dbs[dbi].dict.get_mut(&key) {
            Some(o) => o,
            None => return Reply::Nil,
        };
        let pl = match obj {
            Object::List(pl) => pl,
            _ => return Reply::wrong_type(),
        };
        let off = if head {
            pl.head_offset()
        } else {
            pl.tail_entry_offset()
        };
        let off = match off {
            Some(o) => o,
            None => return Reply::Nil,
        };
        value = pl.get(off).unwrap().to_bytes();
        pl.delete(off);
        now_empty = pl.is_empty();
    }
    if now_empty {
        srv.dbs[dbi].remove_key(&key);
    }
    srv.touch_watched_key(dbi, &key);
    Reply::Bulk(value)
}

fn cmd_lpop(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_pop(srv, sid, argv, true)
}

fn cmd_rpop(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    generic_pop(srv, sid, argv, false)
}

fn with_list<T>(
    srv: &mut Server,
    sid: SessionId,
    key: &Key,
    f: impl FnOnce(&PackList) -> T,
) -> Result<Option<T>, Reply> {
    let dbi = srv.session(sid).db_index;
    if !srv.key_live(dbi, key) {
        return Ok(None);
    }
    match srv.dbs[dbi].dict.get(key) {
        Some(Object::List(pl)) => Ok(Some(f(pl))),
        Some(_) => Err(Reply::wrong_type()),
        None => Ok(None),
    }
}

fn cmd_llen(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    match with_list(srv, sid, &argv[1], |pl| pl.len() as i64) {
        Ok(Some(n)) => Reply::Int(n),
        Ok(None) => Reply::Int(0),
        Err(e) => e,
    }
}

fn cmd_lindex(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let idx = match parse_i64(&argv[2]) {
        Some(i) => i,
        None => return Reply::err("ERR value is not an integer or out of range"),
    };
    match with_list(srv, sid, &argv[1], |pl| {
        pl.index(idx).map(|off| pl.get(off).unwrap().to_bytes())
    }) {
        Ok(Some(Some(v))) => Reply::Bulk(v),
        Ok(_) => Reply::Nil,
        Err(e) => e,
    }
}

fn cmd_lrange(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let (start, stop) = match (parse_i64(&argv[2]), parse_i64(&argv[3])) {
        (Some(a), Some(b)) => (a, b),
        _ => return Reply::err("ERR value is not an integer or out of range"),
    };
    let out = with_list(srv, sid, &argv[1], |pl| {
        let len = pl.len() as i64;
        let mut start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        let mut items = Vec::new();
        if start > stop || start >= len {
            return items;
        }
        let mut off = pl.index(start);
        while let Some(o) = off {
            items.push(Reply::Bulk(pl.get(o).unwrap().to_bytes()));
            if start == stop {
                break;
            }
            start += 1;
            off = pl.next(o);
        }
        items
    });
    match out {
        Ok(Some(items)) => Reply::Array(items),
        Ok(None) => Reply::Array(Vec::new()),
        Err(e) => e,
    }
}

fn cmd_linsert(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let before = if argv[2].eq_ignore_ascii_case(b"BEFORE") {
        true
    } else if argv[2].eq_ignore_ascii_case(b"AFTER") {
        false
    } else {
        return Reply::err("ERR syntax error");
    };
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    let len;
    {
        let obj = match srv.dbs[dbi].dict.get_mut(&key) {
            Some(o) => o,
            None => return Reply::Int(0),
        };
        let pl = match obj {
            Object::List(pl) => pl,
            _ => return Reply::wrong_type(),
        };
        let head = match pl.head_offset() {
            Some(h) => h,
            None => return Reply::Int(0),
        };
        let pivot = match pl.find(head, &argv[3], 0) {
            Some(p) => p,
            None => return Reply::Int(-1),
        };
        let inserted = if before {
            pl.insert(pivot, &argv[4])
        } else {
            match pl.next(pivot) {
                Some(n) => pl.insert(n, &argv[4]),
                None => pl.push_tail(&argv[4]),
            }
        };
        if inserted.is_err() {
            return Reply::err("ERR list is too large to grow further");
        }
        len = pl.len();
    }
    srv.touch_watched_key(dbi, &key);
    Reply::Int(len as i64)
}

fn cmd_lrem(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let count = match parse_i64(&argv[2]) {
        Some(c) => c,
        None => return Reply::err("ERR value is not an integer or out of range"),
    };
    let needle = &argv[3];
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    let mut removed = 0i64;
    let now_empty;
    {
        let obj = match srv.dbs[dbi].dict.get_mut(&key) {
            Some(o) => o,
            None => return Reply::Int(0),
        };
        let pl = match obj {
            Object::List(pl) => pl,
            _ => return Reply::wrong_type(),
        };
        let limit = count.unsigned_abs();
        if count >= 0 {
            let mut cursor = pl.head_offset();
            while let Some(off) = cursor {
                if pl.entry_eq(off, needle) {
                    cursor = pl.delete(off);
                    removed += 1;
                    if count > 0 && removed as u64 == limit {
                        break;
                    }
                } else {
                    cursor = pl.next(off);
                }
            }
        } else {
            let mut cursor = pl.tail_entry_offset();
            while let Some(off) = cursor {
                let prev = pl.prev(off);
                if pl.entry_eq(off, needle) {
                    pl.delete(off);
                    removed += 1;
                    if removed as u64 == limit {
                        break;
                    }
                }
                cursor = prev;
            }
        }
        now_empty = pl.is_empty();
    }
    if now_empty {
        srv.dbs[dbi].remove_key(&key);
    }
    if removed > 0 {
        srv.touch_watched_key(dbi, &key);
    }
    Reply::Int(removed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Hashes
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_hset(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    if (argv.len() - 2) % 2 != 0 {
        return Reply::err("ERR wrong number of arguments for 'hset' command");
    }
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    srv.key_live(dbi, &key);
    if !srv.dbs[dbi].dict.contains(&key) {
        srv.dbs[dbi].dict.add(key.clone(), Object::Hash(Dict::new()));
    }
    let mut created = 0i64;
    {
        let obj = srv.dbs[dbi].dict.get_mut(&key).unwrap();
        let h = match obj {
            Object::Hash(h) => h,
            _ => return Reply::wrong_type(),
        };
        for pair in argv[2..].chunks(2) {
            if h.replace(pair[0].clone(), pair[1].clone()) {
                created += 1;
            }
        }
    }
    srv.touch_watched_key(dbi, &key);
    Reply::Int(created)
}

fn cmd_hget(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Nil;
    }
    match srv.dbs[dbi].dict.get_mut(&key) {
        Some(Object::Hash(h)) => match h.get(&argv[2]) {
            Some(v) => Reply::Bulk(v.clone()),
            None => Reply::Nil,
        },
        Some(_) => Reply::wrong_type(),
        None => Reply::Nil,
    }
}

fn cmd_hdel(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    let mut removed = 0i64;
    let now_empty;
    {
        let obj = match srv.dbs[dbi].dict.get_mut(&key) {
            Some(o) => o,
            None => return Reply::Int(0),
        };
        let h = match obj {
            Object::Hash(h) => h,
            _ => return Reply::wrong_type(),
        };
        for field in &argv[2..] {
            if h.delete(field).is_some() {
                removed += 1;
            }
        }
        now_empty = h.is_empty();
    }
    if now_empty {
        srv.dbs[dbi].remove_key(&key);
    }
    if removed > 0 {
        srv.touch_watched_key(dbi, &key);
    }
    Reply::Int(removed)
}

fn cmd_hlen(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Int(0);
    }
    match srv.dbs[dbi].dict.get(&key) {
        Some(Object::Hash(h)) => Reply::Int(h.len() as i64),
        Some(_) => Reply::wrong_type(),
        None => Reply::Int(0),
    }
}

fn cmd_hgetall(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let dbi = srv.session(sid).db_index;
    let key = argv[1].clone();
    if !srv.key_live(dbi, &key) {
        return Reply::Array(Vec::new());
    }
    match srv.dbs[dbi].dict.get(&key) {
        Some(Object::Hash(h)) => {
            let mut items = Vec::with_capacity(h.len() * 2);
            for (f, v) in h.iter() {
                items.push(Reply::Bulk(f.clone()));
                items.push(Reply::Bulk(v.clone()));
            }
            Reply::Array(items)
        }
        Some(_) => Reply::wrong_type(),
        None => Reply::Array(Vec::new()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyspace scan
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_scan(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    let cursor: u64 = match std::str::from_utf8(&argv[1]).ok().and_then(|s| s.parse().ok()) {
        Some(c) => c,
        None => return Reply::err("ERR invalid cursor"),
    };
    let mut count = 10usize;
    if argv.len() > 2 {
        if argv.len() != 4 || !argv[2].eq_ignore_ascii_case(b"COUNT") {
            return Reply::err("ERR syntax error");
        }
        count = match parse_i64(&argv[3]) {
            Some(c) if c > 0 => c as usize,
            _ => return Reply::err("ERR syntax error"),
        };
    }

    let dbi = srv.session(sid).db_index;
    let mut keys: Vec<Key> = Vec::new();
    let mut cursor = cursor;
    loop {
        cursor = srv.dbs[dbi].dict.scan(cursor, |k, _| keys.push(k.clone()));
        if cursor == 0 || keys.len() >= count {
            break;
        }
    }
    // Filter keys that are past their deadline; the scan contract already
    // allows transient keys to show, but an expired key should not.
    let now = clock::now_ms();
    let db = &mut srv.dbs[dbi];
    keys.retain(|k| !db.is_expired(k, now));

    Reply::Array(vec![
        Reply::Bulk(cursor.to_string().into_bytes()),
        Reply::Array(keys.into_iter().map(Reply::Bulk).collect()),
    ])
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
