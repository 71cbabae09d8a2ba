//! Transaction coordinator: MULTI/EXEC command queueing with optimistic
//! watch-set invalidation.
//!
//! A session in MULTI has its commands buffered by dispatch; EXEC replays
//! the buffer as one uninterruptible sequence (the reactor is single
//! threaded, so nothing interleaves). There is no rollback: a runtime error
//! inside the batch does not stop the rest. Correctness is optimistic:
//! WATCH registers interest in keys, any mutation to a watched key flags
//! the watchers' `dirty_cas`, and a dirty EXEC returns the null array
//! instead of running.
//!
//! Queue-time failures (unknown command, bad arity, lost permission) set
//! `dirty_queue`; that EXEC aborts with an error instead.

use crate::command::Reply;
use crate::db::Key;
use crate::server::{Server, SessionId};

impl Server {
    /// Register `sid`'s interest in a key. Idempotent per (session, db,
    /// key).
    pub fn watch_key(&mut self, sid: SessionId, db_index: usize, key: Key) {
        let already = self
            .session(sid)
            .watched
            .iter()
            .any(|(d, k)| *d == db_index && *k == key);
        if already {
            return;
        }
        self.session(sid).watched.push((db_index, key.clone()));
        match self.dbs[db_index].watched.get_mut(&key) {
            Some(sids) => sids.push(sid),
            None => {
                self.dbs[db_index].watched.add(key, vec![sid]);
            }
        }
    }

    /// Drop every watch this session holds. O(watched keys of the
    /// session), not of the keyspace.
    pub fn unwatch_all(&mut self, sid: SessionId) {
        let watched = match self.sessions.get_mut(&sid) {
            Some(s) => std::mem::take(&mut s.watched),
            None => return,
        };
        for (db_index, key) in watched {
            let now_empty = match self.dbs[db_index].watched.get_mut(&key) {
                Some(sids) => {
                    sids.retain(|&s| s != sid);
                    sids.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.dbs[db_index].watched.delete(&key);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

pub fn cmd_multi(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    let s = srv.session(sid);
    if s.in_multi {
        return Reply::err("ERR MULTI calls can not be nested");
    }
    s.in_multi = true;
    Reply::ok()
}

pub fn cmd_watch(srv: &mut Server, sid: SessionId, argv: &[Vec<u8>]) -> Reply {
    if srv.session(sid).in_multi {
        return Reply::err("ERR WATCH inside MULTI is not allowed");
    }
    let db_index = srv.session(sid).db_index;
    for key in &argv[1..] {
        srv.watch_key(sid, db_index, key.clone());
    }
    Reply::ok()
}

pub fn cmd_unwatch(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    srv.unwatch_all(sid);
    srv.session(sid).dirty_cas = false;
    Reply::ok()
}

pub fn cmd_discard(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    if !srv.session(sid).in_multi {
        return Reply::err("ERR DISCARD without MULTI");
    }
    srv.unwatch_all(sid);
    srv.session(sid).reset_multi();
    Reply::ok()
}

pub fn cmd_exec(srv: &mut Server, sid: SessionId, _argv: &[Vec<u8>]) -> Reply {
    if !srv.session(sid).in_multi {
        return Reply::err("ERR EXEC without MULTI");
    }

    // A queueing error aborts; an invalidated watch returns the null
    // array. Both leave a clean session behind.
    if srv.session(sid).dirty_queue {
        srv.unwatch_all(sid);
        srv.session(sid).reset_multi();
        return Reply::err("EXECABORT Transaction discarded because of previous errors.");
    }
    if srv.session(sid).dirty_cas {
        srv.unwatch_all(sid);
        srv.session(sid).reset_multi();
        return Reply::NullArray;
    }

    // Watches end the moment execution is committed to.
    srv.unwatch_all(sid);

    let queued = std::mem::take(&mut srv.session(sid).multi_queue);
    let mut replies = Vec::with_capacity(queued.len());
    for q in &queued {
        // run_command re-checks permissions: NOPERM acquired since
        // queueing shows up inline in the reply array.
        replies.push(srv.run_command(q.cmd, sid, &q.argv));
    }
    srv.session(sid).reset_multi();
    Reply::Array(replies)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
