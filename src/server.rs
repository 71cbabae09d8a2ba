//! Server state and reactor wiring.
//!
//! `Server` owns the databases and the session registry; the network layer
//! runs entirely on the reactor: a nonblocking acceptor, per-connection
//! read handlers, reply buffers flushed from the before-sleep hook (with a
//! WRITABLE registration as the fallback when a socket blocks), and an
//! active-expiry time event.
//!
//! Input framing is inline text: one command per line, arguments split on
//! whitespace. Replies use the single-byte-prefixed text form produced by
//! [`Reply::serialize`](crate::command::Reply).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::cell::RefCell;

use crate::clock;
use crate::config::{Config, EXPIRE_CYCLE_LOOKUPS, EXPIRE_CYCLE_PERIOD_MS};
use crate::db::{Db, Key};
use crate::dict::Dict;
use crate::event::{EventError, EventLoop, TimerNext, READABLE, WRITABLE};

pub type SessionId = u64;

/// Per-session state: selected database, transaction flags and queue,
/// watched keys, pending output.
pub struct Session {
    pub id: SessionId,
    pub db_index: usize,
    pub in_multi: bool,
    pub dirty_cas: bool,
    pub dirty_queue: bool,
    pub multi_queue: Vec<QueuedCommand>,
    /// (database index, key) pairs this session WATCHes, for O(watched)
    /// teardown.
    pub watched: Vec<(usize, Key)>,
    /// Commands this session may not run; the exec-time re-check surfaces
    /// NOPERM when an entry lands between queue and EXEC.
    pub denied: Vec<String>,
    /// Bytes awaiting the socket.
    pub out: Vec<u8>,
    /// Close after the output drains.
    pub closing: bool,
}

/// A command buffered between MULTI and EXEC.
pub struct QueuedCommand {
    /// Index into the command table.
    pub cmd: usize,
    pub argv: Vec<Vec<u8>>,
}

impl Session {
    fn new(id: SessionId) -> Session {
        Session {
            id,
            db_index: 0,
            in_multi: false,
            dirty_cas: false,
            dirty_queue: false,
            multi_queue: Vec::new(),
            watched: Vec::new(),
            denied: Vec::new(),
            out: Vec::new(),
            closing: false,
        }
    }

    /// Leave transaction state entirely (queue, flags).
    pub fn reset_multi(&mut self) {
        self.multi_queue.clear();
        self.in_multi = false;
        self.dirty_cas = false;
        self.dirty_queue = false;
    }

    /// Test hook: deny a command for this session.
    pub fn deny(&mut self, cmd: &str) {
        self.denied.push(cmd.to_ascii_uppercase());
    }

    pub fn is_denied(&self, cmd: &str) -> bool {
        self.denied.iter().any(|d| d == cmd)
    }
}

struct Conn {
    stream: TcpStream,
    sid: SessionId,
    inbuf: Vec<u8>,
}

/// The server: databases, sessions, connections, listener.
pub struct Server {
    pub config: Config,
    pub dbs: Vec<Db>,
    pub sessions: Dict<u64, Session>,
    conns: Dict<u64, Conn>,
    next_session_id: SessionId,
    listener: Option<TcpListener>,
    /// Set by SHUTDOWN; the reactor glue stops the loop when it sees it.
    pub shutdown: bool,
}

impl Server {
    pub fn new(config: Config) -> Server {
        let mut dbs = Vec::with_capacity(config.databases);
        dbs.resize_with(config.databases, Db::new);
        Server {
            config,
            dbs,
            sessions: Dict::new(),
            conns: Dict::new(),
            next_session_id: 1,
            listener: None,
            shutdown: false,
        }
    }

    // ── sessions ────────────────────────────────────────────────────────────

    pub fn session_create(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.add(id, Session::new(id));
        id
    }

    /// Tear a session down: unwatch everything, drop any open transaction.
    pub fn session_free(&mut self, sid: SessionId) {
        self.unwatch_all(sid);
        self.sessions.delete(&sid);
    }

    pub fn session(&mut self, sid: SessionId) -> &mut Session {
        self.sessions
            .get_mut(&sid)
            .expect("session id out of nowhere")
    }

    // ── watch invalidation ──────────────────────────────────────────────────

    /// Flag every watcher of `key` dirty. Call on every mutation path,
    /// including observed expiry.
    pub fn touch_watched_key(&mut self, db_index: usize, key: &Key) {
        if self.dbs[db_index].watched.is_empty() {
            return;
        }
        let watchers: Vec<SessionId> = match self.dbs[db_index].watched.get(key) {
            Some(sids) => sids.clone(),
            None => return,
        };
        for sid in watchers {
            if let Some(s) = self.sessions.get_mut(&sid) {
                s.dirty_cas = true;
            }
        }
    }

    /// Flag every watcher of every watched key in the database (full
    /// flush).
    pub fn touch_all_watched(&mut self, db_index: usize) {
        let mut dirty: Vec<SessionId> = Vec::new();
        for (_key, sids) in self.dbs[db_index].watched.iter() {
            dirty.extend_from_slice(sids);
        }
        for sid in dirty {
            if let Some(s) = self.sessions.get_mut(&sid) {
                s.dirty_cas = true;
            }
        }
    }

    /// Database swap invalidation: a watched key counts only when it exists
    /// in either of the two swapped keyspaces.
    pub fn touch_watched_for_swap(&mut self, a: usize, b: usize) {
        let mut dirty: Vec<SessionId> = Vec::new();
        for db_index in [a, b] {
            let (this, other) = (db_index, if db_index == a { b } else { a });
            let mut hits: Vec<(Key, Vec<SessionId>)> = Vec::new();
            for (key, sids) in self.dbs[this].watched.iter() {
                hits.push((key.clone(), sids.clone()));
            }
            for (key, sids) in hits {
                if self.dbs[this].dict.contains(&key) || self.dbs[other].dict.contains(&key) {
                    dirty.extend(sids);
                }
            }
        }
        for sid in dirty {
            if let Some(s) = self.sessions.get_mut(&sid) {
                s.dirty_cas = true;
            }
        }
    }

    // ── expiry ──────────────────────────────────────────────────────────────

    /// Lazy expiry: delete `key` if its deadline passed, flagging watchers.
    /// Returns `true` when the key is (still) live.
    pub fn key_live(&mut self, db_index: usize, key: &Key) -> bool {
        if !self.dbs[db_index].dict.contains(key) {
            return false;
        }
        if self.dbs[db_index].is_expired(key, clock::now_ms()) {
            self.dbs[db_index].remove_key(key);
            self.touch_watched_key(db_index, key);
            return false;
        }
        true
    }

    /// One active-expiry pass: sample the expires table of every database
    /// and delete what is overdue.
    pub fn expire_cycle(&mut self) {
        let now = clock::now_ms();
        for db_index in 0..self.dbs.len() {
            if self.dbs[db_index].expires.is_empty() {
                continue;
            }
            let sampled: Vec<(Key, u64)> = self.dbs[db_index]
                .expires
                .some_entries(EXPIRE_CYCLE_LOOKUPS)
                .into_iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            let mut removed = 0usize;
            for (key, at) in sampled {
                if at <= now {
                    self.dbs[db_index].remove_key(&key);
                    self.touch_watched_key(db_index, &key);
                    removed += 1;
                }
            }
            if removed > 0 {
                log::debug!("expire cycle: db{db_index} removed {removed} keys");
            }
        }
    }

    // ── network ─────────────────────────────────────────────────────────────

    /// Bind the listening socket. With port 0 the OS picks one; read it
    /// back via [`local_port`](Server::local_port).
    pub fn listen(&mut self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&addr)?;
        listener.set_nonblocking(true)?;
        log::info!("listening on {}", listener.local_addr()?);
        self.listener = Some(listener);
        Ok(())
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reactor glue
// ─────────────────────────────────────────────────────────────────────────────

/// Shared server handle for reactor closures.
pub type ServerHandle = Rc<RefCell<Server>>;

/// Wire a listening server into the loop: acceptor, before-sleep flush,
/// expiry cron. The server must have called [`Server::listen`] first.
pub fn install(server: ServerHandle, el: &mut EventLoop) -> Result<(), EventError> {
    let listen_fd = {
        let srv = server.borrow();
        srv.listener
            .as_ref()
            .expect("install before listen")
            .as_raw_fd()
    };

    // Acceptor.
    {
        let srv = server.clone();
        el.register_file(
            listen_fd,
            READABLE,
            Rc::new(move |el, _fd, _mask| accept_ready(&srv, el)),
        )?;
    }

    // Reply buffers flush on the way into the backend poll.
    {
        let srv = server.clone();
        el.set_before_sleep(Some(Rc::new(move |el| flush_all_pending(&srv, el))));
    }

    // Active expiry.
    {
        let srv = server.clone();
        el.create_time_event(
            EXPIRE_CYCLE_PERIOD_MS,
            Rc::new(move |el, _id| {
                let mut s = srv.borrow_mut();
                s.expire_cycle();
                if s.shutdown {
                    el.stop();
                }
                TimerNext::Retry(EXPIRE_CYCLE_PERIOD_MS)
            }),
            None,
        );
    }
    Ok(())
}

fn accept_ready(server: &ServerHandle, el: &mut EventLoop) {
    loop {
        let accepted = {
            let srv = server.borrow();
            srv.listener.as_ref().unwrap().accept()
        };
        match accepted {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(true).is_err() {
                    continue;
                }
                let fd = stream.as_raw_fd();
                let sid = {
                    let mut srv = server.borrow_mut();
                    let sid = srv.session_create();
                    srv.conns.add(
                        fd as u64,
                        Conn {
                            stream,
                            sid,
                            inbuf: Vec::new(),
                        },
                    );
                    sid
                };
                let srv = server.clone();
                let registered = el.register_file(
                    fd,
                    READABLE,
                    Rc::new(move |el, fd, _mask| conn_readable(&srv, el, fd)),
                );
                match registered {
                    Ok(()) => log::debug!("session {sid} connected from {peer}"),
                    Err(e) => {
                        log::warn!("cannot register fd {fd}: {e:?}");
                        let mut srv = server.borrow_mut();
                        srv.conns.delete(&(fd as u64));
                        srv.session_free(sid);
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                log::warn!("accept failed: {e}");
                break;
            }
        }
    }
}

/// Split buffered input into whitespace-separated argument vectors, one
/// command per line.
fn split_lines(inbuf: &mut Vec<u8>) -> Vec<Vec<Vec<u8>>> {
    let mut commands = Vec::new();
    while let Some(nl) = inbuf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = inbuf.drain(..=nl).collect();
        let line = &line[..line.len() - 1];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let argv: Vec<Vec<u8>> = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| part.to_vec())
            .collect();
        if !argv.is_empty() {
            commands.push(argv);
        }
    }
    commands
}

fn conn_readable(server: &ServerHandle, el: &mut EventLoop, fd: RawFd) {
    let mut closed = false;
    let commands;
    let sid;
    {
        let mut srv = server.borrow_mut();
        let conn = match srv.conns.get_mut(&(fd as u64)) {
            Some(c) => c,
            None => return,
        };
        sid = conn.sid;
        let mut buf = [0u8; 4096];
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => conn.inbuf.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("session {}: read error: {e}", conn.sid);
                    closed = true;
                    break;
                }
            }
        }
        commands = split_lines(&mut srv.conns.get_mut(&(fd as u64)).unwrap().inbuf);
    }

    for argv in commands {
        let reply = server.borrow_mut().dispatch(sid, argv);
        let mut srv = server.borrow_mut();
        let mut out = Vec::new();
        reply.serialize(&mut out);
        if let Some(s) = srv.sessions.get_mut(&sid) {
            s.out.extend_from_slice(&out);
        }
        if srv.shutdown {
            el.stop();
        }
    }

    flush_conn(server, el, fd);

    let should_close = closed || {
        let mut srv = server.borrow_mut();
        srv.sessions
            .get_mut(&sid)
            .map(|s| s.closing && s.out.is_empty())
            .unwrap_or(true)
    };
    if should_close {
        close_conn(server, el, fd);
    }
}

fn conn_writable(server: &ServerHandle, el: &mut EventLoop, fd: RawFd) {
    flush_conn(server, el, fd);
    let done = {
        let mut srv = server.borrow_mut();
        let sid = match srv.conns.get_mut(&(fd as u64)) {
            Some(c) => c.sid,
            None => return,
        };
        srv.sessions
            .get_mut(&sid)
            .map(|s| s.closing && s.out.is_empty())
            .unwrap_or(true)
    };
    if done {
        close_conn(server, el, fd);
    }
}

/// Push a session's buffered output down its socket; on a partial write,
/// arm WRITABLE so the loop finishes the job.
fn flush_conn(server: &ServerHandle, el: &mut EventLoop, fd: RawFd) {
    let mut blocked = false;
    {
        let mut srv = server.borrow_mut();
        let sid = match srv.conns.get_mut(&(fd as u64)) {
            Some(c) => c.sid,
            None => return,
        };
        let mut out = match srv.sessions.get_mut(&sid) {
            Some(s) => std::mem::take(&mut s.out),
            None => return,
        };
        while !out.is_empty() {
            let conn = srv.conns.get_mut(&(fd as u64)).unwrap();
            match conn.stream.write(&out) {
                Ok(0) => break,
                Ok(n) => {
                    out.drain(..n);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    blocked = true;
                    break;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("session {sid}: write error: {e}");
                    out.clear();
                    break;
                }
            }
        }
        if let Some(s) = srv.sessions.get_mut(&sid) {
            s.out = out;
        }
    }
    if blocked {
        let srv = server.clone();
        let _ = el.register_file(
            fd,
            WRITABLE,
            Rc::new(move |el, fd, _mask| conn_writable(&srv, el, fd)),
        );
    } else {
        el.unregister_file(fd, WRITABLE);
    }
}

/// before-sleep: drain every session with pending output.
fn flush_all_pending(server: &ServerHandle, el: &mut EventLoop) {
    let fds: Vec<RawFd> = {
        let srv = server.borrow();
        srv.conns.iter().map(|(fd, _)| *fd as RawFd).collect()
    };
    for fd in fds {
        let has_output = {
            let mut srv = server.borrow_mut();
            let sid = match srv.conns.get_mut(&(fd as u64)) {
                Some(c) => c.sid,
                None => continue,
            };
            srv.sessions
                .get_mut(&sid)
                .map(|s| !s.out.is_empty())
                .unwrap_or(false)
        };
        if has_output {
            flush_conn(server, el, fd);
        }
    }
}

fn close_conn(server: &ServerHandle, el: &mut EventLoop, fd: RawFd) {
    el.unregister_file(fd, READABLE | WRITABLE);
    let mut srv = server.borrow_mut();
    if let Some(conn) = srv.conns.delete(&(fd as u64)) {
        log::debug!("session {} disconnected", conn.sid);
        srv.session_free(conn.sid);
        // conn.stream drops here and closes the socket.
    }
}
