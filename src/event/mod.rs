//! Event reactor: single-threaded multiplexing of fd readiness and timers.
//!
//! The loop owns its thread. One pass computes the poll timeout from the
//! nearest timer, runs the before-sleep hook, blocks in the backend, runs
//! the after-sleep hook, dispatches ready fds, then fires due timers.
//!
//! Handlers are `Rc` closures invoked with `&mut EventLoop`; they may
//! register or remove events, stop the loop, or recursively process events.
//! Nothing preempts a handler, so handlers must not block.
//!
//! Per-fd dispatch order is read-then-write unless the fd's mask carries
//! [`BARRIER`], which inverts it to write-then-read. The inversion lets an
//! application that persists in the before-sleep hook send its replies
//! before accepting new work that would generate more.
//!
//! Timer deletion is soft: the event is marked and swept on the next pass,
//! deferred while a recursive invocation holds a reference on it. A
//! backward wall-clock jump forces every pending timer to fire on the next
//! pass.

pub mod backend;
pub mod mailbox;

use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;

use nix::poll::{poll as nix_poll, PollFd, PollFlags, PollTimeout};

use crate::clock;
use backend::Poller;
pub use mailbox::{Mailbox, Remote};

// ─────────────────────────────────────────────────────────────────────────────
// Masks and flags
// ─────────────────────────────────────────────────────────────────────────────

/// Per-fd interest/readiness mask.
pub type Mask = u8;
pub const NONE: Mask = 0;
pub const READABLE: Mask = 1;
pub const WRITABLE: Mask = 2;
/// Inverts read/write dispatch order for the fd carrying it.
pub const BARRIER: Mask = 4;

/// `process_events` flag bits.
pub const FILE_EVENTS: i32 = 1;
pub const TIME_EVENTS: i32 = 2;
pub const ALL_EVENTS: i32 = FILE_EVENTS | TIME_EVENTS;
pub const DONT_WAIT: i32 = 4;
pub const CALL_BEFORE_SLEEP: i32 = 8;
pub const CALL_AFTER_SLEEP: i32 = 16;

/// Soft-deleted time events carry this id until the sweep frees them.
pub const DELETED_EVENT_ID: i64 = -1;

// ─────────────────────────────────────────────────────────────────────────────
// Handler types
// ─────────────────────────────────────────────────────────────────────────────

/// File event handler; receives the loop, the fd and the fired mask.
pub type FileProc = Rc<dyn Fn(&mut EventLoop, RawFd, Mask)>;

/// Before/after-sleep hook.
pub type SleepHook = Rc<dyn Fn(&mut EventLoop)>;

/// Time event handler; the return value reschedules or retires the event.
pub type TimeProc = Rc<dyn Fn(&mut EventLoop, TimeEventId) -> TimerNext>;

/// Runs exactly once when a time event is really freed.
pub type TimeFinalizer = Rc<dyn Fn(&mut EventLoop)>;

pub type TimeEventId = i64;

/// What a time event handler wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerNext {
    /// Fire again after this many milliseconds.
    Retry(u64),
    /// Delete the event.
    NoMore,
}

/// Errors surfaced by reactor registration calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    /// fd at or past the loop's fixed capacity.
    OutOfRange,
    /// Resize rejected: an fd at or past the new size is registered.
    ResizeBlocked,
    /// The backend rejected the registration.
    Backend,
    /// No time event with that id.
    NoSuchEvent,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FileEvent {
    mask: Mask,
    rfile_proc: Option<FileProc>,
    wfile_proc: Option<FileProc>,
}

struct TimeEvent {
    /// Public identifier; [`DELETED_EVENT_ID`] marks pending deletion.
    id: i64,
    /// Immutable copy of the creation id, so a soft-deleted event can still
    /// be located while a recursive invocation holds it.
    key: i64,
    when_ms: u64,
    proc_: TimeProc,
    finalizer: Option<TimeFinalizer>,
    /// Nonzero while handler frames reference the event; deletion defers.
    refcount: u32,
}

/// The reactor.
pub struct EventLoop {
    setsize: usize,
    maxfd: RawFd,
    events: Vec<FileEvent>,
    time_events: Vec<TimeEvent>,
    time_next_id: i64,
    /// Wall-clock sample from the previous timer pass, for skew detection.
    last_time_ms: u64,
    stop: bool,
    dont_wait: bool,
    poller: Poller,
    before_sleep: Option<SleepHook>,
    after_sleep: Option<SleepHook>,
}

impl EventLoop {
    /// A reactor able to track fds `0..setsize`.
    pub fn new(setsize: usize) -> Result<EventLoop, EventError> {
        let poller = Poller::new(setsize).map_err(|e| {
            log::warn!("reactor backend init failed: {e}");
            EventError::Backend
        })?;
        let mut events = Vec::with_capacity(setsize);
        events.resize_with(setsize, FileEvent::default);
        log::info!("reactor ready: backend={}, setsize={}", poller.name(), setsize);
        Ok(EventLoop {
            setsize,
            maxfd: -1,
            events,
            time_events: Vec::new(),
            time_next_id: 0,
            last_time_ms: clock::now_ms(),
            stop: false,
            dont_wait: false,
            poller,
            before_sleep: None,
            after_sleep: None,
        })
    }

    #[inline]
    pub fn setsize(&self) -> usize {
        self.setsize
    }

    /// Backend name, for logs and diagnostics.
    #[inline]
    pub fn backend_name(&self) -> &'static str {
        self.poller.name()
    }

    /// Ask the loop to exit after the current pass.
    #[inline]
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Force zero-timeout polling on every pass (clearable).
    #[inline]
    pub fn set_dont_wait(&mut self, dont_wait: bool) {
        self.dont_wait = dont_wait;
    }

    pub fn set_before_sleep(&mut self, hook: Option<SleepHook>) {
        self.before_sleep = hook;
    }

    pub fn set_after_sleep(&mut self, hook: Option<SleepHook>) {
        self.after_sleep = hook;
    }

    /// Grow or shrink fd capacity. Fails if any registered fd would fall
    /// outside the new range.
    pub fn resize(&mut self, setsize: usize) -> Result<(), EventError> {
        if setsize == self.setsize {
            return Ok(());
        }
        if self.maxfd >= setsize as RawFd {
            return Err(EventError::ResizeBlocked);
        }
        self.poller.resize(setsize);
        self.events.resize_with(setsize, FileEvent::default);
        self.setsize = setsize;
        Ok(())
    }

    // ── file events ─────────────────────────────────────────────────────────

    /// Register interest in `fd`. Mask bits are additive across calls; the
    /// handler is installed for whichever of READABLE/WRITABLE the mask
    /// names (BARRIER rides along as a flag).
    pub fn register_file(
        &mut self,
        fd: RawFd,
        mask: Mask,
        proc_: FileProc,
    ) -> Result<(), EventError> {
        if fd < 0 || fd as usize >= self.setsize {
            return Err(EventError::OutOfRange);
        }
        let old = self.events[fd as usize].mask;
        self.poller.add(fd, old, old | mask).map_err(|e| {
            log::warn!("backend add fd={fd} failed: {e}");
            EventError::Backend
        })?;
        let slot = &mut self.events[fd as usize];
        slot.mask |= mask;
        if mask & READABLE != 0 {
            slot.rfile_proc = Some(proc_.clone());
        }
        if mask & WRITABLE != 0 {
            slot.wfile_proc = Some(proc_);
        }
        if fd > self.maxfd {
            self.maxfd = fd;
        }
        Ok(())
    }

    /// Drop interest bits. Removing WRITABLE also removes BARRIER.
    pub fn unregister_file(&mut self, fd: RawFd, mask: Mask) {
        if fd < 0 || fd as usize >= self.setsize {
            return;
        }
        if self.events[fd as usize].mask == NONE {
            return;
        }
        let mut mask = mask;
        if mask & WRITABLE != 0 {
            mask |= BARRIER;
        }
        let remaining = self.events[fd as usize].mask & !mask;
        if let Err(e) = self.poller.del(fd, remaining) {
            log::warn!("backend del fd={fd} failed: {e}");
        }
        self.events[fd as usize].mask = remaining;
        if remaining == NONE && fd == self.maxfd {
            let mut j = fd - 1;
            while j >= 0 && self.events[j as usize].mask == NONE {
                j -= 1;
            }
            self.maxfd = j;
        }
    }

    /// Current interest mask of `fd`.
    pub fn get_file_mask(&self, fd: RawFd) -> Mask {
        if fd < 0 || fd as usize >= self.setsize {
            return NONE;
        }
        self.events[fd as usize].mask
    }

    // ── time events ─────────────────────────────────────────────────────────

    /// Schedule `proc_` after `delay_ms`. The finalizer, when given, runs
    /// exactly once when the event is really freed.
    pub fn create_time_event(
        &mut self,
        delay_ms: u64,
        proc_: TimeProc,
        finalizer: Option<TimeFinalizer>,
    ) -> TimeEventId {
        let id = self.time_next_id;
        self.time_next_id += 1;
        let te = TimeEvent {
            id,
            key: id,
            when_ms: clock::now_ms() + delay_ms,
            proc_,
            finalizer,
            refcount: 0,
        };
        self.time_events.insert(0, te);
        id
    }

    /// Soft-delete a time event; the next pass sweeps it (deferred while a
    /// recursive invocation still holds it).
    pub fn delete_time_event(&mut self, id: TimeEventId) -> Result<(), EventError> {
        for te in &mut self.time_events {
            if te.id == id {
                te.id = DELETED_EVENT_ID;
                return Ok(());
            }
        }
        Err(EventError::NoSuchEvent)
    }

    /// Earliest pending deadline, linear over the list.
    fn nearest_timer_ms(&self) -> Option<u64> {
        self.time_events
            .iter()
            .filter(|te| te.id != DELETED_EVENT_ID)
            .map(|te| te.when_ms)
            .min()
    }

    /// Drop events marked deleted whose refcount reached zero, running
    /// finalizers. A finalizer may mutate the list, so the scan restarts
    /// after each one.
    fn sweep_deleted(&mut self) {
        let mut i = 0;
        while i < self.time_events.len() {
            let te = &self.time_events[i];
            if te.id == DELETED_EVENT_ID && te.refcount == 0 {
                let te = self.time_events.remove(i);
                if let Some(fin) = te.finalizer {
                    fin(self);
                    i = 0;
                    continue;
                }
            } else {
                i += 1;
            }
        }
    }

    fn process_time_events(&mut self) -> usize {
        let mut processed = 0usize;
        let now = clock::now_ms();

        // Clock moved backward: force-fire everything rather than risk
        // timers stalling for the duration of the jump.
        if now < self.last_time_ms {
            log::warn!(
                "wall clock moved backward ({} -> {} ms); firing all timers",
                self.last_time_ms,
                now
            );
            for te in &mut self.time_events {
                te.when_ms = 0;
            }
        }
        self.last_time_ms = now;

        self.sweep_deleted();

        // Events created by handlers during this pass have keys above the
        // snapshot ceiling and do not fire until the next pass.
        let max_key = self.time_next_id - 1;
        let keys: Vec<i64> = self
            .time_events
            .iter()
            .filter(|te| te.key <= max_key)
            .map(|te| te.key)
            .collect();

        for key in keys {
            let pos = match self.time_events.iter().position(|te| te.key == key) {
                Some(p) => p,
                None => continue, // removed by a recursive pass
            };
            {
                let te = &self.time_events[pos];
                if te.id == DELETED_EVENT_ID || te.when_ms > clock::now_ms() {
                    continue;
                }
            }
            // Protect the event across the call: a handler deleting itself
            // (or a recursive pass sweeping) must not free it under us.
            self.time_events[pos].refcount += 1;
            let id = self.time_events[pos].id;
            let proc_ = self.time_events[pos].proc_.clone();
            let verdict = proc_(self, id);
            processed += 1;

            if let Some(pos) = self.time_events.iter().position(|te| te.key == key) {
                self.time_events[pos].refcount -= 1;
                match verdict {
                    TimerNext::Retry(ms) => {
                        self.time_events[pos].when_ms = clock::now_ms() + ms;
                    }
                    TimerNext::NoMore => {
                        self.time_events[pos].id = DELETED_EVENT_ID;
                    }
                }
            }
        }
        processed
    }

    // ── the pass ────────────────────────────────────────────────────────────

    /// One reactor pass. Returns the number of events processed.
    pub fn process_events(&mut self, flags: i32) -> usize {
        let mut processed = 0usize;

        if flags & ALL_EVENTS == 0 {
            return 0;
        }

        // Poll (and run hooks) when there are fds to watch, or when a
        // timed wait is wanted.
        if self.maxfd != -1 || (flags & TIME_EVENTS != 0 && flags & DONT_WAIT == 0) {
            // 1. Timeout from the nearest timer.
            let timeout_ms: Option<u64> = if flags & DONT_WAIT != 0 || self.dont_wait {
                Some(0)
            } else if flags & TIME_EVENTS != 0 {
                match self.nearest_timer_ms() {
                    Some(when) => Some(when.saturating_sub(clock::now_ms())),
                    None => None,
                }
            } else {
                None
            };

            // 2. Before-sleep hook.
            if flags & CALL_BEFORE_SLEEP != 0 {
                if let Some(hook) = self.before_sleep.clone() {
                    hook(self);
                }
            }

            // 3. Block for readiness.
            let fired = self.poller.poll(timeout_ms);

            // 4. After-sleep hook.
            if flags & CALL_AFTER_SLEEP != 0 {
                if let Some(hook) = self.after_sleep.clone() {
                    hook(self);
                }
            }

            // 5. Dispatch, honoring BARRIER inversion per fd.
            if flags & FILE_EVENTS != 0 {
                for (fd, fired_mask) in fired {
                    processed += self.dispatch_fd(fd, fired_mask);
                }
            }
        }

        // 6. Timers fire after the file events of the pass.
        if flags & TIME_EVENTS != 0 {
            processed += self.process_time_events();
        }
        processed
    }

    /// Whether the read and write handlers of a slot are the same closure.
    fn procs_equal(slot: &FileEvent) -> bool {
        match (&slot.rfile_proc, &slot.wfile_proc) {
            (Some(r), Some(w)) => Rc::ptr_eq(r, w),
            _ => false,
        }
    }

    fn dispatch_fd(&mut self, fd: RawFd, fired_mask: Mask) -> usize {
        let fdu = fd as usize;
        if fd < 0 || fdu >= self.events.len() {
            return 0;
        }
        let invert = self.events[fdu].mask & BARRIER != 0;
        let mut called = 0usize;

        if !invert && self.events[fdu].mask & fired_mask & READABLE != 0 {
            if let Some(p) = self.events[fdu].rfile_proc.clone() {
                p(self, fd, fired_mask);
                called += 1;
            }
        }

        // Handlers can resize the slot table; re-check bounds every stage.
        if fdu < self.events.len() && self.events[fdu].mask & fired_mask & WRITABLE != 0 {
            let dup = called > 0 && Self::procs_equal(&self.events[fdu]);
            if !dup {
                if let Some(p) = self.events[fdu].wfile_proc.clone() {
                    p(self, fd, fired_mask);
                    called += 1;
                }
            }
        }

        if invert && fdu < self.events.len() {
            let dup = called > 0 && Self::procs_equal(&self.events[fdu]);
            if self.events[fdu].mask & fired_mask & READABLE != 0 && !dup {
                if let Some(p) = self.events[fdu].rfile_proc.clone() {
                    p(self, fd, fired_mask);
                    called += 1;
                }
            }
        }
        usize::from(called > 0)
    }

    /// Run until [`stop`](EventLoop::stop), hooks included every pass.
    pub fn run(&mut self) {
        self.stop = false;
        while !self.stop {
            self.process_events(ALL_EVENTS | CALL_BEFORE_SLEEP | CALL_AFTER_SLEEP);
        }
    }
}

/// Synchronous one-shot wait for readiness on a single fd, outside any
/// loop. Returns the ready mask (empty on timeout or error).
pub fn wait_fd(fd: RawFd, mask: Mask, timeout_ms: u64) -> Mask {
    let mut flags = PollFlags::empty();
    if mask & READABLE != 0 {
        flags |= PollFlags::POLLIN;
    }
    if mask & WRITABLE != 0 {
        flags |= PollFlags::POLLOUT;
    }
    let bfd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(bfd, flags)];
    let timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::NONE);
    match nix_poll(&mut fds, timeout) {
        Ok(n) if n > 0 => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            let mut out = NONE;
            if revents.contains(PollFlags::POLLIN) {
                out |= READABLE;
            }
            if revents.contains(PollFlags::POLLOUT) {
                out |= WRITABLE;
            }
            if revents.contains(PollFlags::POLLERR) || revents.contains(PollFlags::POLLHUP) {
                out |= WRITABLE;
            }
            out
        }
        _ => NONE,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
