//! epoll(7) readiness backend (Linux).

use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::event::{Mask, NONE, READABLE, WRITABLE};

/// epoll-backed poller. Interest is keyed by fd; the epoll data word
/// carries the fd back on wakeup.
pub struct EpollPoller {
    epoll: Epoll,
    events: Vec<EpollEvent>,
}

fn flags_for(mask: Mask) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if mask & READABLE != 0 {
        flags |= EpollFlags::EPOLLIN;
    }
    if mask & WRITABLE != 0 {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

impl EpollPoller {
    pub fn new(setsize: usize) -> nix::Result<EpollPoller> {
        Ok(EpollPoller {
            epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
            events: vec![EpollEvent::empty(); setsize],
        })
    }

    pub fn resize(&mut self, setsize: usize) {
        self.events.resize(setsize, EpollEvent::empty());
    }

    /// Register interest. `old_mask` decides between ADD and MOD;
    /// `merged_mask` is the full interest set after the call.
    pub fn add(&mut self, fd: RawFd, old_mask: Mask, merged_mask: Mask) -> nix::Result<()> {
        let bfd = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut ev = EpollEvent::new(flags_for(merged_mask), fd as u64);
        if old_mask == NONE {
            self.epoll.add(bfd, ev)
        } else {
            self.epoll.modify(bfd, &mut ev)
        }
    }

    /// Drop interest bits; a fully cleared fd leaves the epoll set.
    pub fn del(&mut self, fd: RawFd, remaining_mask: Mask) -> nix::Result<()> {
        let bfd = unsafe { BorrowedFd::borrow_raw(fd) };
        if remaining_mask == NONE {
            self.epoll.delete(bfd)
        } else {
            let mut ev = EpollEvent::new(flags_for(remaining_mask), fd as u64);
            self.epoll.modify(bfd, &mut ev)
        }
    }

    /// Block for readiness up to `timeout_ms` (`None` blocks indefinitely).
    /// Errors and `EINTR` yield an empty set.
    pub fn poll(&mut self, timeout_ms: Option<u64>) -> Vec<(RawFd, Mask)> {
        let timeout = match timeout_ms {
            Some(ms) => EpollTimeout::try_from(ms).unwrap_or(EpollTimeout::NONE),
            None => EpollTimeout::NONE,
        };
        let n = match self.epoll.wait(&mut self.events, timeout) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => {
                log::warn!("epoll wait failed: {e}");
                0
            }
        };
        let mut fired = Vec::with_capacity(n);
        for ev in &self.events[..n] {
            let flags = ev.events();
            let mut mask = NONE;
            if flags.contains(EpollFlags::EPOLLIN) {
                mask |= READABLE;
            }
            if flags.contains(EpollFlags::EPOLLOUT) {
                mask |= WRITABLE;
            }
            if flags.contains(EpollFlags::EPOLLERR) || flags.contains(EpollFlags::EPOLLHUP) {
                mask |= READABLE | WRITABLE;
            }
            fired.push((ev.data() as RawFd, mask));
        }
        fired
    }

    pub fn name(&self) -> &'static str {
        "epoll"
    }
}
