//! poll(2) readiness backend: the portable fallback.
//!
//! Keeps its own fd -> interest registry and rebuilds the pollfd array on
//! every call; adequate for the fd counts this backend is expected to
//! serve.

use std::os::fd::{BorrowedFd, RawFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::event::{Mask, NONE, READABLE, WRITABLE};

pub struct PollPoller {
    /// Interest mask per fd, indexed by fd.
    interest: Vec<Mask>,
}

impl PollPoller {
    pub fn new(setsize: usize) -> nix::Result<PollPoller> {
        Ok(PollPoller {
            interest: vec![NONE; setsize],
        })
    }

    pub fn resize(&mut self, setsize: usize) {
        self.interest.resize(setsize, NONE);
    }

    pub fn add(&mut self, fd: RawFd, _old_mask: Mask, merged_mask: Mask) -> nix::Result<()> {
        self.interest[fd as usize] = merged_mask;
        Ok(())
    }

    pub fn del(&mut self, fd: RawFd, remaining_mask: Mask) -> nix::Result<()> {
        self.interest[fd as usize] = remaining_mask;
        Ok(())
    }

    pub fn poll(&mut self, timeout_ms: Option<u64>) -> Vec<(RawFd, Mask)> {
        let mut fds: Vec<PollFd> = Vec::new();
        let mut owners: Vec<RawFd> = Vec::new();
        for (fd, &mask) in self.interest.iter().enumerate() {
            if mask & (READABLE | WRITABLE) == 0 {
                continue;
            }
            let mut flags = PollFlags::empty();
            if mask & READABLE != 0 {
                flags |= PollFlags::POLLIN;
            }
            if mask & WRITABLE != 0 {
                flags |= PollFlags::POLLOUT;
            }
            let bfd = unsafe { BorrowedFd::borrow_raw(fd as RawFd) };
            fds.push(PollFd::new(bfd, flags));
            owners.push(fd as RawFd);
        }
        if fds.is_empty() && timeout_ms.is_none() {
            // Nothing registered and no timeout: nothing can ever fire.
            return Vec::new();
        }

        let timeout = match timeout_ms {
            Some(ms) => PollTimeout::try_from(ms).unwrap_or(PollTimeout::NONE),
            None => PollTimeout::NONE,
        };
        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Vec::new(),
            Err(e) => {
                log::warn!("poll failed: {e}");
                return Vec::new();
            }
        }

        let mut fired = Vec::new();
        for (pfd, &fd) in fds.iter().zip(&owners) {
            let revents = match pfd.revents() {
                Some(r) => r,
                None => continue,
            };
            let mut mask = NONE;
            if revents.contains(PollFlags::POLLIN) {
                mask |= READABLE;
            }
            if revents.contains(PollFlags::POLLOUT) {
                mask |= WRITABLE;
            }
            if revents.contains(PollFlags::POLLERR) || revents.contains(PollFlags::POLLHUP) {
                mask |= READABLE | WRITABLE;
            }
            if mask != NONE {
                fired.push((fd, mask));
            }
        }
        fired
    }

    pub fn name(&self) -> &'static str {
        "poll"
    }
}
