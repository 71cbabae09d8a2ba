//! Readiness backends behind one `Poller` name.
//!
//! The interface every backend provides:
//! `new(setsize)`, `resize(setsize)`, `add(fd, old_mask, merged_mask)`,
//! `del(fd, remaining_mask)`, `poll(timeout_ms) -> fired`, `name()`.
//!
//! epoll backs Linux hosts; every other Unix falls back to poll(2). Both
//! collapse backend errors into "no events this tick" (logged), and treat
//! `EINTR` as a spurious wake.

pub mod poll;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(target_os = "linux")]
pub use epoll::EpollPoller as Poller;

#[cfg(not(target_os = "linux"))]
pub use poll::PollPoller as Poller;
