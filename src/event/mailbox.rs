//! Cross-thread submission into the single-threaded reactor.
//!
//! The containers and the loop itself assume exactly one mutator, so other
//! threads never touch them directly. Instead a [`Remote`] (clonable,
//! `Send`) enqueues closures on a channel and writes one byte to a
//! self-pipe; the loop's read handler drains the pipe and runs every queued
//! closure with `&mut EventLoop` on the reactor thread.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use super::{EventError, EventLoop, READABLE};

/// A job executed on the reactor thread.
pub type Job = Box<dyn FnOnce(&mut EventLoop) + Send + 'static>;

/// Sending half, handed to foreign threads.
#[derive(Clone)]
pub struct Remote {
    tx: Sender<Job>,
    wake: Arc<OwnedFd>,
}

impl Remote {
    /// Enqueue `job` and wake the loop. Jobs run in submission order at the
    /// loop's next pass.
    pub fn submit(&self, job: impl FnOnce(&mut EventLoop) + Send + 'static) {
        // A send can only fail once the loop side is gone; the job is then
        // dropped, which is the best available answer.
        let _ = self.tx.send(Box::new(job));
        // A full pipe is fine: one pending byte already guarantees a wake.
        let _ = nix::unistd::write(&*self.wake, &[1u8]);
    }
}

/// Receiving half: owns the pipe's read end and the queue. Kept alive by
/// the read handler closure.
pub struct Mailbox {
    read_fd: OwnedFd,
    jobs: Receiver<Job>,
}

impl Mailbox {
    /// Create the pipe pair, register the read end on `el`, and return the
    /// `Remote` for other threads.
    pub fn install(el: &mut EventLoop) -> Result<Remote, EventError> {
        let (read_fd, write_fd) = nix::unistd::pipe().map_err(|e| {
            log::warn!("mailbox pipe failed: {e}");
            EventError::Backend
        })?;
        for fd in [read_fd.as_raw_fd(), write_fd.as_raw_fd()] {
            fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(|e| {
                log::warn!("mailbox O_NONBLOCK failed: {e}");
                EventError::Backend
            })?;
        }
        let (tx, jobs) = unbounded::<Job>();
        let raw = read_fd.as_raw_fd();
        let mailbox = Rc::new(Mailbox { read_fd, jobs });

        el.register_file(
            raw,
            READABLE,
            Rc::new(move |el, fd, _mask| {
                mailbox.drain(el, fd);
            }),
        )?;

        Ok(Remote {
            tx,
            wake: Arc::new(write_fd),
        })
    }

    fn drain(&self, el: &mut EventLoop, fd: RawFd) {
        debug_assert_eq!(fd, self.read_fd.as_raw_fd());
        let mut buf = [0u8; 128];
        loop {
            match nix::unistd::read(fd, &mut buf) {
                Ok(n) if n == buf.len() => continue,
                _ => break,
            }
        }
        while let Ok(job) = self.jobs.try_recv() {
            job(el);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ALL_EVENTS, DONT_WAIT};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn jobs_run_on_the_loop_thread() {
        static RAN: AtomicU32 = AtomicU32::new(0);

        let mut el = EventLoop::new(64).unwrap();
        let remote = Mailbox::install(&mut el).unwrap();

        let handle = std::thread::spawn(move || {
            for _ in 0..3 {
                remote.submit(|_el| {
                    RAN.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        handle.join().unwrap();

        // All three jobs drain in one pass.
        el.process_events(ALL_EVENTS);
        assert_eq!(RAN.load(Ordering::SeqCst), 3);
        el.process_events(ALL_EVENTS | DONT_WAIT);
        assert_eq!(RAN.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn submitted_job_can_touch_the_loop() {
        let mut el = EventLoop::new(64).unwrap();
        let remote = Mailbox::install(&mut el).unwrap();
        std::thread::spawn(move || {
            remote.submit(|el| el.stop());
        })
        .join()
        .unwrap();
        // run() exits once the submitted stop lands.
        el.run();
    }
}
