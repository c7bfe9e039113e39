//! SharedBoard - a board behind one mutex, plus its background workers.
//!
//! Every mutation goes through the same lock: local steps, inbound remote
//! messages and cache flushes. A flush therefore never sees a half-compiled
//! particle cache, and a remote return is applied between two local steps.
//!
//! # Example
//!
//! ```ignore
//! let mut transport = ChannelTransport::new();
//! let inbox = transport.register("left");
//! board.set_transport(Box::new(transport));
//!
//! let shared = SharedBoard::new(board);
//! let inbound = shared.spawn_inbound_worker(inbox);
//! let monitor = shared.spawn_cache_monitor(4096, Duration::from_secs(1));
//! for _ in 0..100 {
//!     shared.tick();
//! }
//! inbound.stop();
//! monitor.stop();
//! ```

use super::board::{Board, StepOutcome, UpdateStats};
use super::remote::RemoteMessage;
use async_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A board shared between the update loop and worker threads.
#[derive(Clone)]
pub struct SharedBoard {
    inner: Arc<Mutex<Board>>,
}

impl SharedBoard {
    pub fn new(board: Board) -> Self {
        Self {
            inner: Arc::new(Mutex::new(board)),
        }
    }

    /// Lock the board. A panic on another thread leaves the board in a
    /// committed state, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Board> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn step(&self) -> StepOutcome {
        self.lock().step()
    }

    pub fn update(&self, attempts: usize) -> UpdateStats {
        self.lock().update(attempts)
    }

    pub fn tick(&self) -> UpdateStats {
        self.lock().tick()
    }

    pub fn handle_message(&self, message: RemoteMessage) {
        self.lock().handle_message(message);
    }

    /// Run `f` with exclusive access to the board.
    pub fn with_board<R>(&self, f: impl FnOnce(&mut Board) -> R) -> R {
        f(&mut self.lock())
    }

    /// Drain `inbox` on a worker thread, applying each message under the
    /// board lock. The worker exits once the channel is closed and empty,
    /// either because every sender is gone or because the handle was stopped.
    pub fn spawn_inbound_worker(&self, inbox: Receiver<RemoteMessage>) -> WorkerHandle {
        let board = self.clone();
        let closer = inbox.clone();
        WorkerHandle::spawn_with_wake(
            move |_stop| {
                let mut handled = 0usize;
                while let Ok(message) = inbox.recv_blocking() {
                    board.handle_message(message);
                    handled += 1;
                }
                debug!("inbound worker exiting after {} messages", handled);
            },
            move || {
                closer.close();
            },
        )
    }

    /// Periodically flush particle caches once the registry holds more than
    /// `threshold` particles.
    pub fn spawn_cache_monitor(&self, threshold: usize, interval: Duration) -> WorkerHandle {
        let board = self.clone();
        WorkerHandle::spawn(move |stop| {
            while !stop.load(Ordering::Relaxed) {
                board.flush_if_larger_than(threshold);
                thread::sleep(interval);
            }
        })
    }

    /// Cache monitor using the board's `cache_flush_threshold` and
    /// `monitor_interval_ms`.
    pub fn spawn_configured_cache_monitor(&self) -> WorkerHandle {
        let (threshold, interval) = self.with_board(|b| {
            let config = b.config();
            (config.cache_flush_threshold, config.monitor_interval())
        });
        debug!("cache monitor: threshold {}, every {:?}", threshold, interval);
        self.spawn_cache_monitor(threshold, interval)
    }

    /// Flush caches if the registry holds more than `threshold` particles.
    /// Returns the number of particles evicted.
    pub fn flush_if_larger_than(&self, threshold: usize) -> usize {
        let mut board = self.lock();
        let size = board.registry_size();
        if size <= threshold {
            return 0;
        }
        let evicted = board.flush_caches();
        info!(
            "registry held {} particles (threshold {}), evicted {}",
            size, threshold, evicted
        );
        evicted
    }
}

/// A stoppable background thread.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    /// Unblocks a worker parked on something other than the stop flag.
    wake: Option<Box<dyn FnOnce() + Send>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn spawn<F>(body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || body(flag));
        Self {
            stop,
            wake: None,
            handle: Some(handle),
        }
    }

    fn spawn_with_wake<F, W>(body: F, wake: W) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
        W: FnOnce() + Send + 'static,
    {
        let mut handle = Self::spawn(body);
        handle.wake = Some(Box::new(wake));
        handle
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Ask the worker to exit and wait for it.
    pub fn stop(mut self) {
        self.signal_stop();
        self.join_inner();
    }

    /// Wait for the worker to exit on its own.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn signal_stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(wake) = self.wake.take() {
            wake();
        }
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.signal_stop();
        self.join_inner();
    }
}
