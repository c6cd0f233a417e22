//! Single-threaded work queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ThreadConfig;
use crate::error::StrandResult;
use crate::queue::SafeQueue;
use crate::worker::Worker;

/// How long a shutting-down queue keeps waiting for more work.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(100);

struct Shared<M> {
    queue: SafeQueue<M>,
    quit: AtomicBool,
}

/// A thread that hands every pushed message to one handler, in push order.
///
/// Shutdown is graceful: once requested, the worker keeps processing until the
/// queue has stayed empty for the linger period, so messages pushed shortly
/// before (or during) shutdown are still handled.
pub struct WorkQueue<M> {
    shared: Arc<Shared<M>>,
    worker: Worker,
}

impl<M: Send + 'static> WorkQueue<M> {
    pub fn spawn<H>(handler: H) -> StrandResult<Self>
    where
        H: FnMut(M) + Send + 'static,
    {
        Self::spawn_with_config(ThreadConfig::named("work"), DEFAULT_LINGER, handler)
    }

    pub fn spawn_with_config<H>(
        config: ThreadConfig,
        linger: Duration,
        mut handler: H,
    ) -> StrandResult<Self>
    where
        H: FnMut(M) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: SafeQueue::new(),
            quit: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = Worker::spawn(&config, move || {
            let mut handled = 0usize;
            loop {
                let quitting = worker_shared.quit.load(Ordering::Acquire);
                let msg = if quitting {
                    linger_pop(&worker_shared.queue, linger)
                } else {
                    worker_shared.queue.wait_pop()
                };
                match msg {
                    Some(msg) => {
                        handler(msg);
                        handled += 1;
                    }
                    None if quitting => break,
                    None => {}
                }
            }
            log::debug!("work queue drained after {handled} message(s)");
        })?;
        Ok(Self { shared, worker })
    }

    pub fn push(&self, msg: M) {
        self.shared.queue.push(msg);
    }

    /// Messages not yet taken by the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Requests shutdown, lets the worker drain, and joins it.
    pub fn shutdown(&mut self) -> StrandResult<()> {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.queue.signal();
        self.worker.join()
    }
}

/// Waits up to `linger` for one more message. Wake signals do not cut the
/// wait short.
fn linger_pop<M>(queue: &SafeQueue<M>, linger: Duration) -> Option<M> {
    let deadline = Instant::now() + linger;
    loop {
        if let Some(msg) = queue.try_pop_until(deadline) {
            return Some(msg);
        }
        if Instant::now() >= deadline {
            return None;
        }
    }
}

impl<M> Drop for WorkQueue<M> {
    fn drop(&mut self) {
        if self.worker.is_joined() || self.worker.is_current() {
            return;
        }
        self.shared.quit.store(true, Ordering::Release);
        self.shared.queue.signal();
        if let Err(err) = self.worker.join() {
            log::error!("{}: {err}", self.worker.name());
        }
    }
}

impl<M> fmt::Debug for WorkQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.worker.name())
            .field("pending", &self.shared.queue.len())
            .finish()
    }
}
