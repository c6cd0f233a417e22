//! Source-driven fan-out and point-to-point pumps.
//!
//! Both run a closure in a loop on their own thread, checking a quit flag
//! between iterations. Neither can interrupt a closure that is blocked: a
//! source or reader that never returns keeps its thread alive after
//! [`quit`](Broadcaster::quit), and a following `join` blocks with it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ThreadConfig;
use crate::error::StrandResult;
use crate::pubsub::Topic;
use crate::worker::Worker;

/// Polls a source closure and hands every produced value to all subscribers.
///
/// Unlike [`PubSub`](crate::pubsub::PubSub), nothing is queued: the source
/// and the subscribers run back to back on the broadcaster's thread.
pub struct Broadcaster<T> {
    topic: Arc<Topic<T>>,
    quit: Arc<AtomicBool>,
    worker: Worker,
}

impl<T: Send + 'static> Broadcaster<T> {
    pub fn spawn<S>(source: S) -> StrandResult<Self>
    where
        S: FnMut() -> T + Send + 'static,
    {
        Self::spawn_with_config(ThreadConfig::named("broadcaster"), source)
    }

    pub fn spawn_with_config<S>(config: ThreadConfig, mut source: S) -> StrandResult<Self>
    where
        S: FnMut() -> T + Send + 'static,
    {
        let topic = Arc::new(Topic::new());
        let quit = Arc::new(AtomicBool::new(false));

        let worker_topic = Arc::clone(&topic);
        let worker_quit = Arc::clone(&quit);
        let worker = Worker::spawn(&config, move || {
            while !worker_quit.load(Ordering::Acquire) {
                let value = source();
                worker_topic.deliver(&value);
            }
            log::debug!("broadcast loop exiting");
        })?;

        Ok(Self {
            topic,
            quit,
            worker,
        })
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.topic.subscribe(name, callback);
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.topic.unsubscribe(name)
    }

    pub fn subscriber_count(&self) -> usize {
        self.topic.len()
    }

    /// Requests the loop to end after the current source call returns.
    ///
    /// There is no way to wake a source that is blocked waiting for input;
    /// the request is only observed once it produces its next value.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(&mut self) -> StrandResult<()> {
        self.worker.join()
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("name", &self.worker.name())
            .field("topic", &self.topic)
            .finish()
    }
}

/// Moves values from a reader to a writer on a dedicated thread.
///
/// The pump ends when [`quit`](Self::quit) is observed or when the reader
/// returns `None`.
pub struct Connector {
    quit: Arc<AtomicBool>,
    worker: Worker,
}

impl Connector {
    pub fn spawn<T, R, W>(reader: R, writer: W) -> StrandResult<Self>
    where
        T: 'static,
        R: FnMut() -> Option<T> + Send + 'static,
        W: FnMut(&T) + Send + 'static,
    {
        Self::spawn_with_config(ThreadConfig::named("connector"), reader, writer)
    }

    pub fn spawn_with_config<T, R, W>(
        config: ThreadConfig,
        mut reader: R,
        mut writer: W,
    ) -> StrandResult<Self>
    where
        T: 'static,
        R: FnMut() -> Option<T> + Send + 'static,
        W: FnMut(&T) + Send + 'static,
    {
        let quit = Arc::new(AtomicBool::new(false));
        let worker_quit = Arc::clone(&quit);
        let worker = Worker::spawn(&config, move || {
            let mut moved = 0usize;
            while !worker_quit.load(Ordering::Acquire) {
                let Some(value) = reader() else {
                    log::debug!("reader exhausted after {moved} value(s)");
                    return;
                };
                writer(&value);
                moved += 1;
            }
            log::debug!("connector quit after {moved} value(s)");
        })?;
        Ok(Self { quit, worker })
    }

    /// Requests the pump to end after the current read/write pair.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(&mut self) -> StrandResult<()> {
        self.worker.join()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.worker.name())
            .field("quit", &self.quit.load(Ordering::Relaxed))
            .finish()
    }
}
