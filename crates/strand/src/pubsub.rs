//! Publish/subscribe fan-out with a dedicated delivery thread.
//!
//! [`PubSub::publish`] only enqueues, so publishers never wait for
//! subscribers. One delivery thread per instance takes values in publish
//! order and calls every subscriber in turn, in name order.
//!
//! Subscribers are not isolated from each other: a callback that blocks or
//! panics stalls or ends delivery for everyone.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::active::Mailbox;
use crate::config::ThreadConfig;
use crate::error::StrandResult;
use crate::queue::SafeQueue;
use crate::worker::Worker;

/// Subscriber callback.
pub type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Named set of subscribers.
///
/// A fan-out pass copies the callbacks out under the lock and invokes them
/// with the lock released, so a callback may subscribe or unsubscribe any
/// name, itself included. Such changes apply from the next value on.
pub struct Topic<T> {
    subscribers: Mutex<BTreeMap<String, Subscriber<T>>>,
}

impl<T> Topic<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Adds or replaces the subscriber registered under `name`.
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let name = name.into();
        log::debug!("subscribe `{name}`");
        self.subscribers.lock().insert(name, Arc::new(callback));
    }

    /// Removes `name`; returns whether it was subscribed.
    pub fn unsubscribe(&self, name: &str) -> bool {
        let removed = self.subscribers.lock().remove(name).is_some();
        if removed {
            log::debug!("unsubscribe `{name}`");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.subscribers.lock().contains_key(name)
    }

    /// Invokes every current subscriber with `value`. Returns how many ran.
    pub fn deliver(&self, value: &T) -> usize {
        let snapshot: Vec<(String, Subscriber<T>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(name, callback)| (name.clone(), Arc::clone(callback)))
            .collect();
        for (name, callback) in &snapshot {
            log::trace!("delivering to `{name}`");
            callback(value);
        }
        snapshot.len()
    }

    fn clear(&self) {
        self.subscribers.lock().clear();
    }
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.subscribers.lock().keys().cloned().collect();
        f.debug_struct("Topic").field("subscribers", &names).finish()
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Whether a [`PubSub`] remembers the last delivered value.
pub trait Retention: sealed::Sealed + Send + Sync + 'static {
    const KEEP_LAST: bool;
}

/// Values are forgotten once delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

/// The most recently delivered value is kept for [`PubSub::last`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLast;

impl sealed::Sealed for Discard {}
impl sealed::Sealed for KeepLast {}

impl Retention for Discard {
    const KEEP_LAST: bool = false;
}

impl Retention for KeepLast {
    const KEEP_LAST: bool = true;
}

struct Shared<T> {
    queue: SafeQueue<T>,
    topic: Topic<T>,
    last: Mutex<Option<T>>,
    quit: AtomicBool,
}

/// Broadcast channel: non-blocking `publish`, serialized delivery.
///
/// `PubSub<T, KeepLast>` additionally offers [`last`](PubSub::last); the
/// method does not exist on the default `PubSub<T, Discard>`.
pub struct PubSub<T, R = Discard> {
    shared: Arc<Shared<T>>,
    worker: Worker,
    _retention: PhantomData<R>,
}

impl<T, R> PubSub<T, R>
where
    T: Send + 'static,
    R: Retention,
{
    /// Starts the delivery thread with the default name `"pubsub"`.
    pub fn new() -> StrandResult<Self> {
        Self::with_config(ThreadConfig::named("pubsub"))
    }

    pub fn with_config(config: ThreadConfig) -> StrandResult<Self> {
        let shared = Arc::new(Shared {
            queue: SafeQueue::new(),
            topic: Topic::new(),
            last: Mutex::new(None),
            quit: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = Worker::spawn(&config, move || deliver_loop::<T, R>(&worker_shared))?;
        Ok(Self {
            shared,
            worker,
            _retention: PhantomData,
        })
    }

    /// Enqueues `value` for delivery and returns immediately.
    pub fn publish(&self, value: T) {
        self.shared.queue.push(value);
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.shared.topic.subscribe(name, callback);
    }

    /// Forwards every value into an active object's inbox.
    pub fn subscribe_mailbox<E>(&self, name: impl Into<String>, mailbox: Mailbox<E>)
    where
        T: Clone + Into<E>,
        E: Send + 'static,
    {
        self.shared
            .topic
            .subscribe(name, move |value: &T| mailbox.push(value.clone().into()));
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.shared.topic.unsubscribe(name)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.topic.len()
    }

    /// Values published but not yet delivered.
    pub fn backlog(&self) -> usize {
        self.shared.queue.len()
    }

    /// Asks the delivery thread to exit and wakes it.
    ///
    /// The value being delivered, if any, finishes first; values still queued
    /// are dropped.
    pub fn stop(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.queue.signal();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(&mut self) -> StrandResult<()> {
        self.worker.join()
    }
}

impl<T: Clone> PubSub<T, KeepLast> {
    /// Most recently delivered value; `None` before the first delivery.
    pub fn last(&self) -> Option<T> {
        self.shared.last.lock().clone()
    }
}

impl<T, R> Drop for PubSub<T, R> {
    fn drop(&mut self) {
        if self.worker.is_joined() {
            return;
        }
        self.shared.quit.store(true, Ordering::Release);
        self.shared.queue.signal();
        // A subscriber dropping the last handle runs on the delivery thread.
        if !self.worker.is_current() {
            if let Err(err) = self.worker.join() {
                log::error!("{}: {err}", self.worker.name());
            }
        }
    }
}

impl<T, R> fmt::Debug for PubSub<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSub")
            .field("name", &self.worker.name())
            .field("topic", &self.shared.topic)
            .finish()
    }
}

fn deliver_loop<T, R: Retention>(shared: &Shared<T>) {
    while !shared.quit.load(Ordering::Acquire) {
        let Some(value) = shared.queue.wait_pop() else {
            continue;
        };
        shared.topic.deliver(&value);
        if R::KEEP_LAST {
            *shared.last.lock() = Some(value);
        }
    }
    shared.topic.clear();
    log::debug!("delivery thread exiting");
}
