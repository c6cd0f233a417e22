//! Owned worker thread handle shared by every thread-owning primitive.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::ThreadConfig;
use crate::error::{StrandError, StrandResult};

pub(crate) struct Worker {
    name: Arc<str>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(config: &ThreadConfig, body: F) -> StrandResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name: Arc<str> = Arc::from(config.name.as_str());
        let thread = config
            .spawn(body)
            .map_err(|err| StrandError::spawn(&name, err))?;
        log::debug!("{name}: spawned");
        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// True when called from the worker thread itself.
    pub(crate) fn is_current(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.thread.is_none()
    }

    pub(crate) fn join(&mut self) -> StrandResult<()> {
        let Some(handle) = self.thread.take() else {
            return Err(StrandError::AlreadyJoined {
                name: self.name.to_string(),
            });
        };
        handle.join().map_err(|_| StrandError::panicked(&self.name))?;
        log::debug!("{}: joined", self.name);
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = &self.thread {
            if !handle.is_finished() {
                log::warn!("{}: handle dropped while running, detaching", self.name);
            }
        }
    }
}
