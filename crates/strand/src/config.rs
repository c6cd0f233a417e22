//! Worker thread configuration.
//!
//! Every primitive that owns a thread (active objects, state machines, pub/sub
//! delivery, work queues) is spawned from a [`ThreadConfig`].

use std::io;
use std::thread::{Builder, JoinHandle};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const DEFAULT_NAME: &str = "strand";

/// Configuration for a worker thread.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    /// Thread name, also used in log lines and trace records.
    pub name: String,
    /// Stack size in bytes; `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            stack_size: None,
        }
    }
}

impl ThreadConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ThreadConfigBuilder {
        ThreadConfigBuilder::default()
    }

    /// Default configuration with the given thread name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn spawn<F>(&self, body: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = Builder::new().name(self.name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(body)
    }
}

/// Builder for ergonomic thread configuration construction.
#[derive(Debug, Clone, Default)]
pub struct ThreadConfigBuilder {
    config: ThreadConfig,
}

impl ThreadConfigBuilder {
    /// Sets the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the stack size in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Builds the thread configuration.
    pub fn build(self) -> ThreadConfig {
        self.config
    }
}
