//! Pool configuration structures.

use serde::{Deserialize, Serialize};

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Worker threads to spawn at startup. Defaults to the number of
    /// available processing units.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Upper bound for runtime resizing. Defaults to `worker_count`.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Stack size per worker thread, in bytes.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_workers: None,
            thread_stack_size: default_stack_size(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial worker count.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the resize upper bound.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the per-worker stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if let Some(max) = self.max_workers {
            if max < self.worker_count {
                return Err("max_workers must be >= worker_count".into());
            }
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }

    /// Parse a pool configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
