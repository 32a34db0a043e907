// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Tunable runtime settings.

use serde::{Deserialize, Serialize};

const DEFAULT_BATCH_SIZE: usize = 128;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Budget policy for synchronous hot loops.
///
/// `batch_size` bounds how many frames a drain loop may execute on the stack
/// before it must go through the scheduler again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionModelConfig {
    /// Maximum number of synchronous frames per scheduled slice.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ExecutionModelConfig {
    fn default() -> Self {
        ExecutionModelConfig {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Settings for the thread-pool scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. Order of actions is guaranteed only for a
    /// single worker.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Thread name prefix, useful when several pools coexist.
    #[serde(default)]
    pub name: Option<String>,

    /// Synchronous loop budget handed to operators running on this pool.
    #[serde(default)]
    pub execution_model: ExecutionModelConfig,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        ThreadPoolConfig {
            workers: default_workers(),
            name: None,
            execution_model: ExecutionModelConfig::default(),
        }
    }
}

impl ThreadPoolConfig {
    /// A pool with a single worker, i.e. with guaranteed action order.
    #[must_use]
    pub fn single_worker() -> Self {
        ThreadPoolConfig {
            workers: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_model_config_default_batch_size() {
        let config = ExecutionModelConfig::default();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_single_worker_config() {
        let config = ThreadPoolConfig::single_worker();
        assert_eq!(config.workers, 1);
    }
}
