// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::io;

use serde::Deserialize;
use serde::Serialize;
use tokio::runtime::Runtime;

/// Sizing of the pool that runs connection tasks and handshake work.
///
/// Connections spawn their I/O tasks on whatever tokio runtime they are
/// built on; [`ThreadPoolConfig::build_runtime`] builds one sized from these
/// settings. `task_queue_depth` bounds how many delegated handshake tasks may
/// run at once across all connections sharing a
/// [`TaskExecutor`](crate::worker::TaskExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ThreadPoolConfig {
    /// Defaults to the number of CPUs, capped at 4.
    #[serde(default = "ThreadPoolConfig::default_worker_threads")]
    pub worker_threads: usize,

    /// Defaults to `16`.
    #[serde(default = "ThreadPoolConfig::default_max_blocking_threads")]
    pub max_blocking_threads: usize,

    /// Defaults to `64`.
    #[serde(default = "ThreadPoolConfig::default_task_queue_depth")]
    pub task_queue_depth: usize,

    /// Defaults to `"connector-worker"`.
    #[serde(default = "ThreadPoolConfig::default_thread_name")]
    pub thread_name: String,
}

impl ThreadPoolConfig {
    fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(1)
    }

    fn default_max_blocking_threads() -> usize {
        16
    }

    fn default_task_queue_depth() -> usize {
        64
    }

    fn default_thread_name() -> String {
        "connector-worker".to_string()
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Builds a multi-threaded tokio runtime with these settings.
    pub fn build_runtime(&self) -> io::Result<Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads.max(1))
            .max_blocking_threads(self.max_blocking_threads.max(1))
            .thread_name(self.thread_name.clone())
            .enable_all()
            .build()
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            max_blocking_threads: Self::default_max_blocking_threads(),
            task_queue_depth: Self::default_task_queue_depth(),
            thread_name: Self::default_thread_name(),
        }
    }
}
