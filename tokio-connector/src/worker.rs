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

//! Off-loop execution of handshake work.
//!
//! Certificate checks and other delegated handshake steps may block, so they
//! never run inside a connection's I/O task. [`TaskExecutor`] runs them on
//! tokio's blocking pool, bounded by a semaphore, and hands the outcome to a
//! callback which typically posts a message back to the connection's task.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::settings::ThreadPoolConfig;
use crate::ConnectorError;

/// Bounded executor for blocking handshake tasks.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
}

impl TaskExecutor {
    pub fn new(handle: Handle, config: &ThreadPoolConfig) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(config.task_queue_depth.max(1))),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs `task` on the blocking pool and passes its result to `done`.
    ///
    /// When more than `task_queue_depth` tasks are in flight, `task` waits
    /// for a slot without occupying a thread. A panicking task is reported as
    /// [`ConnectorError::CancelledOperation`].
    pub fn execute<T, F, D>(&self, task: F, done: D)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        D: FnOnce(Result<T, ConnectorError>) + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = self.handle.clone();

        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                done(Err(ConnectorError::CancelledOperation));
                return;
            };

            let res = handle.spawn_blocking(task).await.map_err(|e| {
                error!("handshake task failed: {e}");
                ConnectorError::CancelledOperation
            });

            done(res);
        });
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}
