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

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;

/// Socket-level configuration consumed by the
/// [`TransportFilter`](crate::transport::TransportFilter).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TransportSettings {
    /// Upper bound for a single socket read, in bytes.
    ///
    /// Defaults to 17 000, which fits one maximum-size TLS record.
    #[serde(default = "TransportSettings::default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// How long a connect may take before it fails.
    ///
    /// Defaults to 30 seconds.
    #[serde(
        rename = "connect_timeout_ms",
        default = "TransportSettings::default_connect_timeout"
    )]
    #[serde_as(as = "DurationMilliSeconds")]
    pub connect_timeout: Duration,

    /// Fails the connection with a read timeout if no data arrives for this
    /// long. `None` or zero disables the timeout.
    ///
    /// Defaults to `None`.
    #[serde(rename = "idle_timeout_ms", default)]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub idle_timeout: Option<Duration>,

    /// Number of bytes that may sit in the write queue before further writes
    /// are rejected. A write is always admitted into an empty queue, whatever
    /// its size.
    ///
    /// Defaults to 100 000 bytes.
    #[serde(default = "TransportSettings::default_write_queue_capacity")]
    pub write_queue_capacity: usize,

    /// How long a close may spend flushing queued writes before they are
    /// cancelled.
    ///
    /// Defaults to 2 seconds.
    #[serde(
        rename = "close_linger_ms",
        default = "TransportSettings::default_close_linger"
    )]
    #[serde_as(as = "DurationMilliSeconds")]
    pub close_linger: Duration,
}

impl TransportSettings {
    #[inline]
    fn default_read_buffer_size() -> usize {
        17_000
    }

    #[inline]
    fn default_connect_timeout() -> Duration {
        Duration::from_secs(30)
    }

    #[inline]
    fn default_write_queue_capacity() -> usize {
        100_000
    }

    #[inline]
    fn default_close_linger() -> Duration {
        Duration::from_secs(2)
    }

    /// The idle timeout, if one is in effect.
    pub fn effective_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.filter(|t| !t.is_zero())
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: Self::default_read_buffer_size(),
            connect_timeout: Self::default_connect_timeout(),
            idle_timeout: None,
            write_queue_capacity: Self::default_write_queue_capacity(),
            close_linger: Self::default_close_linger(),
        }
    }
}
