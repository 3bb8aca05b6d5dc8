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

//! The stage contract shared by every filter in a connection chain.
//!
//! A chain is a statically composed list of stages: the application sits on
//! top, the [`TransportFilter`](crate::transport::TransportFilter) at the
//! bottom, and optionally an [`SslFilter`](crate::ssl::SslFilter) in between.
//! Calls travel down through [`Filter`]; events travel up through
//! [`FilterEvents`].
//!
//! Each stage owns its downstream stage (`Arc<dyn Filter>`) and holds only a
//! [`Weak`] reference to the stage above it, see [`Upstream`]. Dropping the
//! top of the chain therefore tears the whole chain down.

#[cfg(test)]
pub(crate) mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use crate::buf_factory::PooledBuf;
use crate::Completion;
use crate::ConnectorError;

/// Events delivered upward by the stage below.
///
/// Exactly one terminal event, [`process_connection_closed`] or
/// [`process_error`], is delivered per connection. No other event follows it.
///
/// [`process_connection_closed`]: FilterEvents::process_connection_closed
/// [`process_error`]: FilterEvents::process_error
pub trait FilterEvents: Send + Sync + 'static {
    /// The connection to the remote address is established.
    fn process_connect(&self);

    /// Bytes arrived for this stage. The slice is only valid for the
    /// duration of the call; copy it to keep it.
    ///
    /// Returns `true` to ask the stage below to retain `data` and present it
    /// again, followed by whatever arrives next. Returns `false` once the
    /// bytes are consumed.
    fn process_read(&self, data: &[u8]) -> bool;

    /// A TLS handshake (initial or re-handshake) finished.
    fn process_ssl_handshake_completed(&self) {}

    /// The connection closed, either locally or by the peer.
    fn process_connection_closed(&self);

    /// The connection failed. The chain below is already being closed.
    fn process_error(&self, error: ConnectorError);
}

/// Operations a stage offers to the stage above it.
pub trait Filter: Send + Sync + 'static {
    /// Registers the stage events are delivered to. Only the first call has
    /// an effect.
    fn bind_upstream(&self, upstream: Weak<dyn FilterEvents>);

    fn connect(&self, addr: SocketAddr);

    /// Queues `data` for sending. `completion` fires once the bytes were
    /// handed to the socket, with the number of bytes the caller submitted.
    fn write(&self, data: PooledBuf, completion: Completion<usize>);

    /// Closes this stage and the stages below it. Idempotent.
    fn close(&self);

    /// Closes this stage and the stages below it because the connection
    /// failed. Writes still pending fail with `error` rather than being
    /// flushed.
    fn abort(&self, error: ConnectorError);

    /// Starts a TLS handshake, or a re-handshake on an established session.
    /// Stages without TLS ignore it.
    fn start_ssl(&self) {}
}

/// The non-owning link from a stage to the stage above it.
#[derive(Clone, Default)]
pub struct Upstream {
    inner: Arc<OnceLock<Weak<dyn FilterEvents>>>,
}

impl Upstream {
    pub fn bind(&self, upstream: Weak<dyn FilterEvents>) {
        if self.inner.set(upstream).is_err() {
            warn!("upstream filter already bound, ignoring");
        }
    }

    /// The stage above, if it is bound and still alive.
    pub fn get(&self) -> Option<Arc<dyn FilterEvents>> {
        self.inner.get().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("bound", &self.inner.get().is_some())
            .finish()
    }
}
