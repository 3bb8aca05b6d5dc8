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

use crate::ConnectorResult;

/// What the engine needs next to make handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake in progress.
    NotHandshaking,
    /// Outbound handshake records are ready; call [`TlsEngine::wrap`].
    NeedWrap,
    /// More records from the peer are needed; call [`TlsEngine::unwrap`].
    NeedUnwrap,
    /// A [`DelegatedTask`] must run before the handshake can continue.
    NeedTask,
    /// The handshake just completed. Only reported in an [`EngineResult`].
    Finished,
}

/// Outcome of a single wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// The input holds no complete record. Nothing was consumed.
    BufferUnderflow,
    /// The engine is closed: the peer sent close_notify, or the local side
    /// closed outbound.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub handshake_status: HandshakeStatus,
    /// Input bytes the engine took. The caller must keep the rest and offer
    /// it again later.
    pub consumed: usize,
    /// Output bytes appended to the destination buffer.
    pub produced: usize,
}

/// Blocking work the engine hands out while in [`HandshakeStatus::NeedTask`].
pub type DelegatedTask = Box<dyn FnOnce() + Send + 'static>;

/// Negotiated parameters of an established session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated protocol version, e.g. `TLSv1_3`.
    pub protocol: Option<String>,
    pub cipher_suite: Option<String>,
    /// DER encoded certificate chain presented by the peer, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
    pub alpn_protocol: Option<Vec<u8>>,
}

/// A sans-I/O TLS state machine driven by the [`SslFilter`].
///
/// The engine never touches the network. `wrap` turns plaintext (or pending
/// handshake messages) into records, `unwrap` turns records into plaintext
/// (or handshake progress). Errors returned by either are fatal for the
/// connection.
///
/// [`SslFilter`]: crate::ssl::SslFilter
pub trait TlsEngine: Send + 'static {
    /// Starts the initial handshake, or a re-handshake when a session is
    /// already established.
    fn begin_handshake(&mut self) -> ConnectorResult<()>;

    fn handshake_status(&self) -> HandshakeStatus;

    /// Encrypts `src` (possibly empty, to flush handshake messages) and
    /// appends the resulting records to `dst`.
    fn wrap(
        &mut self, src: &[u8], dst: &mut Vec<u8>,
    ) -> ConnectorResult<EngineResult>;

    /// Feeds records from `src` to the engine and appends any decrypted
    /// plaintext to `dst`.
    fn unwrap(
        &mut self, src: &[u8], dst: &mut Vec<u8>,
    ) -> ConnectorResult<EngineResult>;

    /// The pending task while in [`HandshakeStatus::NeedTask`].
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Queues a close_notify alert, to be flushed by the next `wrap`.
    fn close_outbound(&mut self);

    fn session(&self) -> SessionInfo;
}
