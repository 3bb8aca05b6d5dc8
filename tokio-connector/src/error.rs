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
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Why a TLS handshake did not reach a usable session.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailureReason {
    /// The TLS engine rejected the negotiation: untrusted certificate,
    /// unsupported protocol version, bad handshake message and so on.
    Engine,
    /// The peer certificate is not valid for the target host name.
    HostnameMismatch,
    /// The cryptographic handshake succeeded but the configured hostname
    /// verifier returned `false`.
    VerifierRejected,
    /// The transport closed before the handshake finished.
    ClosedDuringHandshake,
}

/// Flat classification of [`ConnectorError`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectFailure,
    ReadTimeout,
    HandshakeFailure,
    RecordFailure,
    TransportFailure,
    CancelledOperation,
    ConnectionClosed,
    WriteQueueFull,
    Config,
}

/// Errors reported by the connector's filter chain.
///
/// The error is [`Clone`] because one fault on a connection is fanned out to
/// every pending completion as well as the upper filter.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    /// The remote address could not be reached, or the connect timed out.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailure {
        addr: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },
    /// No data arrived within the configured idle timeout.
    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),
    #[error("TLS handshake failed ({reason:?}): {message}")]
    HandshakeFailure {
        reason: HandshakeFailureReason,
        message: String,
    },
    /// A record failed to decrypt or authenticate after the handshake.
    #[error("TLS record failure: {0}")]
    RecordFailure(String),
    #[error("transport failure: {0}")]
    TransportFailure(#[source] Arc<io::Error>),
    /// The operation was abandoned because the connection was closed, or its
    /// completion was dropped without being fired.
    #[error("operation cancelled")]
    CancelledOperation,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("write queue is full ({capacity} bytes)")]
    WriteQueueFull { capacity: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectFailure { .. } => ErrorKind::ConnectFailure,
            Self::ReadTimeout(_) => ErrorKind::ReadTimeout,
            Self::HandshakeFailure { .. } => ErrorKind::HandshakeFailure,
            Self::RecordFailure(_) => ErrorKind::RecordFailure,
            Self::TransportFailure(_) => ErrorKind::TransportFailure,
            Self::CancelledOperation => ErrorKind::CancelledOperation,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::WriteQueueFull { .. } => ErrorKind::WriteQueueFull,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn connect(addr: SocketAddr, err: io::Error) -> Self {
        Self::ConnectFailure {
            addr,
            source: Arc::new(err),
        }
    }

    pub(crate) fn transport(err: io::Error) -> Self {
        Self::TransportFailure(Arc::new(err))
    }

    pub(crate) fn handshake(
        reason: HandshakeFailureReason, message: impl Into<String>,
    ) -> Self {
        Self::HandshakeFailure {
            reason,
            message: message.into(),
        }
    }

    /// The handshake failure reason, if this is a handshake failure.
    pub fn handshake_reason(&self) -> Option<HandshakeFailureReason> {
        match self {
            Self::HandshakeFailure { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

// Best-effort mapping for callers that want to stay in io::Result land, e.g.
// when bridging into tokio's AsyncRead/AsyncWrite traits.
impl From<ConnectorError> for io::Error {
    fn from(err: ConnectorError) -> Self {
        let kind = match err.kind() {
            ErrorKind::ConnectFailure => io::ErrorKind::ConnectionRefused,
            ErrorKind::ReadTimeout => io::ErrorKind::TimedOut,
            ErrorKind::HandshakeFailure | ErrorKind::RecordFailure =>
                io::ErrorKind::InvalidData,
            ErrorKind::CancelledOperation => io::ErrorKind::Interrupted,
            ErrorKind::ConnectionClosed => io::ErrorKind::NotConnected,
            ErrorKind::WriteQueueFull => io::ErrorKind::WouldBlock,
            ErrorKind::Config => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}
