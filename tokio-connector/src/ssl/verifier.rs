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

use std::fmt;

use super::SessionInfo;

/// A caller-provided identity check run after the TLS handshake.
///
/// When configured, it replaces the engine's built-in host name check. The
/// certificate chain is still validated against the trust store. Returning
/// `false` fails the handshake with
/// [`VerifierRejected`](crate::HandshakeFailureReason::VerifierRejected).
///
/// Verification runs on the blocking pool, so implementations may do slow
/// work such as a DNS lookup.
pub trait HostnameVerifier: Send + Sync + 'static {
    fn verify(&self, host: &str, session: &SessionInfo) -> bool;
}

impl<F> HostnameVerifier for F
where
    F: Fn(&str, &SessionInfo) -> bool + Send + Sync + 'static,
{
    fn verify(&self, host: &str, session: &SessionInfo) -> bool {
        self(host, session)
    }
}

impl fmt::Debug for dyn HostnameVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostnameVerifier")
    }
}
