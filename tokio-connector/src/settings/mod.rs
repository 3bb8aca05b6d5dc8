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

//! Configuration for connector chains.
//!
//! All settings structs deserialize with per-field defaults, so a partial
//! JSON document (or an empty one) is valid. Durations are expressed in
//! milliseconds on the wire.

mod thread_pool;
mod tls;
mod transport;

use serde::Deserialize;
use serde::Serialize;

pub use self::thread_pool::*;
pub use self::tls::*;
pub use self::transport::*;

use crate::ConnectorError;
use crate::ConnectorResult;

/// Everything needed to build a connection chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ConnectorSettings {
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub thread_pool: ThreadPoolConfig,
    /// When present, the chain includes a TLS stage.
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl ConnectorSettings {
    /// Settings for a plaintext chain.
    pub fn new_plain(transport: TransportSettings) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Settings for a chain with a TLS stage.
    pub fn new_tls(transport: TransportSettings, tls: TlsSettings) -> Self {
        Self {
            transport,
            tls: Some(tls),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> ConnectorResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConnectorError::Config(e.to_string()))
    }
}
