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

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::ConnectorError;
use crate::ConnectorResult;

/// TLS protocol versions that can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsProtocol {
    Tls1_0,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

impl TlsProtocol {
    pub fn is_deprecated(self) -> bool {
        matches!(self, Self::Tls1_0 | Self::Tls1_1)
    }
}

/// Paths to a PEM encoded certificate chain and its private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterialPaths {
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
}

/// In-memory DER encoded certificate chain and private key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterialDer {
    pub cert_chain: Vec<Vec<u8>>,
    /// PKCS#8 private key.
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterialDer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the private key.
        f.debug_struct("KeyMaterialDer")
            .field("cert_chain_len", &self.cert_chain.len())
            .finish()
    }
}

/// TLS configuration consumed by the [`SslFilter`](crate::ssl::SslFilter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TlsSettings {
    /// Host name the peer certificate must be valid for. Also sent as SNI
    /// when it is a DNS name.
    #[serde(default)]
    pub server_name: Option<String>,

    /// PEM file with trusted root certificates.
    #[serde(default)]
    pub trust_store_pem: Option<PathBuf>,

    /// Trusted root certificates, DER encoded. Added to `trust_store_pem`.
    #[serde(skip)]
    pub trust_roots_der: Vec<Vec<u8>>,

    /// Client certificate presented when the server asks for one.
    #[serde(default)]
    pub client_cert: Option<KeyMaterialPaths>,

    /// In-memory alternative to `client_cert`. Takes precedence when set.
    #[serde(skip)]
    pub client_cert_der: Option<KeyMaterialDer>,

    /// Protocol versions to offer.
    ///
    /// Defaults to `[tls1_2, tls1_3]`.
    #[serde(default = "TlsSettings::default_protocols")]
    pub protocols: Vec<TlsProtocol>,

    /// TLS 1.0 and 1.1 may only be requested when this is set. Even then
    /// they are skipped with a warning, since the engine cannot speak them.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub allow_deprecated_protocols: bool,

    /// ALPN protocol names to offer, in preference order.
    #[serde(default)]
    pub alpn_protocols: Vec<String>,

    /// Start the handshake as soon as the transport connects, instead of
    /// waiting for an explicit `start_ssl`.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub start_on_connect: bool,
}

impl TlsSettings {
    fn default_protocols() -> Vec<TlsProtocol> {
        vec![TlsProtocol::Tls1_2, TlsProtocol::Tls1_3]
    }

    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            ..Default::default()
        }
    }

    pub fn with_trust_root_der(mut self, der: Vec<u8>) -> Self {
        self.trust_roots_der.push(der);
        self
    }

    pub fn with_client_cert_der(
        mut self, cert_chain: Vec<Vec<u8>>, private_key: Vec<u8>,
    ) -> Self {
        self.client_cert_der = Some(KeyMaterialDer {
            cert_chain,
            private_key,
        });
        self
    }

    pub fn with_protocols(mut self, protocols: &[TlsProtocol]) -> Self {
        self.protocols = protocols.to_vec();
        self
    }

    pub fn with_deprecated_protocols(mut self, allow: bool) -> Self {
        self.allow_deprecated_protocols = allow;
        self
    }

    pub fn with_start_on_connect(mut self, start: bool) -> Self {
        self.start_on_connect = start;
        self
    }

    /// The protocol versions the engine will actually offer, sorted and
    /// deduplicated.
    pub fn effective_protocols(&self) -> ConnectorResult<Vec<TlsProtocol>> {
        let mut protocols = Vec::with_capacity(self.protocols.len());

        for &protocol in &self.protocols {
            if !protocol.is_deprecated() {
                protocols.push(protocol);
                continue;
            }

            if !self.allow_deprecated_protocols {
                return Err(ConnectorError::Config(format!(
                    "{protocol:?} is deprecated and not enabled"
                )));
            }

            warn!("{protocol:?} is not supported by the TLS engine, skipping it");
        }

        protocols.sort();
        protocols.dedup();

        if protocols.is_empty() {
            return Err(ConnectorError::Config(
                "no supported TLS protocol version configured".to_string(),
            ));
        }

        Ok(protocols)
    }
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            server_name: None,
            trust_store_pem: None,
            trust_roots_der: Vec::new(),
            client_cert: None,
            client_cert_der: None,
            protocols: Self::default_protocols(),
            allow_deprecated_protocols: false,
            alpn_protocols: Vec::new(),
            start_on_connect: false,
        }
    }
}
