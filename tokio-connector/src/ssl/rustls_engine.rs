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

//! [`TlsEngine`] backed by a rustls [`ClientConnection`].

use std::io::Read;
use std::io::Write;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::client::danger::ServerCertVerified;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::PrivateKeyDer;
use rustls::pki_types::PrivatePkcs8KeyDer;
use rustls::pki_types::ServerName;
use rustls::pki_types::UnixTime;
use rustls::CertificateError;
use rustls::ClientConfig;
use rustls::ClientConnection;
use rustls::DigitallySignedStruct;
use rustls::Error;
use rustls::RootCertStore;
use rustls::SignatureScheme;
use rustls::SupportedProtocolVersion;

use super::DelegatedTask;
use super::EngineResult;
use super::EngineStatus;
use super::HandshakeStatus;
use super::SessionInfo;
use super::TlsEngine;
use crate::settings::TlsProtocol;
use crate::settings::TlsSettings;
use crate::ConnectorError;
use crate::ConnectorResult;
use crate::HandshakeFailureReason;

fn config_error(context: &str, err: impl std::fmt::Display) -> ConnectorError {
    error!("{context}: {err}");
    ConnectorError::Config(format!("{context}: {err}"))
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName |
            CertificateError::NotValidForNameContext { .. }
    )
}

/// Factory for [`RustlsEngine`]s sharing one rustls [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
}

impl TlsConnector {
    /// Builds the rustls configuration described by `settings`.
    ///
    /// With `defer_name_check` the certificate chain is still verified, but
    /// a name mismatch is left to a
    /// [`HostnameVerifier`](super::HostnameVerifier).
    pub fn new(
        settings: &TlsSettings, defer_name_check: bool,
    ) -> ConnectorResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = settings
            .effective_protocols()?
            .into_iter()
            .filter_map(|p| match p {
                TlsProtocol::Tls1_2 => Some(&rustls::version::TLS12),
                TlsProtocol::Tls1_3 => Some(&rustls::version::TLS13),
                _ => None,
            })
            .collect::<Vec<&'static SupportedProtocolVersion>>();

        let roots = Arc::new(load_trust_store(settings)?);
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&versions)
            .map_err(|e| config_error("unsupported protocol versions", e))?;

        let builder = if defer_name_check {
            let verifier = ChainOnlyVerifier::new(roots, provider)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
        } else {
            builder.with_root_certificates(roots)
        };

        let mut config = match load_client_auth(settings)? {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| config_error("invalid client certificate", e))?,
            None => builder.with_no_client_auth(),
        };

        config.alpn_protocols = settings
            .alpn_protocols
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Wraps a prepared rustls configuration.
    pub fn from_config(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    /// Creates an engine for a connection to `server_name`, which may be a
    /// DNS name or an IP address.
    pub fn engine(&self, server_name: &str) -> ConnectorResult<RustlsEngine> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| config_error("invalid server name", e))?;
        let conn = ClientConnection::new(Arc::clone(&self.config), name)
            .map_err(|e| config_error("failed to create TLS session", e))?;

        Ok(RustlsEngine::new(conn))
    }
}

fn load_trust_store(settings: &TlsSettings) -> ConnectorResult<RootCertStore> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &settings.trust_store_pem {
        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| config_error("failed to load trust store", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| config_error("failed to parse trust store", e))?;

        let (added, ignored) = roots.add_parsable_certificates(certs);
        debug!(
            "loaded {added} trust anchors from {}, ignored {ignored}",
            path.display()
        );
    }

    for der in &settings.trust_roots_der {
        roots
            .add(CertificateDer::from(der.clone()))
            .map_err(|e| config_error("invalid trust anchor", e))?;
    }

    if roots.is_empty() {
        return Err(ConnectorError::Config("no trust anchors configured".into()));
    }

    Ok(roots)
}

type ClientAuth = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn load_client_auth(
    settings: &TlsSettings,
) -> ConnectorResult<Option<ClientAuth>> {
    if let Some(der) = &settings.client_cert_der {
        let chain = der
            .cert_chain
            .iter()
            .cloned()
            .map(CertificateDer::from)
            .collect();
        let key = PrivatePkcs8KeyDer::from(der.private_key.clone()).into();
        return Ok(Some((chain, key)));
    }

    let Some(paths) = &settings.client_cert else {
        return Ok(None);
    };

    let chain = CertificateDer::pem_file_iter(&paths.cert_chain)
        .map_err(|e| config_error("failed to load client certificate", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| config_error("failed to parse client certificate", e))?;
    let key = PrivateKeyDer::from_pem_file(&paths.private_key)
        .map_err(|e| config_error("failed to load private key", e))?;

    Ok(Some((chain, key)))
}

/// Validates the chain against the trust store, but accepts certificates
/// that are not valid for the requested name.
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainOnlyVerifier {
    fn new(
        roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>,
    ) -> ConnectorResult<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| config_error("failed to build the verifier", e))?;

        Ok(Self { inner })
    }
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self, end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>], server_name: &ServerName<'_>,
        ocsp_response: &[u8], now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(Error::InvalidCertificate(e)) if is_name_mismatch(&e) => {
                debug!(
                    "certificate not valid for {server_name:?}, \
                     deferring to the hostname verifier"
                );
                Ok(ServerCertVerified::assertion())
            },
            res => res,
        }
    }

    fn verify_tls12_signature(
        &self, message: &[u8], cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self, message: &[u8], cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Client side TLS engine on top of rustls.
///
/// rustls verifies certificates inline, so this engine never asks for a
/// delegated task. A re-handshake on an established TLS 1.3 session is a key
/// update; on TLS 1.2 it is logged and skipped, since rustls does not
/// renegotiate.
pub struct RustlsEngine {
    conn: ClientConnection,
    /// A handshake (or key update) was started and has not been reported
    /// as finished yet.
    handshaking: bool,
    /// The initial handshake completed.
    established: bool,
    outbound_closed: bool,
}

impl RustlsEngine {
    pub fn new(conn: ClientConnection) -> Self {
        Self {
            conn,
            handshaking: false,
            established: false,
            outbound_closed: false,
        }
    }

    fn flush_tls(&mut self, dst: &mut Vec<u8>) -> ConnectorResult<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(dst).map_err(ConnectorError::transport)?;
        }
        Ok(())
    }

    fn map_error(&self, err: Error) -> ConnectorError {
        if self.established {
            return ConnectorError::RecordFailure(err.to_string());
        }

        let reason = match &err {
            Error::InvalidCertificate(e) if is_name_mismatch(e) =>
                HandshakeFailureReason::HostnameMismatch,
            _ => HandshakeFailureReason::Engine,
        };
        ConnectorError::handshake(reason, err.to_string())
    }

    fn result(
        &mut self, status: EngineStatus, consumed: usize, produced: usize,
    ) -> EngineResult {
        let mut handshake_status = self.handshake_status();

        if self.handshaking &&
            handshake_status == HandshakeStatus::NotHandshaking
        {
            self.handshaking = false;
            self.established = true;
            handshake_status = HandshakeStatus::Finished;
        }

        EngineResult {
            status,
            handshake_status,
            consumed,
            produced,
        }
    }
}

impl TlsEngine for RustlsEngine {
    fn begin_handshake(&mut self) -> ConnectorResult<()> {
        if !self.established {
            // ClientConnection::new already queued the ClientHello.
            self.handshaking = true;
            return Ok(());
        }

        match self.conn.refresh_traffic_keys() {
            Ok(()) => {
                debug!("requested a TLS key update");
                self.handshaking = true;
            },
            Err(e) => warn!("re-handshake not supported on this session: {e}"),
        }

        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    fn wrap(
        &mut self, src: &[u8], dst: &mut Vec<u8>,
    ) -> ConnectorResult<EngineResult> {
        let start = dst.len();
        let mut consumed = 0;

        // rustls caps how much it buffers, so feed plaintext in pieces and
        // drain the records in between.
        while consumed < src.len() {
            let n = self
                .conn
                .writer()
                .write(&src[consumed..])
                .map_err(ConnectorError::transport)?;
            consumed += n;
            self.flush_tls(dst)?;

            if n == 0 {
                break;
            }
        }
        self.flush_tls(dst)?;

        let status = if self.outbound_closed {
            EngineStatus::Closed
        } else {
            EngineStatus::Ok
        };
        Ok(self.result(status, consumed, dst.len() - start))
    }

    fn unwrap(
        &mut self, src: &[u8], dst: &mut Vec<u8>,
    ) -> ConnectorResult<EngineResult> {
        let start = dst.len();
        let mut consumed = 0;
        let mut status = EngineStatus::Ok;

        while consumed < src.len() {
            let n = self
                .conn
                .read_tls(&mut &src[consumed..])
                .map_err(ConnectorError::transport)?;
            if n == 0 {
                break;
            }
            consumed += n;

            let io_state = self
                .conn
                .process_new_packets()
                .map_err(|e| self.map_error(e))?;

            let pending = io_state.plaintext_bytes_to_read();
            if pending > 0 {
                let filled = dst.len();
                dst.resize(filled + pending, 0);
                self.conn
                    .reader()
                    .read_exact(&mut dst[filled..])
                    .map_err(ConnectorError::transport)?;
            }

            if io_state.peer_has_closed() {
                status = EngineStatus::Closed;
                break;
            }
        }

        if consumed == 0 && !src.is_empty() && status == EngineStatus::Ok {
            status = EngineStatus::BufferUnderflow;
        }

        Ok(self.result(status, consumed, dst.len() - start))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_outbound(&mut self) {
        self.conn.send_close_notify();
        self.outbound_closed = true;
    }

    fn session(&self) -> SessionInfo {
        SessionInfo {
            protocol: self.conn.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: self
                .conn
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
            peer_certificates: self
                .conn
                .peer_certificates()
                .map(|certs| certs.iter().map(|c| c.to_vec()).collect())
                .unwrap_or_default(),
            alpn_protocol: self.conn.alpn_protocol().map(<[u8]>::to_vec),
        }
    }
}
