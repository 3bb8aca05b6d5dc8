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

//! Assembles a filter chain and exposes it as a single [`Connection`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::buf_factory::BufFactory;
use crate::buf_factory::PooledBuf;
use crate::filter::Filter;
use crate::filter::FilterEvents;
use crate::settings::ConnectorSettings;
use crate::ssl::HostnameVerifier;
use crate::ssl::SslFilter;
use crate::ssl::SslOptions;
use crate::ssl::SslStage;
use crate::ssl::TlsConnector;
use crate::transport::TransportFilter;
use crate::worker::TaskExecutor;
use crate::Completion;
use crate::CompletionFuture;
use crate::ConnectorError;
use crate::ConnectorResult;

/// Builds a [`Connection`] from [`ConnectorSettings`].
///
/// The chain is a [`TransportFilter`], optionally topped by an [`SslFilter`]
/// when `settings.tls` is present, with the application bound on top.
pub struct ConnectionBuilder {
    settings: ConnectorSettings,
    handle: Option<Handle>,
    hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
    tls_connector: Option<TlsConnector>,
}

impl ConnectionBuilder {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            settings,
            handle: None,
            hostname_verifier: None,
            tls_connector: None,
        }
    }

    /// Runtime the connection's tasks are spawned on. Defaults to the
    /// runtime `build` is called from.
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Replaces the built-in host name check. See [`HostnameVerifier`].
    pub fn with_hostname_verifier(
        mut self, verifier: impl HostnameVerifier,
    ) -> Self {
        self.hostname_verifier = Some(Arc::new(verifier));
        self
    }

    /// Uses a prepared rustls configuration instead of building one from
    /// the TLS settings.
    pub fn with_tls_connector(mut self, connector: TlsConnector) -> Self {
        self.tls_connector = Some(connector);
        self
    }

    /// Creates the chain and binds `app` on top of it. Nothing touches the
    /// network until [`Connection::connect`].
    pub fn build(
        self, app: Arc<dyn FilterEvents>,
    ) -> ConnectorResult<Connection> {
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                ConnectorError::Config(format!("no tokio runtime available: {e}"))
            })?,
        };

        let transport: Arc<dyn Filter> = Arc::new(TransportFilter::new(
            self.settings.transport.clone(),
            handle.clone(),
        ));

        let ssl = match &self.settings.tls {
            Some(tls) => {
                let server_name = tls.server_name.clone().ok_or_else(|| {
                    let msg = "TLS requires a server name";
                    ConnectorError::Config(msg.to_string())
                })?;

                let connector = match self.tls_connector {
                    Some(connector) => connector,
                    None =>
                        TlsConnector::new(tls, self.hostname_verifier.is_some())?,
                };
                let engine = connector.engine(&server_name)?;
                let executor =
                    TaskExecutor::new(handle, &self.settings.thread_pool);

                let options = SslOptions {
                    host: server_name,
                    hostname_verifier: self.hostname_verifier,
                    start_on_connect: tls.start_on_connect,
                };
                Some(SslFilter::new(
                    Arc::clone(&transport),
                    engine,
                    options,
                    executor,
                ))
            },
            None => None,
        };

        let top = match &ssl {
            Some(ssl) => Arc::clone(ssl) as Arc<dyn Filter>,
            None => transport,
        };
        top.bind_upstream(Arc::downgrade(&app));

        Ok(Connection { top, ssl, app })
    }
}

/// Handle to a built filter chain.
///
/// Dropping it tears the chain down: queued writes are cancelled and the
/// socket is closed.
pub struct Connection {
    top: Arc<dyn Filter>,
    ssl: Option<Arc<SslFilter>>,
    /// Filters only hold their upstream weakly.
    app: Arc<dyn FilterEvents>,
}

impl Connection {
    pub fn connect(&self, addr: SocketAddr) {
        self.top.connect(addr);
    }

    /// Queues a copy of `data`. The returned future resolves once the bytes
    /// were handed to the socket. It need not be polled for the write to
    /// happen.
    pub fn write(&self, data: &[u8]) -> CompletionFuture<usize> {
        let (completion, fut) = Completion::channel();
        self.top.write(BufFactory::buf_from_slice(data), completion);
        fut
    }

    pub fn write_buf(&self, data: PooledBuf, completion: Completion<usize>) {
        self.top.write(data, completion);
    }

    /// Writes `data` and waits for its completion.
    pub async fn write_and_wait(&self, data: &[u8]) -> ConnectorResult<usize> {
        self.write(data).await
    }

    /// Starts the TLS handshake, or a re-handshake once established.
    pub fn start_ssl(&self) {
        self.top.start_ssl();
    }

    pub fn rehandshake(&self) {
        if let Some(ssl) = &self.ssl {
            ssl.rehandshake();
        }
    }

    /// TLS stage of the chain, `None` for plain connections.
    pub fn ssl_stage(&self) -> Option<SslStage> {
        self.ssl.as_ref().map(|ssl| ssl.stage())
    }

    pub fn close(&self) {
        self.top.close();
    }

    pub fn app(&self) -> &Arc<dyn FilterEvents> {
        &self.app
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("ssl_stage", &self.ssl_stage())
            .finish_non_exhaustive()
    }
}
