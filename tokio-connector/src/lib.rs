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

//! Layered asynchronous client connections for [tokio], with TLS via
//! [rustls].
//!
//! A connection is a chain of [`Filter`]s. Each stage passes writes down
//! towards the socket and events ([`FilterEvents`]) up towards the
//! application. The bottom stage is a [`TransportFilter`] over a TCP socket.
//! An [`SslFilter`] may sit above it to add TLS, including re-handshakes,
//! delegated handshake work and custom hostname verification.
//!
//! Asynchronous operations report their outcome exactly once through a
//! [`Completion`], which can also be awaited as a [`CompletionFuture`].
//!
//! # Connecting over TLS
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_connector::settings::ConnectorSettings;
//! use tokio_connector::settings::TlsSettings;
//! use tokio_connector::settings::TransportSettings;
//! use tokio_connector::ConnectionBuilder;
//! use tokio_connector::ConnectorError;
//! use tokio_connector::FilterEvents;
//!
//! struct Printer;
//!
//! impl FilterEvents for Printer {
//!     fn process_connect(&self) {}
//!
//!     fn process_read(&self, data: &[u8]) -> bool {
//!         println!("{}", String::from_utf8_lossy(data));
//!         false
//!     }
//!
//!     fn process_connection_closed(&self) {}
//!
//!     fn process_error(&self, error: ConnectorError) {
//!         eprintln!("connection failed: {error}");
//!     }
//! }
//!
//! # async fn example() -> tokio_connector::ConnectorResult<()> {
//! let mut tls = TlsSettings::new("example.com").with_start_on_connect(true);
//! tls.trust_store_pem = Some("/etc/ssl/certs/ca-certificates.crt".into());
//! let settings = ConnectorSettings::new_tls(TransportSettings::default(), tls);
//!
//! let conn = ConnectionBuilder::new(settings).build(Arc::new(Printer))?;
//! conn.connect("93.184.216.34:443".parse().unwrap());
//! conn.write_and_wait(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n")
//!     .await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod buf_factory;
mod completion;
mod connection;
mod error;
pub mod filter;
mod result;
pub mod settings;
pub mod ssl;
pub mod transport;
pub mod worker;

pub use buffer_pool;

pub use crate::completion::Completion;
pub use crate::completion::CompletionFuture;
pub use crate::completion::CompletionHandler;
pub use crate::connection::Connection;
pub use crate::connection::ConnectionBuilder;
pub use crate::error::ConnectorError;
pub use crate::error::ErrorKind;
pub use crate::error::HandshakeFailureReason;
pub use crate::filter::Filter;
pub use crate::filter::FilterEvents;
pub use crate::result::ConnectorResult;
pub use crate::ssl::SslFilter;
pub use crate::transport::TransportFilter;
