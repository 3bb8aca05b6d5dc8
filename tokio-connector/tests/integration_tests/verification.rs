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

use crate::fixtures::*;

use std::sync::atomic::Ordering;
use tokio_connector::settings::TlsProtocol;
use tokio_connector::ssl::SessionInfo;
use tokio_connector::ConnectionBuilder;
use tokio_connector::ErrorKind;
use tokio_connector::HandshakeFailureReason;

#[tokio::test(flavor = "multi_thread")]
async fn ip_address_does_not_match_localhost_certificate() {
    let pki = TestPki::new();
    let server = start_tls_echo(&pki, ServerOptions::default()).await;
    let tls = pki.client_tls("127.0.0.1");
    let (conn, mut events) =
        connect(ConnectionBuilder::new(tls_settings(tls)), server.addr);

    events.expect_connect().await;
    let err = events.expect_error().await;
    assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    assert_eq!(
        err.handshake_reason(),
        Some(HandshakeFailureReason::HostnameMismatch)
    );
    assert_eq!(events.handshakes, 0);
    events.assert_quiet().await;

    let err = conn.write_and_wait(HELLO_WORLD).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn hostname_verifier_can_reject() {
    let pki = TestPki::new();
    let server = start_tls_echo(&pki, ServerOptions::default()).await;
    let settings = tls_settings(pki.client_tls("localhost"));
    let builder = ConnectionBuilder::new(settings)
        .with_hostname_verifier(|_: &str, _: &SessionInfo| false);
    let (_conn, mut events) = connect(builder, server.addr);

    events.expect_connect().await;
    let err = events.expect_error().await;
    assert_eq!(
        err.handshake_reason(),
        Some(HandshakeFailureReason::VerifierRejected)
    );
    assert_eq!(events.handshakes, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn hostname_verifier_can_accept_a_mismatch() {
    let pki = TestPki::new();
    let server = start_tls_echo(&pki, ServerOptions::default()).await;
    let verifier = |host: &str, session: &SessionInfo| {
        host == "127.0.0.1" && !session.peer_certificates.is_empty()
    };
    let settings = tls_settings(pki.client_tls("127.0.0.1"));
    let builder = ConnectionBuilder::new(settings)
        .with_hostname_verifier(verifier);
    let (conn, mut events) = connect(builder, server.addr);

    events.expect_connect().await;
    events.expect_handshake().await;
    conn.write_and_wait(HELLO_WORLD).await.unwrap();
    assert_eq!(events.read_exact(HELLO_WORLD.len()).await, HELLO_WORLD);
}

#[tokio::test(flavor = "multi_thread")]
async fn hostname_verifier_does_not_bypass_the_trust_store() {
    let pki = TestPki::new();
    let stranger = TestPki::new();
    let server = start_tls_echo(&pki, ServerOptions::default()).await;
    let builder =
        ConnectionBuilder::new(tls_settings(stranger.client_tls("localhost")))
            .with_hostname_verifier(|_: &str, _: &SessionInfo| true);
    let (_conn, mut events) = connect(builder, server.addr);

    events.expect_connect().await;
    let err = events.expect_error().await;
    assert_eq!(err.handshake_reason(), Some(HandshakeFailureReason::Engine));
}

#[tokio::test(flavor = "multi_thread")]
async fn untrusted_server_certificate() {
    let pki = TestPki::new();
    let stranger = TestPki::new();
    let server = start_tls_echo(&pki, ServerOptions::default()).await;
    let tls = stranger.client_tls("localhost");
    let (_conn, mut events) =
        connect(ConnectionBuilder::new(tls_settings(tls)), server.addr);

    events.expect_connect().await;
    let err = events.expect_error().await;
    assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    assert_eq!(err.handshake_reason(), Some(HandshakeFailureReason::Engine));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_certificate_is_presented() {
    let pki = TestPki::new();
    let opts = ServerOptions {
        require_client_auth: true,
        ..Default::default()
    };
    let server = start_tls_echo(&pki, opts).await;
    let tls = pki.with_client_cert(pki.client_tls("localhost"));
    let (conn, mut events) =
        connect(ConnectionBuilder::new(tls_settings(tls)), server.addr);

    events.expect_connect().await;
    events.expect_handshake().await;
    conn.write_and_wait(HELLO_WORLD).await.unwrap();
    assert_eq!(events.read_exact(HELLO_WORLD.len()).await, HELLO_WORLD);
    assert!(server.saw_client_cert.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_client_certificate_fails_the_handshake() {
    let pki = TestPki::new();
    let opts = ServerOptions {
        require_client_auth: true,
        ..Default::default()
    };
    let server = start_tls_echo(&pki, opts).await;
    // With TLS 1.2 the server rejects us before sending its Finished.
    let tls = pki
        .client_tls("localhost")
        .with_protocols(&[TlsProtocol::Tls1_2]);
    let (_conn, mut events) =
        connect(ConnectionBuilder::new(tls_settings(tls)), server.addr);

    events.expect_connect().await;
    let err = events.expect_error().await;
    assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    assert_eq!(events.handshakes, 0);
}
