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

use rstest::rstest;
use tokio_connector::settings::TlsProtocol;

#[rstest]
#[case::server_initiated(true)]
#[case::client_initiated(false)]
#[tokio::test(flavor = "multi_thread")]
async fn data_flows_across_key_updates(#[case] server_initiated: bool) {
    let pki = TestPki::new();
    let opts = ServerOptions {
        key_update_on_hello: server_initiated,
        ..Default::default()
    };
    let server = start_tls_echo(&pki, opts).await;
    let (conn, mut events) =
        connect_tls(&pki, &server, &[TlsProtocol::Tls1_3]).await;

    conn.write_and_wait(b"Hello\n").await.unwrap();
    assert_eq!(events.read_exact(6).await, b"Hello\n");

    if !server_initiated {
        conn.rehandshake();
    }

    let data = payload(100_000);
    conn.write_and_wait(&data).await.unwrap();
    assert_eq!(events.read_exact(data.len()).await, data);

    if !server_initiated {
        assert_eq!(events.handshakes, 2);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn start_ssl_again_rehandshakes() {
    let pki = TestPki::new();
    let server = start_tls_echo(&pki, ServerOptions::default()).await;
    let (conn, mut events) =
        connect_tls(&pki, &server, &[TlsProtocol::Tls1_3]).await;

    conn.start_ssl();
    events.expect_handshake().await;

    conn.write_and_wait(HELLO_WORLD).await.unwrap();
    assert_eq!(events.read_exact(HELLO_WORLD.len()).await, HELLO_WORLD);
}

#[tokio::test(flavor = "multi_thread")]
async fn tls12_rehandshake_is_skipped() {
    let pki = TestPki::new();
    let opts = ServerOptions {
        tls12_only: true,
        ..Default::default()
    };
    let server = start_tls_echo(&pki, opts).await;
    let (conn, mut events) =
        connect_tls(&pki, &server, &[TlsProtocol::Tls1_2]).await;

    conn.rehandshake();
    events.expect_handshake().await;

    let data = payload(20_000);
    conn.write_and_wait(&data).await.unwrap();
    assert_eq!(events.read_exact(data.len()).await, data);
}
