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

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use rcgen::BasicConstraints;
use rcgen::CertificateParams;
use rcgen::DnType;
use rcgen::IsCa;
use rcgen::KeyPair;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::PrivateKeyDer;
use rustls::pki_types::PrivatePkcs8KeyDer;

use super::DelegatedTask;
use super::EngineResult;
use super::EngineStatus;
use super::HandshakeStatus;
use super::SessionInfo;
use super::TlsEngine;
use crate::buf_factory::PooledBuf;
use crate::filter::Filter;
use crate::filter::FilterEvents;
use crate::filter::Upstream;
use crate::settings::TlsSettings;
use crate::Completion;
use crate::ConnectorError;
use crate::ConnectorResult;
use crate::HandshakeFailureReason;

/// A throwaway CA and a server certificate for `localhost` signed by it.
pub(crate) struct TestPki {
    ca_cert: rcgen::Certificate,
    server_cert: rcgen::Certificate,
    server_key: KeyPair,
}

impl TestPki {
    pub(crate) fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "connector test CA");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server_cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        Self {
            ca_cert,
            server_cert,
            server_key,
        }
    }

    pub(crate) fn client_settings(&self, server_name: &str) -> TlsSettings {
        TlsSettings::new(server_name)
            .with_trust_root_der(self.ca_cert.der().to_vec())
    }

    pub(crate) fn server_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.server_cert.der().clone()]
    }

    pub(crate) fn server_key(&self) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(self.server_key.serialize_der()).into()
    }
}

pub(crate) const HANDSHAKE: u8 = 0x16;
pub(crate) const APP_DATA: u8 = 0x17;
pub(crate) const ALERT: u8 = 0x15;

/// Frames `payload` as `[kind, len_hi, len_lo, payload..]`.
pub(crate) fn record(kind: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).unwrap().to_be_bytes();
    let mut out = vec![kind, len[0], len[1]];
    out.extend_from_slice(payload);
    out
}

/// Application record as the scripted peer would send it in `epoch`.
pub(crate) fn app_record(data: &[u8], epoch: u8) -> Vec<u8> {
    record(APP_DATA, &xor(data, epoch))
}

fn xor(data: &[u8], epoch: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ epoch).collect()
}

/// Splits a byte stream into complete records.
pub(crate) fn parse_records(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut records = Vec::new();
    while bytes.len() >= 3 {
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        records.push((bytes[0], bytes[3..3 + len].to_vec()));
        bytes = &bytes[3 + len..];
    }
    assert!(bytes.is_empty(), "trailing partial record");
    records
}

/// Decodes the application records in `bytes`, checking every one was
/// protected with at least `min_epoch`.
pub(crate) fn decode_app_data(bytes: &[u8], min_epoch: u8) -> Vec<u8> {
    let mut data = Vec::new();
    for (kind, payload) in parse_records(bytes) {
        if kind != APP_DATA {
            continue;
        }
        let epoch = payload[0];
        assert!(epoch >= min_epoch, "record sealed with stale epoch {epoch}");
        data.extend(xor(&payload[1..], epoch));
    }
    data
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Idle,
    SendHello,
    AwaitDone,
    Task,
    Established,
}

/// A toy TLS engine with a one round trip handshake.
///
/// The client sends `HELLO`, the peer answers `DONE`. With `with_task` the
/// engine then asks for a delegated task before finishing. Records written
/// by the client carry the epoch as their first payload byte; the peer seals
/// records by XORing with the epoch. A peer-initiated re-handshake starts
/// with a `HELLO_REQUEST` handshake record. Unlike rustls, `unwrap` handles
/// a single record per call.
pub(crate) struct ScriptedEngine {
    script: Script,
    epoch: u8,
    with_task: bool,
    task_done: Arc<AtomicBool>,
    task_taken: bool,
    close_pending: bool,
    closed: bool,
    pub(crate) handshakes: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self {
            script: Script::Idle,
            epoch: 0,
            with_task: false,
            task_done: Arc::new(AtomicBool::new(false)),
            task_taken: false,
            close_pending: false,
            closed: false,
            handshakes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_task(mut self) -> Self {
        self.with_task = true;
        self
    }

    fn finish(&mut self) {
        self.script = Script::Established;
        self.epoch += 1;
        self.handshakes.fetch_add(1, Ordering::SeqCst);
    }

    fn result(
        &mut self, status: EngineStatus, consumed: usize, produced: usize,
    ) -> EngineResult {
        if self.script == Script::Task && self.task_done.load(Ordering::SeqCst) {
            self.task_done.store(false, Ordering::SeqCst);
            self.finish();
        }

        EngineResult {
            status,
            handshake_status: self.handshake_status(),
            consumed,
            produced,
        }
    }
}

impl TlsEngine for ScriptedEngine {
    fn begin_handshake(&mut self) -> ConnectorResult<()> {
        self.script = Script::SendHello;
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        match self.script {
            Script::SendHello => HandshakeStatus::NeedWrap,
            Script::AwaitDone => HandshakeStatus::NeedUnwrap,
            Script::Task if !self.task_done.load(Ordering::SeqCst) =>
                HandshakeStatus::NeedTask,
            // The task ran; the next wrap/unwrap reports completion.
            Script::Task => HandshakeStatus::NeedWrap,
            Script::Idle | Script::Established => HandshakeStatus::NotHandshaking,
        }
    }

    fn wrap(
        &mut self, src: &[u8], dst: &mut Vec<u8>,
    ) -> ConnectorResult<EngineResult> {
        let start = dst.len();
        let mut consumed = 0;

        match self.script {
            Script::SendHello => {
                dst.extend(record(HANDSHAKE, b"HELLO"));
                self.script = Script::AwaitDone;
            },
            Script::Established if !src.is_empty() => {
                let mut payload = vec![self.epoch];
                payload.extend(xor(src, self.epoch));
                dst.extend(record(APP_DATA, &payload));
                consumed = src.len();
            },
            _ => {},
        }

        if self.close_pending {
            dst.extend(record(ALERT, b"close_notify"));
            self.close_pending = false;
            self.closed = true;
        }

        let status = if self.closed {
            EngineStatus::Closed
        } else {
            EngineStatus::Ok
        };
        Ok(self.result(status, consumed, dst.len() - start))
    }

    fn unwrap(
        &mut self, src: &[u8], dst: &mut Vec<u8>,
    ) -> ConnectorResult<EngineResult> {
        if src.len() < 3 {
            return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0));
        }
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < 3 + len {
            return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0));
        }

        let payload = &src[3..3 + len];
        let consumed = 3 + len;
        let mut produced = 0;
        let mut status = EngineStatus::Ok;

        match (src[0], self.script) {
            (HANDSHAKE, Script::AwaitDone) if payload == b"DONE" => {
                if self.with_task {
                    self.script = Script::Task;
                    self.task_taken = false;
                } else {
                    self.finish();
                }
            },
            (HANDSHAKE, Script::Established) if payload == b"HELLO_REQUEST" => {
                self.script = Script::SendHello;
            },
            (HANDSHAKE, _) if payload == b"BAD_CERT" => {
                return Err(ConnectorError::handshake(
                    HandshakeFailureReason::Engine,
                    "untrusted certificate",
                ));
            },
            (APP_DATA, _) if self.epoch > 0 => {
                dst.extend(xor(payload, self.epoch));
                produced = len;
            },
            (ALERT, _) => status = EngineStatus::Closed,
            (kind, script) => {
                return Err(ConnectorError::RecordFailure(format!(
                    "unexpected record {kind:#x} in {script:?}"
                )));
            },
        }

        Ok(self.result(status, consumed, produced))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        if self.script != Script::Task || self.task_taken {
            return None;
        }
        self.task_taken = true;

        let done = Arc::clone(&self.task_done);
        Some(Box::new(move || done.store(true, Ordering::SeqCst)))
    }

    fn close_outbound(&mut self) {
        self.close_pending = true;
    }

    fn session(&self) -> SessionInfo {
        SessionInfo {
            protocol: Some(format!("scripted-{}", self.epoch)),
            ..Default::default()
        }
    }
}

/// Stands in for the transport below an [`SslFilter`](super::SslFilter):
/// records writes and completes them immediately, unless `stall` is set.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) upstream: Upstream,
    pub(crate) written: Mutex<Vec<u8>>,
    pub(crate) connects: Mutex<Vec<SocketAddr>>,
    pub(crate) closes: AtomicUsize,
    pub(crate) aborts: Mutex<Vec<ConnectorError>>,
    /// Keeps write completions pending, as a socket that stopped draining
    /// would.
    pub(crate) stall: AtomicBool,
    stalled: Mutex<Vec<Completion<usize>>>,
}

impl MockTransport {
    pub(crate) fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.written.lock())
    }

    pub(crate) fn events(&self) -> Arc<dyn FilterEvents> {
        self.upstream.get().expect("ssl filter is bound")
    }
}

impl Filter for MockTransport {
    fn bind_upstream(&self, upstream: Weak<dyn FilterEvents>) {
        self.upstream.bind(upstream);
    }

    fn connect(&self, addr: SocketAddr) {
        self.connects.lock().push(addr);
    }

    fn write(&self, data: PooledBuf, completion: Completion<usize>) {
        self.written.lock().extend_from_slice(&data);
        if self.stall.load(Ordering::SeqCst) {
            self.stalled.lock().push(completion);
        } else {
            completion.complete(data.len());
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&self, error: ConnectorError) {
        let stalled = std::mem::take(&mut *self.stalled.lock());
        for completion in stalled {
            completion.fail(error.clone());
        }
        self.aborts.lock().push(error);
    }
}
