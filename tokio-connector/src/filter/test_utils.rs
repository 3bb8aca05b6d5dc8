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

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::FilterEvents;
use crate::ConnectorError;

#[derive(Debug, Clone)]
pub(crate) enum Event {
    Connect,
    Read(Vec<u8>),
    HandshakeCompleted,
    Closed,
    Error(ConnectorError),
}

/// Top-of-chain filter that forwards every event to a channel.
pub(crate) struct RecordingFilter {
    tx: mpsc::UnboundedSender<Event>,
    /// Number of upcoming reads to ask the stage below to retain.
    retain: AtomicUsize,
}

impl RecordingFilter {
    pub(crate) fn new() -> (Arc<Self>, EventLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter = Arc::new(Self {
            tx,
            retain: AtomicUsize::new(0),
        });
        (filter, EventLog { rx })
    }

    pub(crate) fn retain_next(&self, reads: usize) {
        self.retain.store(reads, Ordering::SeqCst);
    }
}

impl FilterEvents for RecordingFilter {
    fn process_connect(&self) {
        let _ = self.tx.send(Event::Connect);
    }

    fn process_read(&self, data: &[u8]) -> bool {
        let retain = self
            .retain
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if !retain {
            let _ = self.tx.send(Event::Read(data.to_vec()));
        }
        retain
    }

    fn process_ssl_handshake_completed(&self) {
        let _ = self.tx.send(Event::HandshakeCompleted);
    }

    fn process_connection_closed(&self) {
        let _ = self.tx.send(Event::Closed);
    }

    fn process_error(&self, error: ConnectorError) {
        let _ = self.tx.send(Event::Error(error));
    }
}

pub(crate) struct EventLog {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventLog {
    pub(crate) async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
            .await
            .expect("timed out waiting for a filter event")
            .expect("event channel closed")
    }

    /// Collects read events until `len` bytes arrived.
    pub(crate) async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            match self.next().await {
                Event::Read(bytes) => data.extend_from_slice(&bytes),
                other => panic!("unexpected event while reading: {other:?}"),
            }
        }
        data
    }

    /// Asserts that no further event shows up within a short grace period.
    pub(crate) async fn assert_quiet(&mut self) {
        let res =
            tokio::time::timeout(Duration::from_millis(100), self.rx.recv())
                .await;
        if let Ok(Some(event)) = res {
            panic!("unexpected event: {event:?}");
        }
    }
}
