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

//! TLS stage of a connection chain.
//!
//! [`SslFilter`] sits between the application and the transport. Each
//! connection's TLS state lives in a dedicated tokio task, the `SslWorker`,
//! which owns the [`TlsEngine`] and all buffers. The filter itself only
//! forwards calls and events to that task over a channel, so the handshake
//! state machine never needs a lock and never runs concurrently with itself.
//!
//! Records produced by the engine are handed to the transport from inside the
//! worker, in the order the engine produced them. Application writes that
//! arrive while a handshake is running are held back and sealed once it
//! finishes, so no plaintext is ever protected with keys that are about to
//! be replaced.

mod engine;
mod rustls_engine;
mod verifier;

#[cfg(test)]
pub(crate) mod test_utils;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;

use buffer_pool::ConsumeBuffer;
use tokio::sync::mpsc;
use tokio::sync::watch;

pub use self::engine::*;
pub use self::rustls_engine::*;
pub use self::verifier::*;

use crate::buf_factory::BufFactory;
use crate::buf_factory::PooledBuf;
use crate::filter::Filter;
use crate::filter::FilterEvents;
use crate::filter::Upstream;
use crate::worker::TaskExecutor;
use crate::Completion;
use crate::ConnectorError;
use crate::ConnectorResult;
use crate::HandshakeFailureReason;

/// Content type of a TLS handshake record.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Where a connection's TLS state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslStage {
    /// No handshake yet. Bytes pass through unchanged.
    NotStarted,
    /// Exchanging handshake records.
    Handshaking { initial: bool },
    /// Waiting on a delegated task or the hostname verifier.
    AwaitingTask { initial: bool },
    Established,
    Closed,
}

/// Per-connection TLS options.
#[derive(Debug, Clone, Default)]
pub struct SslOptions {
    /// Target host, passed to the hostname verifier.
    pub host: String,
    pub hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
    /// Begin the handshake as soon as the transport connects.
    pub start_on_connect: bool,
}

enum TaskOutcome {
    Engine(Result<(), ConnectorError>),
    Verified(Result<bool, ConnectorError>),
}

enum Command {
    Connected,
    Read(PooledBuf),
    PeerClosed,
    Error(ConnectorError),
    Write(PooledBuf, Completion<usize>),
    StartSsl,
    TaskDone(TaskOutcome),
    Close,
    Abort(ConnectorError),
}

/// A [`Filter`] that runs TLS over the stage below it.
pub struct SslFilter {
    tx: mpsc::UnboundedSender<Command>,
    downstream: Arc<dyn Filter>,
    upstream: Upstream,
    stage: watch::Receiver<SslStage>,
}

impl SslFilter {
    /// Creates the filter on top of `downstream` and spawns its worker task
    /// on the executor's runtime.
    pub fn new<E: TlsEngine>(
        downstream: Arc<dyn Filter>, engine: E, options: SslOptions,
        executor: TaskExecutor,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stage_tx, stage) = watch::channel(SslStage::NotStarted);
        let upstream = Upstream::default();

        let worker = SslWorker {
            engine,
            stage: SslStage::NotStarted,
            stage_tx,
            downstream: Arc::clone(&downstream),
            upstream: upstream.clone(),
            commands: tx.downgrade(),
            executor: executor.clone(),
            host: options.host,
            verifier: options.hostname_verifier,
            start_on_connect: options.start_on_connect,
            network_in: ConsumeBuffer::default(),
            held_writes: VecDeque::new(),
            held_plain: Vec::new(),
            retained: ConsumeBuffer::default(),
        };

        let filter = Arc::new(Self {
            tx,
            downstream,
            upstream,
            stage,
        });

        filter
            .downstream
            .bind_upstream(Arc::downgrade(&filter) as Weak<dyn FilterEvents>);
        executor.handle().spawn(worker.run(rx));

        filter
    }

    /// Starts a new handshake on an established session. Same as calling
    /// [`Filter::start_ssl`] again.
    pub fn rehandshake(&self) {
        self.send(Command::StartSsl);
    }

    pub fn stage(&self) -> SslStage {
        *self.stage.borrow()
    }

    /// Waits until the stage satisfies `f`, or the filter is gone.
    pub async fn wait_for_stage(&self, f: impl Fn(SslStage) -> bool) -> SslStage {
        let mut stage = self.stage.clone();
        let reached = match stage.wait_for(|s| f(*s)).await {
            Ok(s) => *s,
            Err(_) => SslStage::Closed,
        };
        reached
    }

    fn send(&self, cmd: Command) {
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(cmd) {
            if let Command::Write(_, completion) = cmd {
                completion.fail(ConnectorError::ConnectionClosed);
            }
        }
    }
}

impl Filter for SslFilter {
    fn bind_upstream(&self, upstream: Weak<dyn FilterEvents>) {
        self.upstream.bind(upstream);
    }

    fn connect(&self, addr: SocketAddr) {
        self.downstream.connect(addr);
    }

    fn write(&self, data: PooledBuf, completion: Completion<usize>) {
        self.send(Command::Write(data, completion));
    }

    fn close(&self) {
        self.send(Command::Close);
    }

    fn abort(&self, error: ConnectorError) {
        self.send(Command::Abort(error));
    }

    fn start_ssl(&self) {
        self.send(Command::StartSsl);
    }
}

impl FilterEvents for SslFilter {
    fn process_connect(&self) {
        self.send(Command::Connected);
    }

    fn process_read(&self, data: &[u8]) -> bool {
        // Partial records are kept by the worker, so the transport never
        // needs to retain anything for us.
        self.send(Command::Read(BufFactory::buf_from_slice(data)));
        false
    }

    fn process_connection_closed(&self) {
        self.send(Command::PeerClosed);
    }

    fn process_error(&self, error: ConnectorError) {
        self.send(Command::Error(error));
    }
}

/// Owns the TLS state of one connection. Runs as its own task.
struct SslWorker<E> {
    engine: E,
    stage: SslStage,
    stage_tx: watch::Sender<SslStage>,
    downstream: Arc<dyn Filter>,
    upstream: Upstream,
    /// Used to post task results back to ourselves.
    commands: mpsc::WeakUnboundedSender<Command>,
    executor: TaskExecutor,
    host: String,
    verifier: Option<Arc<dyn HostnameVerifier>>,
    start_on_connect: bool,
    /// Encrypted bytes the engine has not consumed yet.
    network_in: ConsumeBuffer,
    /// Application writes submitted during a handshake.
    held_writes: VecDeque<(PooledBuf, Completion<usize>)>,
    /// Plaintext decrypted during a handshake, delivered once it finishes.
    held_plain: Vec<u8>,
    /// Plaintext the upstream asked us to keep.
    retained: ConsumeBuffer,
}

impl<E: TlsEngine> SslWorker<E> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
            if self.stage == SslStage::Closed {
                break;
            }
        }

        // Either we are closed, or the filter was dropped.
        self.close();

        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            if let Command::Write(_, completion) = cmd {
                completion.fail(ConnectorError::ConnectionClosed);
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        let res = match cmd {
            Command::Connected => self.on_connected(),
            Command::Read(buf) => self.on_read(&buf),
            Command::PeerClosed => self.on_peer_closed(),
            Command::Error(err) => {
                self.terminate(Some(err));
                Ok(())
            },
            Command::Write(data, completion) => self.on_write(data, completion),
            Command::StartSsl => self.start_handshake(),
            Command::TaskDone(outcome) => self.on_task_done(outcome),
            Command::Close => {
                self.close();
                Ok(())
            },
            Command::Abort(err) => {
                self.fail(err);
                Ok(())
            },
        };

        if let Err(err) = res {
            self.fail(err);
        }
    }

    fn set_stage(&mut self, stage: SslStage) {
        trace!("{}: {:?} -> {stage:?}", self.host, self.stage);
        self.stage = stage;
        self.stage_tx.send_replace(stage);
    }

    fn on_connected(&mut self) -> ConnectorResult<()> {
        if self.start_on_connect {
            self.start_handshake()?;
        }

        if let Some(upstream) = self.upstream.get() {
            upstream.process_connect();
        }
        Ok(())
    }

    fn start_handshake(&mut self) -> ConnectorResult<()> {
        let initial = match self.stage {
            SslStage::NotStarted => true,
            SslStage::Established => false,
            SslStage::Handshaking { .. } | SslStage::AwaitingTask { .. } => {
                trace!("handshake with {} already running", self.host);
                return Ok(());
            },
            SslStage::Closed => return Ok(()),
        };

        debug!(
            "starting TLS {} with {}",
            if initial { "handshake" } else { "re-handshake" },
            self.host
        );
        self.engine.begin_handshake()?;
        self.set_stage(SslStage::Handshaking { initial });
        self.drive()
    }

    /// Runs the handshake until it needs more input, a task, or finishes.
    fn drive(&mut self) -> ConnectorResult<()> {
        while let SslStage::Handshaking { initial } = self.stage {
            match self.engine.handshake_status() {
                HandshakeStatus::NeedWrap => {
                    let (records, res) = self.seal(&[])?;
                    if records.is_empty() &&
                        res.handshake_status == HandshakeStatus::NeedWrap
                    {
                        return Err(ConnectorError::handshake(
                            HandshakeFailureReason::Engine,
                            "TLS engine produced no handshake data",
                        ));
                    }
                    self.send_records(records, Completion::noop());
                },
                HandshakeStatus::NeedUnwrap =>
                    if !self.unwrap_once()? {
                        return Ok(());
                    },
                HandshakeStatus::NeedTask => return self.run_engine_task(initial),
                HandshakeStatus::NotHandshaking | HandshakeStatus::Finished =>
                    self.handshake_finished(initial)?,
            }
        }

        Ok(())
    }

    /// Wraps all of `src`, possibly over several engine calls.
    fn seal(&mut self, src: &[u8]) -> ConnectorResult<(Vec<u8>, EngineResult)> {
        let mut out = Vec::with_capacity(src.len() + 64);
        let mut offset = 0;

        loop {
            let res = self.engine.wrap(&src[offset..], &mut out)?;
            offset += res.consumed;

            if offset >= src.len() || res.status == EngineStatus::Closed {
                return Ok((out, res));
            }

            if res.consumed == 0 {
                return Err(ConnectorError::RecordFailure(
                    "TLS engine refused application data".to_string(),
                ));
            }
        }
    }

    fn send_records(&self, records: Vec<u8>, completion: Completion<usize>) {
        if records.is_empty() {
            completion.complete(0);
            return;
        }

        trace!("sending {} bytes of TLS records", records.len());
        self.downstream
            .write(BufFactory::buf_from_vec(records), completion);
    }

    /// Feeds buffered network bytes to the engine once. Returns `false` when
    /// no progress is possible until more bytes arrive.
    fn unwrap_once(&mut self) -> ConnectorResult<bool> {
        if self.network_in.is_empty() {
            return Ok(false);
        }

        let mut plain = Vec::new();
        let res = self.engine.unwrap(&self.network_in, &mut plain)?;
        self.network_in.pop_front(res.consumed);
        self.on_plaintext(plain);

        match res.status {
            EngineStatus::Ok => Ok(res.consumed > 0),
            EngineStatus::BufferUnderflow => {
                let buffered = self.network_in.len();
                trace!("partial record, {buffered} bytes buffered");
                Ok(false)
            },
            EngineStatus::Closed => {
                debug!("{} sent close_notify", self.host);
                self.on_peer_closed()?;
                Ok(false)
            },
        }
    }

    fn on_read(&mut self, data: &[u8]) -> ConnectorResult<()> {
        match self.stage {
            SslStage::NotStarted => {
                if data.first() != Some(&TLS_HANDSHAKE_RECORD) {
                    self.deliver(data);
                    return Ok(());
                }

                debug!("{} started a TLS handshake", self.host);
                self.engine.begin_handshake()?;
                self.set_stage(SslStage::Handshaking { initial: true });
                self.network_in.extend_from_slice(data);
                self.drive()
            },
            SslStage::Handshaking { .. } => {
                self.network_in.extend_from_slice(data);
                self.drive()
            },
            SslStage::AwaitingTask { .. } => {
                self.network_in.extend_from_slice(data);
                Ok(())
            },
            SslStage::Established => {
                self.network_in.extend_from_slice(data);
                self.unwrap_established()
            },
            SslStage::Closed => Ok(()),
        }
    }

    fn unwrap_established(&mut self) -> ConnectorResult<()> {
        while self.stage == SslStage::Established {
            if !self.unwrap_once()? {
                break;
            }

            if self.engine.handshake_status() != HandshakeStatus::NotHandshaking {
                debug!("{} started a re-handshake", self.host);
                self.set_stage(SslStage::Handshaking { initial: false });
                self.drive()?;
            }
        }

        Ok(())
    }

    fn on_plaintext(&mut self, plain: Vec<u8>) {
        if plain.is_empty() {
            return;
        }

        match self.stage {
            SslStage::Established | SslStage::NotStarted => self.deliver(&plain),
            _ => self.held_plain.extend_from_slice(&plain),
        }
    }

    /// Hands plaintext to the upstream, honouring its retention requests.
    fn deliver(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let Some(upstream) = self.upstream.get() else {
            return;
        };

        if self.retained.is_empty() {
            if upstream.process_read(data) {
                self.retained.extend_from_slice(data);
            }
        } else {
            self.retained.extend_from_slice(data);
            if !upstream.process_read(&self.retained) {
                self.retained.clear();
            }
        }
    }

    fn on_write(
        &mut self, data: PooledBuf, completion: Completion<usize>,
    ) -> ConnectorResult<()> {
        match self.stage {
            SslStage::NotStarted if !self.start_on_connect =>
                self.downstream.write(data, completion),
            // With start_on_connect, nothing may go out in the clear.
            SslStage::NotStarted |
            SslStage::Handshaking { .. } |
            SslStage::AwaitingTask { .. } => {
                let len = data.len();
                trace!("holding a {len} byte write until the handshake is done");
                self.held_writes.push_back((data, completion));
            },
            SslStage::Established => return self.write_app(&data, completion),
            SslStage::Closed => completion.fail(ConnectorError::ConnectionClosed),
        }

        Ok(())
    }

    fn write_app(
        &mut self, data: &[u8], completion: Completion<usize>,
    ) -> ConnectorResult<()> {
        let len = data.len();
        if len == 0 {
            completion.complete(0);
            return Ok(());
        }

        match self.seal(data) {
            Ok((records, _)) => {
                self.send_records(records, completion.map(move |_: usize| len));
                Ok(())
            },
            Err(err) => {
                completion.fail(err.clone());
                Err(err)
            },
        }
    }

    fn handshake_finished(&mut self, initial: bool) -> ConnectorResult<()> {
        match &self.verifier {
            Some(verifier) if initial => {
                let verifier = Arc::clone(verifier);
                self.run_verifier(verifier);
                Ok(())
            },
            _ => self.complete_handshake(),
        }
    }

    fn complete_handshake(&mut self) -> ConnectorResult<()> {
        self.set_stage(SslStage::Established);
        debug!(
            "TLS session with {} established ({:?})",
            self.host,
            self.engine.session().protocol
        );

        if let Some(upstream) = self.upstream.get() {
            upstream.process_ssl_handshake_completed();
        }

        while let Some((data, completion)) = self.held_writes.pop_front() {
            self.write_app(&data, completion)?;
        }

        let held = std::mem::take(&mut self.held_plain);
        self.deliver(&held);

        // Records that followed the last handshake message.
        self.unwrap_established()
    }

    fn post(&self) -> impl FnOnce(TaskOutcome) + Send + 'static {
        let commands = self.commands.clone();
        move |outcome| {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::TaskDone(outcome));
            }
        }
    }

    fn run_engine_task(&mut self, initial: bool) -> ConnectorResult<()> {
        let Some(task) = self.engine.delegated_task() else {
            return Err(ConnectorError::handshake(
                HandshakeFailureReason::Engine,
                "TLS engine asked for a task but provided none",
            ));
        };

        self.set_stage(SslStage::AwaitingTask { initial });
        let post = self.post();
        self.executor
            .execute(task, move |res| post(TaskOutcome::Engine(res)));
        Ok(())
    }

    fn run_verifier(&mut self, verifier: Arc<dyn HostnameVerifier>) {
        self.set_stage(SslStage::AwaitingTask { initial: true });

        let host = self.host.clone();
        let session = self.engine.session();
        let post = self.post();
        debug!("verifying {host} with the custom hostname verifier");

        self.executor.execute(
            move || verifier.verify(&host, &session),
            move |res| post(TaskOutcome::Verified(res)),
        );
    }

    fn on_task_done(&mut self, outcome: TaskOutcome) -> ConnectorResult<()> {
        let SslStage::AwaitingTask { initial } = self.stage else {
            trace!("dropping task result in {:?}", self.stage);
            return Ok(());
        };

        match outcome {
            TaskOutcome::Engine(res) => {
                res.map_err(|e| {
                    let reason = HandshakeFailureReason::Engine;
                    ConnectorError::handshake(reason, e.to_string())
                })?;
                self.set_stage(SslStage::Handshaking { initial });
                self.drive()
            },
            TaskOutcome::Verified(Ok(true)) => self.complete_handshake(),
            TaskOutcome::Verified(Ok(false)) => Err(ConnectorError::handshake(
                HandshakeFailureReason::VerifierRejected,
                format!("hostname verifier rejected {}", self.host),
            )),
            TaskOutcome::Verified(Err(e)) => Err(ConnectorError::handshake(
                HandshakeFailureReason::VerifierRejected,
                e.to_string(),
            )),
        }
    }

    fn on_peer_closed(&mut self) -> ConnectorResult<()> {
        match self.stage {
            SslStage::Handshaking { .. } | SslStage::AwaitingTask { .. } =>
                Err(ConnectorError::handshake(
                    HandshakeFailureReason::ClosedDuringHandshake,
                    "connection closed during the TLS handshake",
                )),
            SslStage::NotStarted | SslStage::Established => {
                debug!("connection to {} closed by peer", self.host);
                self.terminate(None);
                Ok(())
            },
            SslStage::Closed => Ok(()),
        }
    }

    /// Best-effort flush of whatever the engine still wants to send, such as
    /// a close_notify or an alert.
    fn flush_engine(&mut self) {
        match self.seal(&[]) {
            Ok((records, _)) if !records.is_empty() =>
                self.send_records(records, Completion::noop()),
            Ok(_) => {},
            Err(e) => warn!("failed to flush TLS records to {}: {e}", self.host),
        }
    }

    /// Graceful local close: send close_notify when a session exists, then
    /// close the transport without waiting for the peer's reply.
    fn close(&mut self) {
        if self.stage == SslStage::Established {
            self.engine.close_outbound();
            self.flush_engine();
        }

        self.terminate(None);
    }

    fn fail(&mut self, err: ConnectorError) {
        if self.stage == SslStage::Closed {
            return;
        }

        error!("TLS connection to {} failed: {err}", self.host);
        self.flush_engine();
        self.terminate(Some(err));
    }

    /// Moves to `Closed`, closes the transport and delivers the terminal
    /// event upward. On failure the transport is aborted, so records it
    /// still holds fail with `cause` instead of going out.
    fn terminate(&mut self, cause: Option<ConnectorError>) {
        if self.stage == SslStage::Closed {
            return;
        }
        self.set_stage(SslStage::Closed);

        let pending = cause.clone().unwrap_or(ConnectorError::CancelledOperation);
        for (_, completion) in self.held_writes.drain(..) {
            completion.fail(pending.clone());
        }

        match &cause {
            Some(err) => self.downstream.abort(err.clone()),
            None => self.downstream.close(),
        }

        let Some(upstream) = self.upstream.get() else {
            return;
        };
        match cause {
            Some(err) => upstream.process_error(err),
            None => upstream.process_connection_closed(),
        }
    }
}
