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

//! The bottom stage of every chain: a TCP socket driven by tokio.
//!
//! A connected transport runs two tasks. The reader task performs the
//! connect, then loops reading into a pooled buffer and delivering the bytes
//! upward. The writer task drains a FIFO queue of [`PendingWrite`]s, so
//! writes from any number of callers are serialized and completions fire in
//! submission order once the bytes were handed to the socket.
//!
//! A local [`close`](Filter::close) lets queued writes drain for
//! `close_linger`. A failure cancels them instead: every write the transport
//! still holds fails with the cause, before the error goes upward.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use buffer_pool::read_pooled;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;
use tokio::time;

use crate::buf_factory::BufFactory;
use crate::buf_factory::PooledBuf;
use crate::filter::Filter;
use crate::filter::FilterEvents;
use crate::filter::Upstream;
use crate::settings::TransportSettings;
use crate::Completion;
use crate::ConnectorError;

/// Lifecycle of a [`TransportFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
}

struct PendingWrite {
    data: PooledBuf,
    completion: Completion<usize>,
}

#[derive(Default)]
struct State {
    phase: TransportState,
    write_tx: Option<mpsc::UnboundedSender<PendingWrite>>,
    reader: Option<AbortHandle>,
    writer: Option<JoinHandle<()>>,
}

struct Shared {
    settings: TransportSettings,
    handle: Handle,
    upstream: Upstream,
    state: Mutex<State>,
    /// Bytes submitted to the writer task but not yet written.
    queued_bytes: AtomicUsize,
    /// Set once the terminal event went upward.
    terminated: AtomicBool,
    /// Why the connection failed, if it did.
    failure: OnceLock<ConnectorError>,
    /// Wakes the writer task when `failure` is set.
    cancel_writes: Notify,
}

/// A [`Filter`] over a non-blocking TCP socket.
pub struct TransportFilter {
    shared: Arc<Shared>,
}

impl TransportFilter {
    /// Creates an unconnected transport whose tasks run on `handle`.
    pub fn new(settings: TransportSettings, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                handle,
                upstream: Upstream::default(),
                state: Mutex::new(State::default()),
                queued_bytes: AtomicUsize::new(0),
                terminated: AtomicBool::new(false),
                failure: OnceLock::new(),
                cancel_writes: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> TransportState {
        self.shared.state.lock().phase
    }

    /// Bytes currently waiting in the write queue.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued_bytes.load(Ordering::Acquire)
    }
}

impl Filter for TransportFilter {
    fn bind_upstream(&self, upstream: Weak<dyn FilterEvents>) {
        self.shared.upstream.bind(upstream);
    }

    fn connect(&self, addr: SocketAddr) {
        let mut state = self.shared.state.lock();
        if state.phase != TransportState::Idle {
            warn!("connect({addr}) on a {:?} transport, ignoring", state.phase);
            return;
        }

        // Writes submitted while connecting wait in the queue until the
        // writer task starts.
        let (tx, rx) = mpsc::unbounded_channel();
        state.phase = TransportState::Connecting;
        state.write_tx = Some(tx);

        let shared = Arc::clone(&self.shared);
        let task = self.shared.handle.spawn(shared.run(addr, rx));
        state.reader = Some(task.abort_handle());
    }

    fn write(&self, data: PooledBuf, completion: Completion<usize>) {
        let len = data.len();
        if let Err((err, completion)) =
            self.shared.enqueue(PendingWrite { data, completion })
        {
            trace!("rejecting write of {len} bytes: {err}");
            completion.fail(err);
        }
    }

    fn close(&self) {
        if self.shared.shutdown() {
            debug!("transport closed locally");
            self.shared.terminate(None);
        }
    }

    fn abort(&self, error: ConnectorError) {
        self.shared.fail(error);
    }
}

impl Drop for TransportFilter {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Shared {
    /// Hands `write` to the writer task, or gives its completion back with
    /// the reason it was refused.
    fn enqueue(
        &self, write: PendingWrite,
    ) -> Result<(), (ConnectorError, Completion<usize>)> {
        let state = self.state.lock();
        let Some(tx) = &state.write_tx else {
            return Err((ConnectorError::ConnectionClosed, write.completion));
        };

        let len = write.data.len();
        let capacity = self.settings.write_queue_capacity;
        let queued = self.queued_bytes.fetch_add(len, Ordering::AcqRel);
        if queued > 0 && queued + len > capacity {
            self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
            let err = ConnectorError::WriteQueueFull { capacity };
            return Err((err, write.completion));
        }

        tx.send(write).map_err(|mpsc::error::SendError(w)| {
            self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
            (ConnectorError::ConnectionClosed, w.completion)
        })
    }

    fn is_closed(&self) -> bool {
        self.state.lock().phase == TransportState::Closed
    }

    /// Moves to `Closed`, stops the reader and lets the writer run out of
    /// queued writes. Returns the writer task, or `None` if the transport was
    /// already closed.
    fn stop(&self) -> Option<Option<JoinHandle<()>>> {
        let (tx, reader, writer) = {
            let mut state = self.state.lock();
            if state.phase == TransportState::Closed {
                return None;
            }
            state.phase = TransportState::Closed;
            (state.write_tx.take(), state.reader.take(), state.writer.take())
        };

        // The writer exits once the queue is drained and the sender is gone.
        drop(tx);

        if let Some(reader) = reader {
            reader.abort();
        }

        Some(writer)
    }

    /// Closes the transport, giving queued writes `close_linger` to drain.
    /// Returns `false` if already closed.
    fn shutdown(&self) -> bool {
        let Some(writer) = self.stop() else {
            return false;
        };

        if let Some(writer) = writer {
            let linger = self.settings.close_linger;
            let abort = writer.abort_handle();
            self.handle.spawn(async move {
                if time::timeout(linger, writer).await.is_err() {
                    debug!("close linger of {linger:?} expired, cancelling");
                    abort.abort();
                }
            });
        }

        true
    }

    /// Delivers the terminal event upward, at most once.
    fn terminate(&self, error: Option<ConnectorError>) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(upstream) = self.upstream.get() else {
            return;
        };

        match error {
            Some(err) => upstream.process_error(err),
            None => upstream.process_connection_closed(),
        }
    }

    /// Closes the transport because of `err`. Queued writes are cancelled
    /// and fail with `err`; the error goes upward once the writer let go of
    /// them, so no write completes after it.
    fn fail(self: &Arc<Self>, err: ConnectorError) {
        if self.failure.set(err.clone()).is_err() {
            return;
        }

        error!("transport failed: {err}");
        self.cancel_writes.notify_one();

        match self.stop().flatten() {
            Some(writer) => {
                let shared = Arc::clone(self);
                self.handle.spawn(async move {
                    let _ = writer.await;
                    shared.terminate(Some(err));
                });
            },
            None => self.terminate(Some(err)),
        }
    }

    /// Fails everything left in the write queue with `err`.
    fn fail_queued(
        &self, rx: &mut mpsc::UnboundedReceiver<PendingWrite>,
        err: &ConnectorError,
    ) {
        rx.close();
        while let Ok(PendingWrite { data, completion }) = rx.try_recv() {
            self.queued_bytes.fetch_sub(data.len(), Ordering::AcqRel);
            completion.fail(err.clone());
        }
    }

    async fn run(
        self: Arc<Self>, addr: SocketAddr,
        mut rx: mpsc::UnboundedReceiver<PendingWrite>,
    ) {
        let timeout = self.settings.connect_timeout;
        let res = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
        };

        let stream = match res {
            Ok(stream) => stream,
            Err(e) => {
                let err = ConnectorError::connect(addr, e);
                self.fail_queued(&mut rx, &err);
                return self.fail(err);
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {e}");
        }

        let (rd, wr) = stream.into_split();
        {
            let mut state = self.state.lock();
            if state.phase != TransportState::Connecting {
                return;
            }
            state.phase = TransportState::Connected;
            let writer = Arc::clone(&self).write_loop(wr, rx);
            state.writer = Some(self.handle.spawn(writer));
        }

        debug!("connected to {addr}");
        match self.upstream.get() {
            Some(upstream) => upstream.process_connect(),
            None => {
                self.shutdown();
                return;
            },
        }

        self.read_loop(rd).await;
    }

    async fn read_loop(self: &Arc<Self>, mut rd: OwnedReadHalf) {
        let mut buf = BufFactory::get_read_buf();
        let idle_timeout = self.settings.effective_idle_timeout();
        let max_read = self.settings.read_buffer_size.max(1);

        loop {
            // An upstream callback may have closed us; the abort only takes
            // effect at the next await.
            if self.is_closed() {
                return;
            }

            let read = read_pooled(&mut rd, &mut buf, max_read);
            let res = match idle_timeout {
                Some(limit) => match time::timeout(limit, read).await {
                    Ok(res) => res,
                    Err(_) => {
                        return self.fail(ConnectorError::ReadTimeout(limit))
                    },
                },
                None => read.await,
            };

            match res {
                Ok(0) => {
                    debug!("peer closed the connection");
                    self.shutdown();
                    return self.terminate(None);
                },
                Ok(n) => {
                    trace!("read {n} bytes");
                    let Some(upstream) = self.upstream.get() else {
                        self.shutdown();
                        return;
                    };

                    if upstream.process_read(&buf) {
                        trace!("upstream retained {} bytes", buf.len());
                    } else {
                        buf.clear();
                    }
                },
                Err(e) => return self.fail(ConnectorError::transport(e)),
            }
        }
    }

    /// The next queued write, or `None` once the queue is drained or the
    /// connection failed.
    async fn next_write(
        &self, rx: &mut mpsc::UnboundedReceiver<PendingWrite>,
    ) -> Option<PendingWrite> {
        if self.failure.get().is_some() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel_writes.notified() => None,
            next = rx.recv() => next,
        }
    }

    async fn write_loop(
        self: Arc<Self>, mut wr: OwnedWriteHalf,
        mut rx: mpsc::UnboundedReceiver<PendingWrite>,
    ) {
        while let Some(PendingWrite { data, completion }) =
            self.next_write(&mut rx).await
        {
            let len = data.len();
            let res = tokio::select! {
                biased;
                _ = self.cancel_writes.notified() => None,
                res = wr.write_all(&data) => Some(res),
            };
            self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
            drop(data);

            match (res, self.failure.get()) {
                (_, Some(err)) => completion.fail(err.clone()),
                (Some(Ok(())), None) => completion.complete(len),
                (Some(Err(e)), None) => {
                    let err = ConnectorError::transport(e);
                    completion.fail(err.clone());
                    self.fail(err);
                },
                (None, None) => {
                    completion.fail(ConnectorError::CancelledOperation)
                },
            }
        }

        if let Some(err) = self.failure.get() {
            return self.fail_queued(&mut rx, err);
        }

        if let Err(e) = wr.shutdown().await {
            trace!("failed to shut down the write half: {e}");
        }
    }
}
