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

//! Exactly-once completion notifications for asynchronous operations.
//!
//! Every operation that finishes later (a write, for instance) takes a
//! [`Completion`]. The completion is consumed by [`Completion::complete`] or
//! [`Completion::fail`], so it cannot fire twice. If it is dropped unfired,
//! for example because the connection was torn down while the operation was
//! queued, the handler receives [`ConnectorError::CancelledOperation`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::sync::oneshot;

use crate::ConnectorError;

/// Receives the outcome of an asynchronous operation.
pub trait CompletionHandler<T>: Send {
    fn completed(self: Box<Self>, result: T);

    fn failed(self: Box<Self>, error: ConnectorError);
}

struct FnHandler<F>(F);

impl<T, F> CompletionHandler<T> for FnHandler<F>
where
    F: FnOnce(Result<T, ConnectorError>) + Send,
{
    fn completed(self: Box<Self>, result: T) {
        (self.0)(Ok(result))
    }

    fn failed(self: Box<Self>, error: ConnectorError) {
        (self.0)(Err(error))
    }
}

/// An owned, single-shot completion.
#[must_use = "dropping a Completion reports the operation as cancelled"]
pub struct Completion<T: 'static> {
    handler: Option<Box<dyn CompletionHandler<T>>>,
}

impl<T: 'static> Completion<T> {
    pub fn new(handler: impl CompletionHandler<T> + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
        }
    }

    pub fn from_fn(
        f: impl FnOnce(Result<T, ConnectorError>) + Send + 'static,
    ) -> Self {
        Self::new(FnHandler(f))
    }

    /// A completion nobody is waiting on.
    pub fn noop() -> Self {
        Self { handler: None }
    }

    /// Returns a completion together with a future resolving to its outcome.
    pub fn channel() -> (Self, CompletionFuture<T>)
    where
        T: Send,
    {
        let (tx, rx) = oneshot::channel();
        let completion = Self::from_fn(move |res| {
            // The receiver may already be gone; nobody cares then.
            let _ = tx.send(res);
        });

        (completion, CompletionFuture { rx })
    }

    pub fn complete(mut self, result: T) {
        if let Some(handler) = self.handler.take() {
            handler.completed(result);
        }
    }

    pub fn fail(mut self, error: ConnectorError) {
        if let Some(handler) = self.handler.take() {
            handler.failed(error);
        }
    }

    pub fn finish(self, result: Result<T, ConnectorError>) {
        match result {
            Ok(v) => self.complete(v),
            Err(e) => self.fail(e),
        }
    }

    /// Adapts this completion to an operation producing `U`.
    pub fn map<U: 'static>(
        self, f: impl FnOnce(U) -> T + Send + 'static,
    ) -> Completion<U> {
        Completion::from_fn(move |res: Result<U, ConnectorError>| {
            self.finish(res.map(f))
        })
    }
}

impl<T: 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.failed(ConnectorError::CancelledOperation);
        }
    }
}

impl<T: 'static> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("armed", &self.handler.is_some())
            .finish()
    }
}

/// Future side of [`Completion::channel`].
#[derive(Debug)]
pub struct CompletionFuture<T> {
    rx: oneshot::Receiver<Result<T, ConnectorError>>,
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<T, ConnectorError>;

    fn poll(
        mut self: Pin<&mut Self>, cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(ConnectorError::CancelledOperation)))
    }
}
