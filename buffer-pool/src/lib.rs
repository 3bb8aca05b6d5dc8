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

//! Process-wide pools of reusable byte buffers.
//!
//! A [`Pool`] is split into shards, each a lock-free [`SegQueue`], and hands
//! out [`Pooled`] values in round-robin order to spread contention between
//! threads. A [`Pooled`] value returns to its shard when dropped, provided
//! [`Reuse::reuse`] says it is worth keeping and the shard is not full.

mod buffer;
mod read;

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crossbeam::queue::SegQueue;

pub use crate::buffer::*;
pub use crate::read::*;

/// A sharded pool of elements.
pub struct Pool<const S: usize, T: 'static> {
    /// List of distinct shards to reduce contention.
    queues: [QueueShard<T>; S],
    /// The index of the next shard to use, in round-robin order.
    next_shard: AtomicUsize,
    name: &'static str,
}

#[derive(Debug)]
struct QueueShard<T> {
    /// The inner stack of pooled values.
    queue: SegQueue<T>,
    /// The number of elements currently stored in this shard.
    elem_cnt: AtomicUsize,
    /// The value to use when calling [`Reuse::reuse`]. Typically the capacity
    /// to keep in a reused buffer.
    trim: usize,
    /// The max number of values to keep in the shard.
    max: usize,
}

impl<T> QueueShard<T> {
    fn new(trim: usize, max: usize) -> Self {
        QueueShard {
            queue: SegQueue::new(),
            elem_cnt: AtomicUsize::new(0),
            trim,
            max,
        }
    }

    fn push(&self, value: T) -> bool {
        if self.elem_cnt.fetch_add(1, Ordering::Acquire) < self.max {
            self.queue.push(value);
            return true;
        }

        // No room left, restore the count.
        self.elem_cnt.fetch_sub(1, Ordering::Release);
        false
    }

    fn pop(&self) -> Option<T> {
        let value = self.queue.pop()?;
        self.elem_cnt.fetch_sub(1, Ordering::Relaxed);
        Some(value)
    }
}

/// A snapshot of how many values a [`Pool`] is currently holding on to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub name: &'static str,
    pub cached: usize,
    pub limit: usize,
}

/// A value borrowed from the [`Pool`] that can be dereferenced to `T`.
pub struct Pooled<T: Default + Reuse + 'static> {
    inner: T,
    pool: &'static QueueShard<T>,
}

impl<T: Default + Reuse> Pooled<T> {
    /// Detaches the value from its pool. It will not be returned on drop.
    pub fn into_inner(mut self) -> T {
        std::mem::take(&mut self.inner)
    }
}

impl<T: Default + Reuse> Drop for Pooled<T> {
    fn drop(&mut self) {
        if self.inner.reuse(self.pool.trim) {
            self.pool.push(std::mem::take(&mut self.inner));
        }
    }
}

impl<T: Default + Reuse + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<const S: usize, T: Default + Reuse> Pool<S, T> {
    /// Creates a pool keeping at most `limit` values across all shards. Values
    /// are trimmed to `trim` before they are put back.
    pub fn new(limit: usize, trim: usize, name: &'static str) -> Self {
        let per_shard = limit / S;
        Pool {
            queues: std::array::from_fn(|_| QueueShard::new(trim, per_shard)),
            next_shard: AtomicUsize::new(0),
            name,
        }
    }

    fn next(&'static self) -> &'static QueueShard<T> {
        let shard = self.next_shard.fetch_add(1, Ordering::Relaxed) % S;
        &self.queues[shard]
    }

    /// Get a value from the pool, or create a new default value if the
    /// assigned shard is currently empty.
    pub fn get(&'static self) -> Pooled<T> {
        let shard = self.next();
        let inner = shard.pop().unwrap_or_default();

        Pooled { inner, pool: shard }
    }

    /// Create a new default value assigned to a shard without touching the
    /// shard's queue. If it ends up non-empty it may still return to the pool.
    pub fn get_empty(&'static self) -> Pooled<T> {
        let shard = self.next_shard.load(Ordering::Relaxed) % S;

        Pooled {
            inner: Default::default(),
            pool: &self.queues[shard],
        }
    }

    /// Get a value from the pool and apply the provided transformation on
    /// it before returning.
    pub fn get_with(&'static self, f: impl FnOnce(&mut T)) -> Pooled<T> {
        let mut pooled = self.get();
        f(&mut pooled);
        pooled
    }

    /// Wraps an owned value so it joins the pool once dropped.
    pub fn from_owned(&'static self, inner: T) -> Pooled<T> {
        Pooled {
            inner,
            pool: self.next(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name,
            cached: self
                .queues
                .iter()
                .map(|q| q.elem_cnt.load(Ordering::Relaxed))
                .sum(),
            limit: self.queues.iter().map(|q| q.max).sum(),
        }
    }
}

impl<'a, const S: usize, T: Default + Extend<&'a u8> + Reuse> Pool<S, T> {
    /// Get a value from the pool and extend it with the provided slice.
    pub fn with_slice(&'static self, v: &'a [u8]) -> Pooled<T> {
        let mut buf = self.get();
        buf.deref_mut().extend(v);
        buf
    }
}

impl<const S: usize, T> fmt::Debug for Pool<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("shards", &S)
            .finish()
    }
}

impl<T: Default + Reuse> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Default + Reuse> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// A trait that prepares an item to be returned to the pool. For example
/// clearing it. `true` is returned if the item should be returned to the pool,
/// `false` if it should be dropped.
pub trait Reuse {
    fn reuse(&mut self, trim: usize) -> bool;
}

impl Reuse for Vec<u8> {
    fn reuse(&mut self, trim: usize) -> bool {
        self.clear();
        self.shrink_to(trim);
        self.capacity() > 0
    }
}

impl Reuse for VecDeque<u8> {
    fn reuse(&mut self, trim: usize) -> bool {
        self.clear();
        self.shrink_to(trim);
        self.capacity() > 0
    }
}
