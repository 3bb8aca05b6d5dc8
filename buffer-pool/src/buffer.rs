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

use std::ops::Deref;
use std::ops::DerefMut;

use crate::Reuse;

/// A convenience wrapper around Vec that allows to "consume" data from the
/// front *without* shifting.
///
/// This is not unlike `VecDeque`, but the readable region is always a single
/// contiguous slice, which is what socket reads and TLS record parsing want.
#[derive(Default, Debug, Clone)]
pub struct ConsumeBuffer {
    inner: Vec<u8>,
    head: usize,
}

impl Deref for ConsumeBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner[self.head..]
    }
}

impl DerefMut for ConsumeBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner[self.head..]
    }
}

impl Reuse for ConsumeBuffer {
    fn reuse(&mut self, trim: usize) -> bool {
        self.inner.clear();
        self.inner.shrink_to(trim);
        self.head = 0;
        self.inner.capacity() > 0
    }
}

impl ConsumeBuffer {
    pub fn from_vec(inner: Vec<u8>) -> Self {
        ConsumeBuffer { inner, head: 0 }
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.inner.drain(0..self.head);
        self.inner
    }

    /// Marks `count` bytes at the front as consumed.
    pub fn pop_front(&mut self, count: usize) {
        assert!(self.head + count <= self.inner.len());
        self.head += count;
        if self.head == self.inner.len() {
            self.inner.clear();
            self.head = 0;
        }
    }

    /// Resizes the readable region to exactly `count` zeroed-or-existing
    /// bytes.
    pub fn expand(&mut self, count: usize) {
        self.inner.resize(self.head + count, 0);
    }

    pub fn truncate(&mut self, count: usize) {
        self.inner.truncate(self.head + count);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.head = 0;
    }

    /// Appends `additional` zeroed bytes and returns them for writing. The
    /// caller must [`truncate`](Self::truncate) away whatever it did not fill.
    pub fn tail_mut(&mut self, additional: usize) -> &mut [u8] {
        let start = self.inner.len();
        self.inner.resize(start + additional, 0);
        &mut self.inner[start..]
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Moves the readable bytes to the start of the allocation, reclaiming
    /// the space taken by consumed bytes.
    pub fn compact(&mut self) {
        if self.head > 0 {
            self.inner.drain(0..self.head);
            self.head = 0;
        }
    }

    /// Inserts `prefix` in front of the readable bytes. Uses consumed space
    /// when there is enough of it, otherwise shifts the contents.
    pub fn add_prefix(&mut self, prefix: &[u8]) {
        if self.head >= prefix.len() {
            self.head -= prefix.len();
            self.inner[self.head..self.head + prefix.len()]
                .copy_from_slice(prefix);
            return;
        }

        self.compact();
        self.inner.splice(0..0, prefix.iter().copied());
    }
}

impl<'a> Extend<&'a u8> for ConsumeBuffer {
    fn extend<T: IntoIterator<Item = &'a u8>>(&mut self, iter: T) {
        self.inner.extend(iter);
    }
}
