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

//! Pooled buffers for socket reads and outbound records.
//!
//! The connector keeps a few process-wide [`buffer_pool::Pool`]s. Reads from
//! the transport land in buffers from the read pool, and encrypted records or
//! application payloads travel down the chain in buffers from the size-classed
//! write pools. Dropping a [`PooledBuf`] hands it back to the pool it came
//! from.

use std::sync::LazyLock;

use buffer_pool::ConsumeBuffer;
use buffer_pool::Pool;
use buffer_pool::PoolStats;

pub use buffer_pool::PooledBuf;

const POOL_SHARDS: usize = 8;
const POOL_SIZE: usize = 16 * 1024;
const READ_POOL_SIZE: usize = 4 * 1024;

const TINY_BUF_SIZE: usize = 64;
const SMALL_BUF_SIZE: usize = 1024;
const MEDIUM_BUF_SIZE: usize = 4096;
const MAX_POOL_BUF_SIZE: usize = 64 * 1024;

type BufPool = Pool<POOL_SHARDS, ConsumeBuffer>;

static TINY_POOL: LazyLock<BufPool> =
    LazyLock::new(|| BufPool::new(POOL_SIZE, TINY_BUF_SIZE, "tiny_pool"));
static SMALL_POOL: LazyLock<BufPool> =
    LazyLock::new(|| BufPool::new(POOL_SIZE, SMALL_BUF_SIZE, "small_pool"));
static MEDIUM_POOL: LazyLock<BufPool> =
    LazyLock::new(|| BufPool::new(POOL_SIZE, MEDIUM_BUF_SIZE, "medium_pool"));

/// Large buffers: TLS record batches and big application writes.
static BUF_POOL: LazyLock<BufPool> = LazyLock::new(|| {
    BufPool::new(POOL_SIZE, MAX_POOL_BUF_SIZE, "generic_pool")
});

/// Buffers the transport reads socket data into.
static READ_POOL: LazyLock<BufPool> = LazyLock::new(|| {
    BufPool::new(READ_POOL_SIZE, MAX_POOL_BUF_SIZE, "read_pool")
});

/// Handle to the crate's static buffer pools.
#[derive(Default, Clone, Debug)]
pub struct BufFactory;

impl BufFactory {
    /// The maximum capacity a buffer keeps when it returns to a pool.
    pub const MAX_BUF_SIZE: usize = MAX_POOL_BUF_SIZE;

    /// Fetches an empty read buffer. Its allocation is reused from earlier
    /// reads when the pool has one.
    pub fn get_read_buf() -> PooledBuf {
        READ_POOL.get()
    }

    /// Creates an empty [`PooledBuf`] which is not taken from the pool. When
    /// dropped, it may be assigned to the generic pool if no longer empty.
    pub fn get_empty_buf() -> PooledBuf {
        BUF_POOL.get_empty()
    }

    /// Fetches a [`PooledBuf`] from the pool matching `slice`'s size and
    /// initializes it with the contents of `slice`.
    pub fn buf_from_slice(slice: &[u8]) -> PooledBuf {
        #[allow(clippy::match_overlapping_arm)]
        match slice.len() {
            0 => TINY_POOL.get_empty(),
            ..=TINY_BUF_SIZE => TINY_POOL.with_slice(slice),
            ..=SMALL_BUF_SIZE => SMALL_POOL.with_slice(slice),
            ..=MEDIUM_BUF_SIZE => MEDIUM_POOL.with_slice(slice),
            _ => BUF_POOL.with_slice(slice),
        }
    }

    /// Adds `buf` to the generic pool without copying it.
    pub fn buf_from_vec(buf: Vec<u8>) -> PooledBuf {
        BUF_POOL.from_owned(ConsumeBuffer::from_vec(buf))
    }

    /// Current occupancy of every pool.
    pub fn stats() -> [PoolStats; 5] {
        [
            TINY_POOL.stats(),
            SMALL_POOL.stats(),
            MEDIUM_POOL.stats(),
            BUF_POOL.stats(),
            READ_POOL.stats(),
        ]
    }
}
