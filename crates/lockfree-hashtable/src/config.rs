// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Table configuration and memory layout calculation.

use std::fmt;
use std::mem::size_of;

/// Fixed for the lifetime of a [`crate::Table`]: slot count, key length,
/// and value length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    capacity: usize,
    key_len: usize,
    val_len: usize,
}

/// Byte layout of the single backing buffer, in the order the table expects
/// it: entries, keys, values, pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub entries_bytes: usize,
    pub keys_offset: usize,
    pub keys_bytes: usize,
    pub vals_offset: usize,
    pub vals_bytes: usize,
    pub pool_offset: usize,
    pub pool_chunks: usize,
    pub total: usize,
}

#[inline]
const fn roundup8(x: usize) -> usize {
    (x + 7) & !7
}

impl Config {
    /// Build a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `capacity`, `key_len` or `val_len` is
    /// zero. This is the one entry point the crate validates at runtime;
    /// everything else misuse can touch (undersized/misaligned buffers,
    /// calling `init` concurrently) remains an unchecked `unsafe` contract,
    /// as documented on [`crate::Table::init`].
    pub fn new(capacity: usize, key_len: usize, val_len: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if key_len == 0 {
            return Err(ConfigError::ZeroKeyLen);
        }
        if val_len == 0 {
            return Err(ConfigError::ZeroValLen);
        }
        Ok(Self { capacity, key_len, val_len })
    }

    /// Slot count (`N`).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Key byte length (`K`).
    #[must_use]
    pub const fn key_len(&self) -> usize {
        self.key_len
    }

    /// Value byte length (`V`).
    #[must_use]
    pub const fn val_len(&self) -> usize {
        self.val_len
    }

    /// Required backing buffer size, in bytes: `calc_mem_size` from the
    /// original specification.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.layout().total
    }

    pub(crate) fn layout(&self) -> Layout {
        let entries_bytes = self.capacity * size_of::<u64>();
        let keys_bytes = roundup8(self.capacity * self.key_len);
        let vals_bytes = roundup8(self.capacity * self.val_len);
        let pool_chunks = self.capacity.div_ceil(64);
        let pool_bytes = pool_chunks * size_of::<u64>();

        let keys_offset = entries_bytes;
        let vals_offset = keys_offset + keys_bytes;
        let pool_offset = vals_offset + vals_bytes;
        let total = pool_offset + pool_bytes;

        Layout {
            entries_bytes,
            keys_offset,
            keys_bytes,
            vals_offset,
            vals_bytes,
            pool_offset,
            pool_chunks,
            total,
        }
    }
}

/// Error constructing a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity (`N`) was zero.
    ZeroCapacity,
    /// Key length (`K`) was zero.
    ZeroKeyLen,
    /// Value length (`V`) was zero.
    ZeroValLen,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "table capacity must be greater than zero"),
            Self::ZeroKeyLen => write!(f, "key length must be greater than zero"),
            Self::ZeroValLen => write!(f, "value length must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
