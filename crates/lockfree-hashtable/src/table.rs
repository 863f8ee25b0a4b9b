// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The concurrent table: entry array, slot pool, and payload arenas over a
//! single backing buffer, plus the lock-free insert/find/erase protocols.
//!
//! # Memory Layout
//!
//! ```text
//! +------------------+------------------+------------------+----------------+
//! | entries (8*N B)  | keys (N*K, pad8) | vals (N*V, pad8) | pool (8*ceilN) |
//! +------------------+------------------+------------------+----------------+
//! ```
//!
//! # Synchronization Protocol
//!
//! Insert:
//! 1. Claim a slot from the pool (acquire fetch_or).
//! 2. Copy key/value into the payload arenas at that slot — unpublished,
//!    invisible to readers.
//! 3. CAS-install `(slot, version+1)` along the probe sequence. On success,
//!    release the displaced slot (if any) back to the pool.
//!
//! Find:
//! 1. Load the entry word, decode `(slot, version)`.
//! 2. Compare the key in the payload arena.
//! 3. Re-load the entry word; if unchanged, the read linearizes at the
//!    re-load and the copied value is valid.
//!
//! Erase: same probe as insert, CAS-installs `(NULL_SLOT, version+1)`
//! (a tombstone) and releases the slot.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{Config, Layout};
use crate::entry::{pack, unpack, NULL_SLOT};
use crate::hash::{JenkinsOneAtATime, KeyHash};

/// A fixed-capacity, lock-free associative table mapping fixed-size byte
/// keys to fixed-size byte values.
///
/// `H` selects the key hash (see [`KeyHash`]); it defaults to
/// [`JenkinsOneAtATime`], the reference hash.
///
/// All of `insert`, `find`, and `erase` take `&self`: the table is safe to
/// share across any number of threads once constructed.
pub struct Table<H: KeyHash = JenkinsOneAtATime> {
    config: Config,
    layout: Layout,
    base: NonNull<u8>,
    /// `Some` when the table owns its backing storage (built via [`Table::new`]);
    /// `None` when it was built over a caller-supplied buffer via
    /// [`Table::init`], in which case the caller owns the allocation and
    /// must keep it alive for the table's lifetime.
    storage: Option<Box<[u64]>>,
    _hash: PhantomData<H>,
}

// SAFETY: all mutable state reachable from `&Table` is either an atomic
// (`entries`, `pool`) or a payload byte region whose concurrent-access
// discipline is governed by the pool bit (see `claim_slot`/`release_slot`
// and the SAFETY comments on `key_ptr`/`val_ptr`), exactly as for the
// teacher's `ShmSegment`/`ShmSlot` pair.
unsafe impl<H: KeyHash> Send for Table<H> {}
unsafe impl<H: KeyHash> Sync for Table<H> {}

impl<H: KeyHash> Table<H> {
    /// Build a table that owns its backing storage.
    ///
    /// Allocates exactly `config.mem_size()` bytes (rounded up to a whole
    /// number of `u64` words, which also guarantees 8-byte alignment) and
    /// zero-initializes the entries and pool regions.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let layout = config.layout();
        let words = layout.total.div_ceil(8);
        let storage: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        // SAFETY: a non-empty boxed slice's data pointer is never null.
        let base = NonNull::new(storage.as_ptr().cast_mut().cast::<u8>())
            .expect("boxed slice pointer is never null");

        let table = Self {
            config,
            layout,
            base,
            storage: Some(storage),
            _hash: PhantomData,
        };
        table.zero_entries_and_pool();
        log::debug!(
            "[lockfree_hashtable] table created: capacity={} key_len={} val_len={} mem_size={}",
            config.capacity(),
            config.key_len(),
            config.val_len(),
            layout.total,
        );
        table
    }

    /// Build a table over a caller-supplied buffer.
    ///
    /// Mirrors `lockfree_hashtable_init` from the reference implementation:
    /// no allocation happens here, and the table borrows `buf`'s bytes for
    /// as long as it is used.
    ///
    /// # Safety
    ///
    /// - `buf` must be at least `config.mem_size()` bytes.
    /// - `buf` must be aligned to 8 bytes.
    /// - `buf`'s backing memory must remain valid and must not be accessed
    ///   through any other handle for as long as the returned `Table` (or
    ///   any clone of its raw pointer) is in use.
    /// - Concurrent use of any other `Table` operation while `init` runs is
    ///   undefined behavior; `init` must complete-before any `insert`,
    ///   `find`, or `erase` call, the same as the original C contract.
    ///
    /// Violating any of these is undefined behavior in release builds;
    /// debug builds assert the size and alignment preconditions.
    pub unsafe fn init(config: Config, buf: &mut [u8]) -> Self {
        let layout = config.layout();
        debug_assert!(
            buf.len() >= layout.total,
            "buffer too small: need {} bytes, got {}",
            layout.total,
            buf.len()
        );
        debug_assert_eq!(
            buf.as_ptr() as usize % 8,
            0,
            "buffer must be 8-byte aligned"
        );

        let base = NonNull::new(buf.as_mut_ptr()).expect("buffer pointer must not be null");
        let table = Self {
            config,
            layout,
            base,
            storage: None,
            _hash: PhantomData,
        };
        table.zero_entries_and_pool();
        log::debug!(
            "[lockfree_hashtable] table initialized over caller buffer: capacity={} key_len={} val_len={} mem_size={}",
            config.capacity(),
            config.key_len(),
            config.val_len(),
            layout.total,
        );
        table
    }

    /// The configuration this table was built with.
    #[must_use]
    pub const fn config(&self) -> Config {
        self.config
    }

    #[inline]
    fn entries(&self) -> &[AtomicU64] {
        // SAFETY: the entries region is `capacity` consecutive `u64`s at
        // offset 0, reserved and zero-initialized at construction; it is
        // never reinterpreted as anything else for the table's lifetime.
        unsafe {
            slice::from_raw_parts(self.base.as_ptr().cast::<AtomicU64>(), self.config.capacity())
        }
    }

    #[inline]
    fn pool(&self) -> &[AtomicU64] {
        // SAFETY: the pool region is `pool_chunks` consecutive `u64`s
        // starting at `layout.pool_offset`, reserved and zero-initialized
        // at construction.
        unsafe {
            let ptr = self.base.as_ptr().add(self.layout.pool_offset).cast::<AtomicU64>();
            slice::from_raw_parts(ptr, self.layout.pool_chunks)
        }
    }

    #[inline]
    fn key_ptr(&self, slot: u32) -> *mut u8 {
        debug_assert!((slot as usize) < self.config.capacity());
        // SAFETY: `slot < capacity`, so the offset stays within the keys
        // region reserved by `Config::layout`.
        unsafe {
            self.base
                .as_ptr()
                .add(self.layout.keys_offset + slot as usize * self.config.key_len())
        }
    }

    #[inline]
    fn val_ptr(&self, slot: u32) -> *mut u8 {
        debug_assert!((slot as usize) < self.config.capacity());
        // SAFETY: `slot < capacity`, so the offset stays within the values
        // region reserved by `Config::layout`.
        unsafe {
            self.base
                .as_ptr()
                .add(self.layout.vals_offset + slot as usize * self.config.val_len())
        }
    }

    /// # Safety
    ///
    /// `slot` must be `< capacity`. The byte range read is only free of
    /// data races against a concurrent writer of the *same* slot to the
    /// extent the caller has already validated via the entry-word protocol
    /// (a stale read here costs at most a spurious CAS failure or a retry,
    /// never more — see the "Known subtlety" note on `find`).
    #[inline]
    unsafe fn key_at(&self, slot: u32) -> &[u8] {
        slice::from_raw_parts(self.key_ptr(slot), self.config.key_len())
    }

    /// # Safety
    ///
    /// Same contract as [`Self::key_at`].
    #[inline]
    unsafe fn val_at(&self, slot: u32) -> &[u8] {
        slice::from_raw_parts(self.val_ptr(slot), self.config.val_len())
    }

    fn zero_entries_and_pool(&self) {
        for e in self.entries() {
            e.store(0, Ordering::Relaxed);
        }
        for p in self.pool() {
            p.store(0, Ordering::Relaxed);
        }
    }

    /// Scan the pool bitmap for a clear bit and claim it.
    ///
    /// Ordering rationale: the acquire on the winning `fetch_or` pairs with
    /// the release in [`Self::release_slot`], giving the new owner a
    /// happens-before edge to the prior owner's last writes to that slot,
    /// so nothing the new owner subsequently writes can be observed to
    /// precede the handoff.
    fn claim_slot(&self) -> u32 {
        let capacity = self.config.capacity();
        for (chunk_idx, chunk) in self.pool().iter().enumerate() {
            let snapshot = chunk.load(Ordering::Relaxed);
            if snapshot == u64::MAX {
                continue;
            }
            for bit_idx in 0..64u32 {
                let slot = chunk_idx as u32 * 64 + bit_idx;
                if slot as usize >= capacity {
                    return NULL_SLOT;
                }
                let bit = 1u64 << bit_idx;
                if snapshot & bit != 0 {
                    continue;
                }
                if chunk.fetch_or(bit, Ordering::Acquire) & bit == 0 {
                    return slot;
                }
            }
        }
        NULL_SLOT
    }

    /// Clear a slot's pool bit, making it available for reuse.
    ///
    /// Must clear the bit (`fetch_and(!bit)`), not set it. An earlier
    /// variant of this routine used `fetch_or` here, which looks similar
    /// but never frees anything — every bit starts at 0 and `fetch_or`
    /// only ever sets bits, so a released slot would stay permanently
    /// claimed. Release ordering publishes this thread's prior writes (the
    /// CAS that displaced the slot) to whichever thread next claims it.
    fn release_slot(&self, slot: u32) {
        if slot == NULL_SLOT {
            return;
        }
        let chunk_idx = (slot / 64) as usize;
        let bit = 1u64 << (slot % 64);
        self.pool()[chunk_idx].fetch_and(!bit, Ordering::Release);
    }

    /// Insert `key -> val`, replacing any prior mapping for `key`.
    ///
    /// Returns `false` only when the table is full (pool exhausted) or the
    /// probe sequence exhausts all `capacity` positions without finding an
    /// installable one (pathological high-collision load).
    ///
    /// # Panics
    ///
    /// Panics if `key.len() != config.key_len()` or `val.len() != config.val_len()`.
    pub fn insert(&self, key: &[u8], val: &[u8]) -> bool {
        assert_eq!(key.len(), self.config.key_len(), "key length mismatch");
        assert_eq!(val.len(), self.config.val_len(), "value length mismatch");

        let slot = self.claim_slot();
        if slot == NULL_SLOT {
            log::debug!(
                "[lockfree_hashtable] insert failed: pool exhausted (capacity={})",
                self.config.capacity()
            );
            return false;
        }

        // SAFETY: `slot` was just claimed and is not referenced by any
        // entry word yet, so no reader or writer can observe or race this
        // write.
        unsafe {
            ptr::copy_nonoverlapping(key.as_ptr(), self.key_ptr(slot), key.len());
            ptr::copy_nonoverlapping(val.as_ptr(), self.val_ptr(slot), val.len());
        }

        let entries = self.entries();
        let capacity = self.config.capacity();
        let start = (H::hash(key) as usize) % capacity;

        for step in 0..capacity {
            let idx = (start + step) % capacity;
            let mut old_word = entries[idx].load(Ordering::Acquire);
            loop {
                let (old_slot, old_version) = unpack(old_word);
                // SAFETY: reached only when old_slot != NULL_SLOT and
                // old_version > 0, i.e. old_slot was a previously claimed,
                // in-bounds slot.
                let can_install = old_version == 0
                    || old_slot == NULL_SLOT
                    || unsafe { self.key_at(old_slot) } == key;

                if can_install {
                    let new_word = pack(slot, old_version.wrapping_add(1));
                    match entries[idx].compare_exchange_weak(
                        old_word,
                        new_word,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            if old_version > 0 {
                                self.release_slot(old_slot);
                            }
                            return true;
                        }
                        Err(current) => {
                            old_word = current;
                        }
                    }
                } else {
                    let current = entries[idx].load(Ordering::Acquire);
                    if current == old_word {
                        break; // stable collision: advance the probe
                    }
                    old_word = current;
                }
            }
        }

        self.release_slot(slot);
        log::debug!(
            "[lockfree_hashtable] insert failed: probe exhausted (capacity={})",
            capacity
        );
        false
    }

    /// Look up `key`. If found and `out_val` is `Some`, copies the value
    /// into it and returns `true`; returns `false` if `key` is absent.
    ///
    /// # Panics
    ///
    /// Panics if `key.len() != config.key_len()`, or if `out_val` is
    /// `Some` and its length doesn't match `config.val_len()`.
    pub fn find(&self, key: &[u8], mut out_val: Option<&mut [u8]>) -> bool {
        assert_eq!(key.len(), self.config.key_len(), "key length mismatch");
        if let Some(buf) = out_val.as_deref() {
            assert_eq!(buf.len(), self.config.val_len(), "value buffer length mismatch");
        }

        let entries = self.entries();
        let capacity = self.config.capacity();
        let start = (H::hash(key) as usize) % capacity;

        for step in 0..capacity {
            let idx = (start + step) % capacity;
            let mut word = entries[idx].load(Ordering::Acquire);
            loop {
                let (slot, version) = unpack(word);
                if version == 0 {
                    return false; // empty terminus
                }
                if slot == NULL_SLOT {
                    break; // tombstone: advance the probe
                }

                // SAFETY: slot is in-bounds, referenced by a live entry word.
                let matches = unsafe { self.key_at(slot) } == key;
                if matches {
                    if let Some(ref mut buf) = out_val {
                        // SAFETY: re-validated by the reload immediately
                        // below; if the entry changed, we discard this copy
                        // and retry rather than trust it.
                        buf.copy_from_slice(unsafe { self.val_at(slot) });
                    }
                    let reloaded = entries[idx].load(Ordering::Acquire);
                    if reloaded == word {
                        return true; // linearizes at this reload
                    }
                    word = reloaded;
                } else {
                    let reloaded = entries[idx].load(Ordering::Acquire);
                    if reloaded == word {
                        break; // stable collision: advance the probe
                    }
                    word = reloaded;
                }
            }
        }
        false
    }

    /// Remove `key`. Returns `true` if it was present, `false` otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `key.len() != config.key_len()`.
    pub fn erase(&self, key: &[u8]) -> bool {
        assert_eq!(key.len(), self.config.key_len(), "key length mismatch");

        let entries = self.entries();
        let capacity = self.config.capacity();
        let start = (H::hash(key) as usize) % capacity;

        for step in 0..capacity {
            let idx = (start + step) % capacity;
            let mut old_word = entries[idx].load(Ordering::Acquire);
            loop {
                let (old_slot, old_version) = unpack(old_word);
                if old_version == 0 {
                    return false;
                }
                if old_slot == NULL_SLOT {
                    break; // tombstone: advance the probe
                }

                // SAFETY: old_slot is in-bounds, referenced by a live entry word.
                if unsafe { self.key_at(old_slot) } == key {
                    let new_word = pack(NULL_SLOT, old_version.wrapping_add(1));
                    match entries[idx].compare_exchange_weak(
                        old_word,
                        new_word,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.release_slot(old_slot);
                            return true;
                        }
                        Err(current) => {
                            old_word = current;
                        }
                    }
                } else {
                    let current = entries[idx].load(Ordering::Acquire);
                    if current == old_word {
                        break; // stable collision: advance the probe
                    }
                    old_word = current;
                }
            }
        }
        false
    }
}
