//! Cross-tile merging of per-tile row minima into the global result.
//!
//! The N dimension is split across independently scheduled tiles, so each
//! tile only knows its local best candidate per row. Two strategies publish
//! those candidates:
//!
//! - [`MergeStrategy::RowLock`]: spin on the row's entry in a caller-owned
//!   [`RowLocks`] buffer, compare against the stored `(index, distance)`,
//!   overwrite if strictly better, release.
//! - [`MergeStrategy::Packed`]: compare-and-swap loop over a single
//!   `AtomicU64` holding `(ordered distance bits << 32) | index`; no lock
//!   state. Requires an element type with a 32-bit ordered key (`f32`).
//!
//! Both strategies apply the same total order (distance, then lowest index),
//! so the final value does not depend on which tile merges last.

use std::marker::PhantomData;
use std::sync::atomic::AtomicU64 as CounterU64;
use std::sync::atomic::Ordering as CounterOrdering;

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::sync::{spin_loop, AtomicU32, AtomicU64, Ordering};

/// Index reported when no valid column exists.
pub const NOT_FOUND: i64 = -1;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Index slot value in a packed key meaning [`NOT_FOUND`].
const PACKED_NOT_FOUND: u32 = u32::MAX;

// =============================================================================
// Candidates
// =============================================================================

/// A `(index, distance)` pair competing for a row's minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<T> {
    /// Row of Y, or [`NOT_FOUND`].
    pub index: i64,
    /// Squared L2 distance.
    pub distance: T,
}

impl<T: Element> Candidate<T> {
    /// Creates a candidate for column `index`.
    #[inline]
    #[must_use]
    pub fn new(index: i64, distance: T) -> Self {
        Self { index, distance }
    }

    /// The "nothing found yet" candidate.
    ///
    /// Only a distance strictly below `max_val` replaces it. A row whose
    /// every distance is `>= max_val`, including `f32` overflow to `+inf`,
    /// therefore reports `NOT_FOUND` and `max_val` even when `n > 0`.
    #[inline]
    #[must_use]
    pub fn none(max_val: T) -> Self {
        Self {
            index: NOT_FOUND,
            distance: max_val,
        }
    }

    /// True if this candidate refers to a real column.
    #[inline]
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.index >= 0
    }

    /// Strict candidate order: smaller distance wins; on equal distance the
    /// lower index wins and [`NOT_FOUND`] ranks after every real index.
    /// NaN distances never win.
    #[inline]
    #[must_use]
    pub fn is_better_than(&self, other: &Self) -> bool {
        match self.distance.partial_cmp(&other.distance) {
            Some(std::cmp::Ordering::Less) => true,
            Some(std::cmp::Ordering::Equal) => self.index_rank() < other.index_rank(),
            _ => false,
        }
    }

    #[inline]
    fn index_rank(&self) -> u64 {
        u64::try_from(self.index).unwrap_or(u64::MAX)
    }
}

/// Receives each row leader's local best at the end of a tile.
pub trait TileSink<T>: Sync {
    /// Merges `candidate` into global row `row`.
    fn offer(&self, row: usize, candidate: Candidate<T>);
}

/// How tiles publish their row minima.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Per-row spin lock guarding the caller's output slots.
    #[default]
    RowLock,
    /// Lock-free CAS over a packed `(distance, index)` key (f32 only).
    Packed,
}

// =============================================================================
// Merge statistics
// =============================================================================

/// Advisory merge counters for one run.
///
/// All counters use relaxed ordering; they do not synchronize anything.
#[derive(Debug, Default)]
pub struct MergeStats {
    candidates: CounterU64,
    replacements: CounterU64,
    contended: CounterU64,
}

impl MergeStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn record_candidate(&self) {
        self.candidates.fetch_add(1, CounterOrdering::Relaxed);
    }

    #[inline]
    fn record_replacement(&self) {
        self.replacements.fetch_add(1, CounterOrdering::Relaxed);
    }

    #[inline]
    fn record_contention(&self) {
        self.contended.fetch_add(1, CounterOrdering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MergeSnapshot {
        MergeSnapshot {
            candidates: self.candidates.load(CounterOrdering::Relaxed),
            replacements: self.replacements.load(CounterOrdering::Relaxed),
            contended: self.contended.load(CounterOrdering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`MergeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSnapshot {
    /// Candidates offered by row leaders.
    pub candidates: u64,
    /// Candidates that replaced the stored value.
    pub replacements: u64,
    /// Lock acquisitions or CAS attempts that lost a race.
    pub contended: u64,
}

// =============================================================================
// Row locks
// =============================================================================

/// Caller-owned, reusable per-row lock buffer.
///
/// Reset to unlocked by the dispatcher before every run.
#[derive(Debug)]
pub struct RowLocks {
    flags: Vec<AtomicU32>,
}

impl RowLocks {
    /// Allocates `len` unlocked rows.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            flags: (0..len).map(|_| AtomicU32::new(UNLOCKED)).collect(),
        }
    }

    /// Number of rows covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// True if the buffer covers no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Marks every row unlocked.
    pub fn reset(&mut self) {
        for flag in &self.flags {
            flag.store(UNLOCKED, Ordering::Relaxed);
        }
    }

    /// Marks row `row` unlocked.
    pub(crate) fn reset_row(&self, row: usize) {
        self.flags[row].store(UNLOCKED, Ordering::Relaxed);
    }

    /// True if `row` is currently held.
    #[must_use]
    pub fn is_locked(&self, row: usize) -> bool {
        self.flags[row].load(Ordering::Relaxed) == LOCKED
    }

    /// Spins until `row` is acquired.
    ///
    /// The acquiring CAS uses `Acquire`, the guard's release store uses
    /// `Release`: slot writes made under the lock are visible to the next
    /// holder before it reads.
    pub fn lock(&self, row: usize) -> RowLockGuard<'_> {
        let flag = &self.flags[row];
        let mut contended = false;
        while flag
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            contended = true;
            while flag.load(Ordering::Relaxed) == LOCKED {
                spin_loop();
            }
        }
        RowLockGuard { flag, contended }
    }
}

/// Holds one row lock; unlocks on drop.
#[derive(Debug)]
pub struct RowLockGuard<'a> {
    flag: &'a AtomicU32,
    contended: bool,
}

impl RowLockGuard<'_> {
    /// True if the acquisition had to wait for another holder.
    #[must_use]
    pub fn was_contended(&self) -> bool {
        self.contended
    }
}

impl Drop for RowLockGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(UNLOCKED, Ordering::Release);
    }
}

// =============================================================================
// Row-lock merger
// =============================================================================

/// Shared view of the caller's output buffers for the main pass.
///
/// Slots are read and written only while the row's lock is held.
pub(crate) struct OutputSlots<'a, T> {
    indices: *mut i64,
    distances: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: `OutputSlots` is shared across pool threads during the main pass.
// - Condition 1: it is built from exclusive `&'a mut` borrows, so nothing else
//   can touch the buffers for `'a`.
// - Condition 2: every access goes through `RowLockMerger::offer`, which holds
//   the row's lock, so no two threads access the same slot concurrently.
// Reason: many tiles merge into the same rows; per-row locking replaces `&mut`.
unsafe impl<T: Send> Send for OutputSlots<'_, T> {}
// SAFETY: see the `Send` impl above; shared access is serialized per row.
unsafe impl<T: Send> Sync for OutputSlots<'_, T> {}

impl<'a, T: Element> OutputSlots<'a, T> {
    pub(crate) fn new(indices: &'a mut [i64], distances: &'a mut [T]) -> Self {
        let len = indices.len().min(distances.len());
        Self {
            indices: indices.as_mut_ptr(),
            distances: distances.as_mut_ptr(),
            len,
            _marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// Caller must hold the lock of `row`.
    unsafe fn read(&self, row: usize) -> Candidate<T> {
        assert!(row < self.len, "row {row} out of range {}", self.len);
        Candidate {
            index: *self.indices.add(row),
            distance: *self.distances.add(row),
        }
    }

    /// # Safety
    ///
    /// Caller must hold the lock of `row`.
    unsafe fn write(&self, row: usize, candidate: Candidate<T>) {
        assert!(row < self.len, "row {row} out of range {}", self.len);
        *self.indices.add(row) = candidate.index;
        *self.distances.add(row) = candidate.distance;
    }
}

/// [`TileSink`] implementing the row-lock protocol.
pub(crate) struct RowLockMerger<'a, T> {
    slots: OutputSlots<'a, T>,
    locks: &'a RowLocks,
    stats: &'a MergeStats,
}

impl<'a, T: Element> RowLockMerger<'a, T> {
    pub(crate) fn new(
        slots: OutputSlots<'a, T>,
        locks: &'a RowLocks,
        stats: &'a MergeStats,
    ) -> Self {
        Self {
            slots,
            locks,
            stats,
        }
    }
}

impl<T: Element> TileSink<T> for RowLockMerger<'_, T> {
    fn offer(&self, row: usize, candidate: Candidate<T>) {
        self.stats.record_candidate();
        let guard = self.locks.lock(row);
        if guard.was_contended() {
            self.stats.record_contention();
        }
        // SAFETY: `guard` holds the lock of `row` until the end of this scope.
        // - Condition 1: `OutputSlots` is only accessed under row locks.
        // - Condition 2: the guard's drop publishes the write with `Release`.
        // Reason: shared outputs are mutated from many tiles.
        unsafe {
            let current = self.slots.read(row);
            if candidate.is_better_than(&current) {
                self.slots.write(row, candidate);
                self.stats.record_replacement();
            }
        }
        drop(guard);
    }
}

// =============================================================================
// Packed lock-free merger
// =============================================================================

/// Per-row packed `(ordered distance, index)` keys for lock-free merging.
#[derive(Debug)]
pub struct PackedKeys {
    keys: Vec<AtomicU64>,
}

impl PackedKeys {
    /// Allocates `len` rows, all holding the `(max_val, NOT_FOUND)` key.
    ///
    /// Returns `None` if `T` has no 32-bit ordered key.
    #[must_use]
    pub fn new<T: Element>(len: usize, max_val: T) -> Option<Self> {
        let sentinel = Self::pack(Candidate::none(max_val))?;
        Some(Self {
            keys: (0..len).map(|_| AtomicU64::new(sentinel)).collect(),
        })
    }

    /// Number of rows covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no rows are covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Packs a candidate; `None` if the element type has no ordered key or
    /// the index does not fit below the not-found slot.
    #[must_use]
    pub fn pack<T: Element>(candidate: Candidate<T>) -> Option<u64> {
        let dist = candidate.distance.ordered_key()?;
        let index = if candidate.index == NOT_FOUND {
            PACKED_NOT_FOUND
        } else {
            u32::try_from(candidate.index)
                .ok()
                .filter(|&i| i != PACKED_NOT_FOUND)?
        };
        Some((u64::from(dist) << 32) | u64::from(index))
    }

    /// Inverse of [`PackedKeys::pack`].
    #[must_use]
    pub fn unpack<T: Element>(key: u64) -> Option<Candidate<T>> {
        #[allow(clippy::cast_possible_truncation)] // Reason: high and low halves of a u64.
        let (dist, index) = ((key >> 32) as u32, key as u32);
        let index = if index == PACKED_NOT_FOUND {
            NOT_FOUND
        } else {
            i64::from(index)
        };
        Some(Candidate::new(index, T::from_ordered_key(dist)?))
    }

    /// Current candidate of `row`.
    #[must_use]
    pub fn load<T: Element>(&self, row: usize) -> Option<Candidate<T>> {
        Self::unpack(self.keys[row].load(Ordering::Acquire))
    }

    /// CAS-min merge of `candidate` into `row`. Returns true if it replaced
    /// the stored key.
    pub fn merge<T: Element>(&self, row: usize, candidate: Candidate<T>) -> bool {
        self.merge_counted(row, candidate, None)
    }

    fn merge_counted<T: Element>(
        &self,
        row: usize,
        candidate: Candidate<T>,
        stats: Option<&MergeStats>,
    ) -> bool {
        // NaN has no place in the key order.
        if candidate.distance.partial_cmp(&candidate.distance).is_none() {
            return false;
        }
        let Some(key) = Self::pack(candidate) else {
            return false;
        };
        let slot = &self.keys[row];
        let mut current = slot.load(Ordering::Relaxed);
        while key < current {
            match slot.compare_exchange_weak(current, key, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(actual) => {
                    if let Some(stats) = stats {
                        stats.record_contention();
                    }
                    current = actual;
                }
            }
        }
        false
    }
}

/// [`TileSink`] over [`PackedKeys`].
pub(crate) struct PackedMerger<'a> {
    keys: &'a PackedKeys,
    stats: &'a MergeStats,
}

impl<'a> PackedMerger<'a> {
    pub(crate) fn new(keys: &'a PackedKeys, stats: &'a MergeStats) -> Self {
        Self { keys, stats }
    }
}

impl<T: Element> TileSink<T> for PackedMerger<'_> {
    fn offer(&self, row: usize, candidate: Candidate<T>) {
        self.stats.record_candidate();
        if self.keys.merge_counted(row, candidate, Some(self.stats)) {
            self.stats.record_replacement();
        }
    }
}
