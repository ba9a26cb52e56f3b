//! Tests for `merge` module

#![allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]

use std::sync::Arc;
use std::thread;

use super::merge::*;

// =========================================================================
// Candidate order
// =========================================================================

#[test]
fn test_smaller_distance_wins() {
    let a = Candidate::new(5, 1.0_f32);
    let b = Candidate::new(2, 2.0_f32);
    assert!(a.is_better_than(&b));
    assert!(!b.is_better_than(&a));
}

#[test]
fn test_tie_prefers_lower_index() {
    let a = Candidate::new(3, 1.0_f32);
    let b = Candidate::new(7, 1.0_f32);
    assert!(a.is_better_than(&b));
    assert!(!b.is_better_than(&a));
    assert!(!a.is_better_than(&a));
}

#[test]
fn test_not_found_ranks_last_on_tie() {
    let found = Candidate::new(1_000_000, f32::MAX);
    let none = Candidate::none(f32::MAX);
    assert!(found.is_better_than(&none));
    assert!(!none.is_better_than(&found));
}

#[test]
fn test_nan_never_wins() {
    let nan = Candidate::new(0, f64::NAN);
    let real = Candidate::new(9, 100.0);
    assert!(!nan.is_better_than(&real));
    assert!(!real.is_better_than(&nan));
    assert!(!nan.is_better_than(&Candidate::none(f64::MAX)));
}

// =========================================================================
// Row locks
// =========================================================================

#[test]
fn test_row_lock_guard_unlocks_on_drop() {
    let locks = RowLocks::new(2);
    {
        let guard = locks.lock(1);
        assert!(!guard.was_contended());
        assert!(locks.is_locked(1));
        assert!(!locks.is_locked(0));
    }
    assert!(!locks.is_locked(1));
}

#[test]
fn test_row_lock_reset_clears_held_rows() {
    let mut locks = RowLocks::new(3);
    std::mem::forget(locks.lock(0));
    std::mem::forget(locks.lock(2));
    locks.reset();
    assert!((0..3).all(|r| !locks.is_locked(r)));
}

#[test]
fn test_row_lock_mutual_exclusion() {
    let locks = Arc::new(RowLocks::new(1));
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let inside = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                for _ in 0..500 {
                    let _guard = locks.lock(0);
                    assert!(!inside.swap(true, std::sync::atomic::Ordering::SeqCst));
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    inside.store(false, std::sync::atomic::Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 4000);
}

// =========================================================================
// Row-lock merger
// =========================================================================

#[test]
fn test_row_lock_merger_keeps_global_minimum() {
    let rows = 4;
    let mut indices = vec![NOT_FOUND; rows];
    let mut distances = vec![f32::MAX; rows];
    let locks = RowLocks::new(rows);
    let stats = MergeStats::new();
    {
        let merger = RowLockMerger::new(OutputSlots::new(&mut indices, &mut distances), &locks, &stats);
        thread::scope(|s| {
            for t in 0..8_i64 {
                let merger = &merger;
                s.spawn(move || {
                    for row in 0..rows {
                        // thread t offers column t with distance (t - 3)^2 + row
                        let d = ((t - 3) * (t - 3)) as f32 + row as f32;
                        merger.offer(row, Candidate::new(t, d));
                    }
                });
            }
        });
    }
    assert_eq!(indices, vec![3; rows]);
    assert_eq!(distances, vec![0.0, 1.0, 2.0, 3.0]);
    let snap = stats.snapshot();
    assert_eq!(snap.candidates, 32);
    assert!(snap.replacements >= 4);
    assert!(snap.replacements <= 32);
}

#[test]
fn test_row_lock_merger_ignores_worse_candidates() {
    let mut indices = vec![2_i64];
    let mut distances = vec![1.0_f64];
    let locks = RowLocks::new(1);
    let stats = MergeStats::new();
    {
        let merger = RowLockMerger::new(OutputSlots::new(&mut indices, &mut distances), &locks, &stats);
        merger.offer(0, Candidate::new(0, 5.0));
        merger.offer(0, Candidate::new(9, 1.0));
        merger.offer(0, Candidate::new(1, 1.0));
    }
    assert_eq!((indices[0], distances[0]), (1, 1.0));
    assert_eq!(stats.snapshot().replacements, 1);
}

// =========================================================================
// Packed keys
// =========================================================================

#[test]
fn test_pack_orders_like_candidates() {
    let pairs = [
        (Candidate::new(4, 0.5_f32), Candidate::new(1, 0.75_f32)),
        (Candidate::new(1, 2.0), Candidate::new(2, 2.0)),
        (Candidate::new(0, 0.0), Candidate::new(0, 1.0e-30)),
        (Candidate::new(7, f32::MAX), Candidate::none(f32::MAX)),
    ];
    for (better, worse) in pairs {
        assert!(better.is_better_than(&worse));
        let (kb, kw) = (PackedKeys::pack(better).unwrap(), PackedKeys::pack(worse).unwrap());
        assert!(kb < kw, "{better:?} vs {worse:?}");
    }
}

#[test]
fn test_unpack_restores_candidate() {
    for cand in [Candidate::new(12, 3.25_f32), Candidate::none(f32::MAX)] {
        let key = PackedKeys::pack(cand).unwrap();
        assert_eq!(PackedKeys::unpack::<f32>(key), Some(cand));
    }
}

#[test]
fn test_pack_rejects_unrepresentable() {
    assert!(PackedKeys::pack(Candidate::new(1, 1.0_f64)).is_none());
    assert!(PackedKeys::pack(Candidate::new(i64::from(u32::MAX), 1.0_f32)).is_none());
    assert!(PackedKeys::new(4, f64::MAX).is_none());
}

#[test]
fn test_packed_merge_is_monotonic() {
    let keys = PackedKeys::new(1, f32::MAX).unwrap();
    assert_eq!(keys.load::<f32>(0), Some(Candidate::none(f32::MAX)));
    assert!(keys.merge(0, Candidate::new(5, 4.0_f32)));
    assert!(!keys.merge(0, Candidate::new(6, 9.0_f32)));
    assert!(keys.merge(0, Candidate::new(2, 4.0_f32)));
    assert!(!keys.merge(0, Candidate::new(0, f32::NAN)));
    assert_eq!(keys.load::<f32>(0), Some(Candidate::new(2, 4.0)));
}

#[test]
fn test_packed_merger_concurrent_minimum() {
    let keys = PackedKeys::new(2, f32::MAX).unwrap();
    let stats = MergeStats::new();
    let merger = PackedMerger::new(&keys, &stats);
    thread::scope(|s| {
        for t in 0..8_i64 {
            let merger = &merger;
            s.spawn(move || {
                for step in 0..100_i64 {
                    let col = t * 100 + step;
                    let d = ((col * 7919) % 1000) as f32;
                    TileSink::<f32>::offer(merger, (col % 2) as usize, Candidate::new(col, d));
                }
            });
        }
    });
    // col * 7919 % 1000 == 0 first at col 0 (even) and never for odd cols below 800
    let even = keys.load::<f32>(0).unwrap();
    assert_eq!(even, Candidate::new(0, 0.0));
    let odd = keys.load::<f32>(1).unwrap();
    assert!(odd.index % 2 == 1);
    assert_eq!(stats.snapshot().candidates, 800);
}
