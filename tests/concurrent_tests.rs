use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;

use bitpool::{AcquireError, ConcurrentBitset, scan_hint};

#[test]
fn concurrent_claims_are_unique() {
    // 8 threads race for 256 slots; every successfully claimed bit must be
    // distinct while held.
    let pool = ConcurrentBitset::with_tag_lg2(8, 0).unwrap();
    let claimed = Mutex::new(Vec::new());

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let mut mine = Vec::new();
                for _ in 0..32 {
                    let claim = pool.acquire_pow2(scan_hint(), 0).unwrap();
                    assert!(claim.bit < 256);
                    assert!(claim.used >= 1 && claim.used <= 256);
                    mine.push(claim.bit);
                }
                claimed.lock().unwrap().extend(mine);
            });
        }
    });

    let claimed = claimed.into_inner().unwrap();
    assert_eq!(claimed.len(), 256);
    let distinct: HashSet<u32> = claimed.iter().copied().collect();
    assert_eq!(distinct.len(), 256, "duplicate bit handed out");
    assert_eq!(pool.used(), 256);
}

#[test]
fn oversubscribed_acquires_stay_capacity_bounded() {
    // 8 threads each try 64 acquires against 64 slots with no releases:
    // exactly 64 succeed, everything else reports Full.
    let pool = ConcurrentBitset::new(64).unwrap();
    let successes = AtomicU32::new(0);
    let fulls = AtomicU32::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..64 {
                    match pool.acquire(scan_hint() % 64, 0) {
                        Ok(claim) => {
                            assert!(claim.bit < 64);
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(AcquireError::Full) => {
                            fulls.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(other) => panic!("unexpected failure: {other}"),
                    }
                }
            });
        }
    });

    assert_eq!(successes.load(Ordering::Relaxed), 64);
    assert_eq!(fulls.load(Ordering::Relaxed), 8 * 64 - 64);
    assert_eq!(pool.used(), 64);
}

#[test]
fn churn_settles_to_zero() {
    // Acquire/release churn well past the capacity: a tight pool under heavy
    // reuse. `Full` is a legal transient here (reservation may interleave
    // with another thread's release); retry resolves it.
    let pool = ConcurrentBitset::with_tag_lg2(4, 3).unwrap();

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let mut held = None;
                let mut ops = 0u32;
                while ops < 2000 {
                    match held.take() {
                        Some(bit) => {
                            pool.release(bit, 3).unwrap();
                            ops += 1;
                        }
                        None => match pool.acquire_pow2(scan_hint(), 3) {
                            Ok(claim) => held = Some(claim.bit),
                            Err(AcquireError::Full) => thread::yield_now(),
                            Err(other) => panic!("unexpected failure: {other}"),
                        },
                    }
                }
                if let Some(bit) = held {
                    pool.release(bit, 3).unwrap();
                }
            });
        }
    });

    assert_eq!(pool.used(), 0);
    for bit in 0..16 {
        assert!(!pool.is_claimed(bit));
    }
}

#[test]
fn full_is_transient_under_releases() {
    // One slot, one releaser, one persistent acquirer: the acquirer must
    // eventually win despite spurious Full reports.
    let pool = ConcurrentBitset::new(1).unwrap();
    let first = pool.acquire(0, 0).unwrap();
    assert_eq!(first.bit, 0);

    thread::scope(|s| {
        s.spawn(|| {
            thread::yield_now();
            pool.release(0, 0).unwrap();
        });
        s.spawn(|| loop {
            match pool.acquire(0, 0) {
                Ok(claim) => {
                    assert_eq!(claim.bit, 0);
                    break;
                }
                Err(AcquireError::Full) => thread::yield_now(),
                Err(other) => panic!("unexpected failure: {other}"),
            }
        });
    });

    assert_eq!(pool.used(), 1);
}
