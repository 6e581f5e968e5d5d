//! Retry caps and try statistics, shared process-wide.
//!
//! Every exchange records its terminal status and the attempt it ended on.
//! Updates are rare compared to exchanges, so one mutex over the whole
//! record is sufficient.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::ErrorKind;

/// Hard upper bound for any retry cap.
pub const MAX_TRIES: usize = 15;

/// Operation classes with independent retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetryClass {
    WriteOnly,
    WriteRead,
    MultiPartRead,
    MultiPartWrite,
}

impl RetryClass {
    pub const ALL: [RetryClass; 4] = [
        RetryClass::WriteOnly,
        RetryClass::WriteRead,
        RetryClass::MultiPartRead,
        RetryClass::MultiPartWrite,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RetryClass::WriteOnly => "write-only",
            RetryClass::WriteRead => "write-read",
            RetryClass::MultiPartRead => "multi-part-read",
            RetryClass::MultiPartWrite => "multi-part-write",
        }
    }

    fn index(self) -> usize {
        match self {
            RetryClass::WriteOnly => 0,
            RetryClass::WriteRead => 1,
            RetryClass::MultiPartRead => 2,
            RetryClass::MultiPartWrite => 3,
        }
    }
}

#[derive(Debug)]
struct ClassStats {
    cap: usize,
    /// Bucket `i` counts operations whose terminal attempt was `i + 1`.
    by_attempt: [u64; MAX_TRIES],
    ok: u64,
    by_status: BTreeMap<ErrorKind, u64>,
}

impl ClassStats {
    const fn new(cap: usize) -> Self {
        ClassStats {
            cap,
            by_attempt: [0; MAX_TRIES],
            ok: 0,
            by_status: BTreeMap::new(),
        }
    }

    fn clear(&mut self) {
        self.by_attempt = [0; MAX_TRIES];
        self.ok = 0;
        self.by_status.clear();
    }
}

static STATS: Mutex<[ClassStats; 4]> = Mutex::new([
    ClassStats::new(4),
    ClassStats::new(4),
    ClassStats::new(3),
    ClassStats::new(3),
]);

static VERIFY_SETVCP: AtomicBool = AtomicBool::new(false);

fn lock() -> std::sync::MutexGuard<'static, [ClassStats; 4]> {
    STATS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Set the retry cap of an operation class, clamped to `1..=MAX_TRIES`.
pub fn set_cap(class: RetryClass, cap: usize) {
    lock()[class.index()].cap = cap.clamp(1, MAX_TRIES);
}

pub fn get_cap(class: RetryClass) -> usize {
    lock()[class.index()].cap
}

/// Record a finished operation: its terminal status and the attempt number
/// it ended on.
pub(crate) fn record(class: RetryClass, terminal: Result<(), ErrorKind>, attempts: usize) {
    let mut stats = lock();
    let rec = &mut stats[class.index()];
    let bucket = attempts.clamp(1, MAX_TRIES) - 1;
    rec.by_attempt[bucket] += 1;
    match terminal {
        Ok(()) => rec.ok += 1,
        Err(kind) => *rec.by_status.entry(kind).or_insert(0) += 1,
    }
}

/// Zero all statistics, leaving the caps untouched.
pub fn reset() {
    for rec in lock().iter_mut() {
        rec.clear();
    }
}

/// Textual report of all classes. With `verbose`, the per-status counters
/// are included.
pub fn report(verbose: bool) -> String {
    let stats = lock();
    let mut out = String::new();
    for class in RetryClass::ALL {
        let rec = &stats[class.index()];
        let total: u64 = rec.by_attempt.iter().sum();
        let _ = writeln!(
            out,
            "{}: cap {}, {} operations, {} ok",
            class.name(),
            rec.cap,
            total,
            rec.ok
        );
        for (i, count) in rec.by_attempt.iter().enumerate().filter(|(_, c)| **c > 0) {
            let _ = writeln!(out, "  ended on attempt {}: {}", i + 1, count);
        }
        if verbose {
            for (kind, count) in &rec.by_status {
                let _ = writeln!(out, "  {kind}: {count}");
            }
        }
    }
    out
}

/// Toggle post-write read-back verification for set operations.
pub fn set_verify_setvcp(on: bool) {
    VERIFY_SETVCP.store(on, Ordering::Relaxed);
}

pub fn verify_setvcp() -> bool {
    VERIFY_SETVCP.load(Ordering::Relaxed)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cap_is_clamped() {
        set_cap(RetryClass::WriteOnly, 0);
        assert_eq!(get_cap(RetryClass::WriteOnly), 1);
        set_cap(RetryClass::WriteOnly, 100);
        assert_eq!(get_cap(RetryClass::WriteOnly), MAX_TRIES);
        set_cap(RetryClass::WriteOnly, 4);
        assert_eq!(get_cap(RetryClass::WriteOnly), 4);
    }

    #[test]
    fn record_fills_histogram_and_status() {
        reset();
        record(RetryClass::MultiPartWrite, Ok(()), 1);
        record(RetryClass::MultiPartWrite, Err(ErrorKind::Retries), 3);
        record(RetryClass::MultiPartWrite, Err(ErrorKind::Retries), 3);
        let text = report(true);
        assert!(text.contains("multi-part-write: cap 3, 3 operations, 1 ok"));
        assert!(text.contains("ended on attempt 1: 1"));
        assert!(text.contains("ended on attempt 3: 2"));
        assert!(text.contains("maximum tries exceeded: 2"));
        reset();
    }

    #[test]
    fn verify_toggle_round_trips() {
        set_verify_setvcp(true);
        assert!(verify_setvcp());
        set_verify_setvcp(false);
        assert!(!verify_setvcp());
    }
}
