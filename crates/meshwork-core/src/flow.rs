//! Credit-based flow control
//!
//! Each link direction owns one [`Credit`] cell. The producer signals that
//! it has data with `feed`; the consumer grants exactly one credit with
//! `pull`; the producer must `take` that credit to push one envelope, or
//! give it back with `skip` when it turns out to have nothing to send.
//! Without an outstanding credit `take` fails, so a producer can never
//! push more envelopes than the consumer has pulled.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

const FED: u8 = 0b01;
const PULLED: u8 = 0b10;

/// Flow-control state of one link direction
#[derive(Debug, Default)]
pub struct Credit {
    bits: AtomicU8,
}

impl Credit {
    pub const fn new() -> Self {
        Credit {
            bits: AtomicU8::new(0),
        }
    }

    /// Signal pending data; returns true if the consumer should be notified
    pub fn feed(&self) -> bool {
        self.bits.fetch_or(FED, Ordering::AcqRel) & FED == 0
    }

    /// Grant one credit; returns false if a credit was already outstanding
    pub fn pull(&self) -> bool {
        self.bits.fetch_or(PULLED, Ordering::AcqRel) & PULLED == 0
    }

    /// Consume the outstanding credit to authorize one push
    pub fn take(&self) -> bool {
        self.bits.fetch_and(!(PULLED | FED), Ordering::AcqRel) & PULLED != 0
    }

    /// Return the outstanding credit unused
    pub fn skip(&self) -> bool {
        self.take()
    }

    #[inline]
    pub fn is_fed(&self) -> bool {
        self.bits.load(Ordering::Acquire) & FED != 0
    }

    #[inline]
    pub fn is_pulled(&self) -> bool {
        self.bits.load(Ordering::Acquire) & PULLED != 0
    }
}

/// Counters mirrored for a link
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub pushed_down: u64,
    pub skipped_down: u64,
    pub pushed_up: u64,
    pub rejected: u64,
}

/// Down and up credit cells for one link, with counters
#[derive(Debug, Default)]
pub struct LinkFlow {
    pub down: Credit,
    pub up: Credit,
    pushed_down: AtomicU64,
    skipped_down: AtomicU64,
    pushed_up: AtomicU64,
    rejected: AtomicU64,
}

impl LinkFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize one downward push, counting it
    pub fn take_down(&self) -> bool {
        let granted = self.down.take();
        if granted {
            self.pushed_down.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        granted
    }

    pub fn skip_down(&self) -> bool {
        let skipped = self.down.skip();
        if skipped {
            self.skipped_down.fetch_add(1, Ordering::Relaxed);
        }
        skipped
    }

    /// Authorize one upward push, counting it
    pub fn take_up(&self) -> bool {
        let granted = self.up.take();
        if granted {
            self.pushed_up.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        granted
    }

    pub fn stats(&self) -> FlowStats {
        FlowStats {
            pushed_down: self.pushed_down.load(Ordering::Relaxed),
            skipped_down: self.skipped_down.load(Ordering::Relaxed),
            pushed_up: self.pushed_up.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_requires_pull() {
        let credit = Credit::new();
        assert!(credit.feed());
        assert!(!credit.take());
        assert!(credit.pull());
        assert!(credit.take());
        assert!(!credit.take());
    }

    #[test]
    fn test_duplicate_signals_coalesce() {
        let credit = Credit::new();
        assert!(credit.feed());
        assert!(!credit.feed());
        assert!(credit.pull());
        assert!(!credit.pull());
        assert!(credit.skip());
        assert!(!credit.is_pulled());
        assert!(!credit.is_fed());
    }

    #[test]
    fn test_link_flow_counts() {
        let flow = LinkFlow::new();
        flow.down.pull();
        assert!(flow.take_down());
        assert!(!flow.take_down());
        flow.down.pull();
        assert!(flow.skip_down());
        let stats = flow.stats();
        assert_eq!(stats.pushed_down, 1);
        assert_eq!(stats.skipped_down, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Feed,
        Pull,
        Push,
        Skip,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Feed), Just(Op::Pull), Just(Op::Push), Just(Op::Skip)]
    }

    proptest! {
        #[test]
        fn prop_pushes_never_exceed_pulls(ops in proptest::collection::vec(op(), 0..200)) {
            let credit = Credit::new();
            let mut pulls = 0u64;
            let mut consumed = 0u64;
            for op in ops {
                match op {
                    Op::Feed => { credit.feed(); }
                    Op::Pull => if credit.pull() { pulls += 1 },
                    Op::Push => if credit.take() { consumed += 1 },
                    Op::Skip => if credit.skip() { consumed += 1 },
                }
                prop_assert!(consumed <= pulls);
                prop_assert!(pulls - consumed <= 1);
            }
        }
    }
}
