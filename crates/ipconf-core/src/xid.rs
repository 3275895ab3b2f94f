//! Transaction id allocation.
//!
//! Every active session holds one id at a time. The pool remembers which ids
//! are in use so that two sessions never share one, even across a downgrade
//! or NAK restart that swaps an id mid-negotiation.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;

/// Allocator of unique, non-zero transaction ids
#[derive(Debug)]
pub struct XidPool {
    rng: StdRng,
    active: HashSet<u32>,
}

impl XidPool {
    /// Pool seeded from the operating system
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic pool for tests and simulation
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            active: HashSet::new(),
        }
    }

    /// Draw an id distinct from every active one
    pub fn allocate(&mut self) -> u32 {
        loop {
            let xid = self.rng.next_u32();
            if xid != 0 && self.active.insert(xid) {
                return xid;
            }
        }
    }

    /// Return an id to the pool. Unknown ids are ignored.
    pub fn release(&mut self, xid: u32) {
        self.active.remove(&xid);
    }

    /// Whether `xid` is currently held by a session
    #[must_use]
    pub fn is_active(&self, xid: u32) -> bool {
        self.active.contains(&xid)
    }

    /// Number of ids in use
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Default for XidPool {
    fn default() -> Self {
        Self::new()
    }
}
