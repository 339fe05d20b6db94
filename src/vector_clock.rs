//! Vector clocks keyed by peer identity (the peer's address as a string).
//!
//! `a ≤ b` iff every counter of `a` is at most the matching counter of `b`,
//! missing entries reading as zero. Two timestamps where neither is `≤` the
//! other are concurrent. [`VectorTimestamp::display_less`] turns this into a
//! deterministic comparison good enough for ordering log output; it is not a
//! total order and must not drive delivery decisions.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Before,
    After,
    Equal,
    Concurrent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorTimestamp {
    /// BTreeMap keeps iteration and JSON output deterministic.
    pub counters: BTreeMap<String, u64>,
}

impl VectorTimestamp {
    pub fn new(counters: BTreeMap<String, u64>) -> Self {
        VectorTimestamp { counters }
    }

    /// Counter for `peer`, zero when absent.
    pub fn get(&self, peer: &str) -> u64 {
        self.counters.get(peer).copied().unwrap_or(0)
    }

    /// Component-wise maximum over the union of both key sets.
    #[cfg(test)]
    #[must_use]
    pub fn merge(&self, other: &VectorTimestamp) -> VectorTimestamp {
        let mut merged = self.clone();
        merged.merge_in(other);
        merged
    }

    pub fn merge_in(&mut self, other: &VectorTimestamp) {
        for (peer, &value) in &other.counters {
            let entry = self.counters.entry(peer.clone()).or_insert(0);
            if value > *entry {
                *entry = value;
            }
        }
    }

    /// `true` when no component of `self` exceeds the one in `other`.
    pub fn dominated_by(&self, other: &VectorTimestamp) -> bool {
        self.counters.iter().all(|(peer, &v)| v <= other.get(peer))
    }

    pub fn causal_order(&self, other: &VectorTimestamp) -> CausalOrder {
        let peers: BTreeSet<&String> = self.counters.keys().chain(other.counters.keys()).collect();

        let mut self_le = true;
        let mut other_le = true;
        for peer in peers {
            let (a, b) = (self.get(peer), other.get(peer));
            if a > b {
                self_le = false;
            }
            if b > a {
                other_le = false;
            }
        }

        match (self_le, other_le) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (false, false) => CausalOrder::Concurrent,
        }
    }

    /// Display ordering: `self` sorts first when it is dominated by `other`
    /// and the two differ. Concurrent pairs are never "less" either way.
    pub fn display_less(&self, other: &VectorTimestamp) -> bool {
        self.dominated_by(other) && self.causal_order(other) != CausalOrder::Equal
    }
}

impl std::fmt::Display for VectorTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (peer, value)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", peer, value)?;
        }
        write!(f, "}}")
    }
}

/// The node's own vector clock. Counters only ever grow.
#[derive(Debug)]
pub struct VectorClock {
    local: String,
    counters: RwLock<VectorTimestamp>,
}

impl VectorClock {
    /// Every known peer, `local` included, starts at zero.
    pub fn new<I, S>(local: &str, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut counters: BTreeMap<String, u64> =
            peers.into_iter().map(|p| (p.into(), 0)).collect();
        counters.entry(local.to_string()).or_insert(0);
        VectorClock {
            local: local.to_string(),
            counters: RwLock::new(VectorTimestamp::new(counters)),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn now(&self) -> VectorTimestamp {
        self.counters.read().clone()
    }

    /// Records a local event and returns the new reading.
    pub fn advance_local(&self) -> VectorTimestamp {
        let mut counters = self.counters.write();
        *counters.counters.entry(self.local.clone()).or_insert(0) += 1;
        counters.clone()
    }

    /// Folds a received timestamp into the clock and returns the new reading.
    pub fn merge(&self, other: &VectorTimestamp) -> VectorTimestamp {
        let mut counters = self.counters.write();
        counters.merge_in(other);
        counters.clone()
    }
}
