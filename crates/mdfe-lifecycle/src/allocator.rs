//! # Number Allocation
//!
//! Sequential numbering per (issuer CNPJ, series) scope. Two manifests
//! must never receive the same number within a scope, under any
//! interleaving of concurrent requests. Gaps are acceptable: a number
//! consumed by an issuance that later fails is not reclaimed, because
//! reuse risks a duplicate-key rejection at the authority.

use dashmap::DashMap;
use mdfe_core::{Cnpj, DocNumber, Series};

use crate::LifecycleError;

/// Source of the next manifest number within an (issuer, series) scope.
///
/// Implementations must be atomic per scope: concurrent calls for the
/// same scope return distinct values. A backend that cannot currently
/// allocate reports [`LifecycleError::StorageUnavailable`] so the caller
/// can retry the whole issuance from scratch — nothing was consumed.
pub trait NumberAllocator: Send + Sync {
    /// Allocate the next number for the scope, consuming it permanently.
    fn allocate_next(&self, issuer: &Cnpj, series: Series) -> Result<DocNumber, LifecycleError>;
}

/// In-process allocator backed by a concurrent counter map. Suitable for
/// a single orchestration instance; multi-instance deployments need a
/// shared backend behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryNumberAllocator {
    counters: DashMap<(Cnpj, Series), u32>,
}

impl InMemoryNumberAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a scope with its last consumed number, e.g. when resuming
    /// from an external record of issued manifests.
    pub fn seed(&self, issuer: Cnpj, series: Series, last_used: u32) {
        self.counters.insert((issuer, series), last_used);
    }
}

impl NumberAllocator for InMemoryNumberAllocator {
    fn allocate_next(&self, issuer: &Cnpj, series: Series) -> Result<DocNumber, LifecycleError> {
        // The entry guard holds the shard lock across the increment, so
        // concurrent allocations in one scope serialize here.
        let mut entry = self
            .counters
            .entry((issuer.clone(), series))
            .or_insert(0);
        *entry += 1;
        let value = *entry;
        drop(entry);
        Ok(DocNumber::new(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn cnpj() -> Cnpj {
        Cnpj::new("11222333000181").expect("cnpj")
    }

    #[test]
    fn allocates_sequentially_from_one() {
        let alloc = InMemoryNumberAllocator::new();
        let series = Series::new(1).expect("series");
        for expected in 1..=5u32 {
            let n = alloc.allocate_next(&cnpj(), series).expect("allocate");
            assert_eq!(n.value(), expected);
        }
    }

    #[test]
    fn scopes_are_independent() {
        let alloc = InMemoryNumberAllocator::new();
        let s1 = Series::new(1).expect("series");
        let s2 = Series::new(2).expect("series");
        assert_eq!(alloc.allocate_next(&cnpj(), s1).unwrap().value(), 1);
        assert_eq!(alloc.allocate_next(&cnpj(), s1).unwrap().value(), 2);
        // A different series starts its own sequence.
        assert_eq!(alloc.allocate_next(&cnpj(), s2).unwrap().value(), 1);
        // A different issuer too.
        let other = Cnpj::new("11444777000161").expect("cnpj");
        assert_eq!(alloc.allocate_next(&other, s1).unwrap().value(), 1);
    }

    #[test]
    fn seed_resumes_after_last_used() {
        let alloc = InMemoryNumberAllocator::new();
        let series = Series::new(1).expect("series");
        alloc.seed(cnpj(), series, 41);
        assert_eq!(alloc.allocate_next(&cnpj(), series).unwrap().value(), 42);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let alloc = Arc::new(InMemoryNumberAllocator::new());
        let series = Series::new(1).expect("series");
        let threads = 16;
        let per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| {
                            alloc
                                .allocate_next(&cnpj(), series)
                                .expect("allocate")
                                .value()
                        })
                        .collect::<Vec<u32>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for n in handle.join().expect("thread") {
                assert!(seen.insert(n), "number {n} allocated twice");
            }
        }
        assert_eq!(seen.len(), threads * per_thread);
        assert_eq!(*seen.iter().max().unwrap(), (threads * per_thread) as u32);
    }

    proptest! {
        // Any interleaving of allocations across scopes stays unique
        // within each scope and dense from 1.
        #[test]
        fn allocation_is_unique_per_scope(series_picks in proptest::collection::vec(1u16..=4, 1..80)) {
            let alloc = InMemoryNumberAllocator::new();
            let mut seen: HashSet<(u16, u32)> = HashSet::new();
            let mut counts: std::collections::HashMap<u16, u32> = Default::default();
            for s in series_picks {
                let series = Series::new(s).expect("series");
                let n = alloc.allocate_next(&cnpj(), series).expect("allocate").value();
                prop_assert!(seen.insert((s, n)), "duplicate {n} in series {s}");
                let count = counts.entry(s).or_insert(0);
                *count += 1;
                prop_assert_eq!(n, *count);
            }
        }
    }
}
