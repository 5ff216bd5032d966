//! Smallest-available allocation of session indices.

use std::collections::BTreeSet;

#[derive(Debug, Default, Clone)]
pub struct IndexPool {
    in_use: BTreeSet<u32>,
}

impl IndexPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the smallest positive integer not currently in use.
    pub fn allocate(&mut self) -> u32 {
        let mut candidate = 1;
        for &used in &self.in_use {
            if used != candidate {
                break;
            }
            candidate += 1;
        }
        self.in_use.insert(candidate);
        candidate
    }

    /// Returns false if `index` was not allocated.
    pub fn release(&mut self, index: u32) -> bool {
        self.in_use.remove(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.in_use.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_use.clear();
    }
}
