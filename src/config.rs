// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::page::BLOCK_SIZE;

/// Tree configuration builder
#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound on a single datum's packed size.
    ///
    /// Larger values must be sliced or toasted by the host engine
    /// before they reach the tree.
    pub max_datum_size: usize,

    /// Split point for internal pages when the insertion point is the
    /// right edge. Append workloads are TID-monotone, so a right-heavy
    /// split leaves nearly-full pages behind.
    pub split_ratio: f32,

    /// Rough per-array payload budget when coalescing an insert batch
    /// into array items.
    ///
    /// This is a heuristic bound on write amplification: replacing one
    /// element of an array rewrites the whole array, so arrays are kept
    /// to a fraction of the maximum datum size.
    pub coalesce_quota: usize,
}

impl Default for Config {
    fn default() -> Self {
        let max_datum_size = BLOCK_SIZE / 4;

        Self {
            max_datum_size,
            split_ratio: 0.9,
            coalesce_quota: max_datum_size / 4,
        }
    }
}

impl Config {
    /// Sets the maximum packed size of a single datum.
    ///
    /// Also lowers the array coalescing quota to a quarter of it.
    ///
    /// # Panics
    ///
    /// Panics if the size does not leave room on a page.
    #[must_use]
    pub fn max_datum_size(mut self, bytes: usize) -> Self {
        assert!(bytes <= BLOCK_SIZE / 4, "max_datum_size too large for block size");
        self.max_datum_size = bytes;
        self.coalesce_quota = bytes / 4;
        self
    }

    /// Sets the right-edge split ratio of internal pages.
    ///
    /// Interior insertions always split 50/50.
    ///
    /// # Panics
    ///
    /// Panics if the ratio is not within (0, 1).
    #[must_use]
    pub fn split_ratio(mut self, ratio: f32) -> Self {
        assert!(ratio > 0.0 && ratio < 1.0, "split ratio must be within (0, 1)");
        self.split_ratio = ratio;
        self
    }
}
