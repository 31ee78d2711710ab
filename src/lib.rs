// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A TID-ordered B+ tree for column-oriented storage engines.
//!
//! ##### NOTE
//!
//! > This crate only provides the per-attribute tree core of a column
//! > store, not a full storage engine. It has no transaction manager,
//! > no WAL and no buffer eviction; those are the host engine's job.
//!
//! ##### About
//!
//! A column-oriented table keeps each attribute (column) in its own
//! B+ tree, keyed by a 48-bit logical tuple identifier ([`Tid`]).
//! This crate implements one such tree: leaf pages hold variable-length
//! items that cover either a single TID, a packed run of consecutive
//! TIDs (an array item), or an LZ4-compressed batch of items sharing
//! one outer header. Sibling pages are chained with Lehman–Yao style
//! right-links, so readers tolerate concurrent page splits without
//! lock coupling, and every write is stamped with a pointer into an
//! undo log to support MVCC snapshots.
//!
//! Trees of the same table share a [`Store`]: a block pool, a metapage
//! directory mapping attribute numbers to root blocks, and the undo
//! log. Tying the per-attribute scans back together into rows is the
//! caller's responsibility.
//!
//! # Example usage
//!
//! ```
//! use tid_tree::{AttrLen, AttrSpec, Config, Snapshot, Store};
//!
//! let store = Store::new(Config::default());
//! let tree = store.tree(1, AttrSpec::new(AttrLen::Fixed(8), true))?;
//!
//! // Bulk-insert three values; TIDs are assigned from the right edge
//! let tids = tree.insert(
//!     &[
//!         Some(10u64.to_le_bytes().as_slice().into()),
//!         Some(11u64.to_le_bytes().as_slice().into()),
//!         Some(12u64.to_le_bytes().as_slice().into()),
//!     ],
//!     /* xid */ 1,
//!     /* cid */ 0,
//! )?;
//! assert_eq!(3, tids.len());
//!
//! // Scan in TID order under a snapshot
//! let snapshot = Snapshot::new(2, 1);
//! for row in tree.scan(tids[0], snapshot)? {
//!     let (_tid, _value) = row?;
//!     // ...
//! }
//! #
//! # Ok::<(), tid_tree::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        }
    };
}

mod attr;

#[doc(hidden)]
pub mod buffer;

mod checksum;
mod coding;

#[doc(hidden)]
pub mod compress;

mod config;
mod datum;
mod error;

#[doc(hidden)]
pub mod item;

#[doc(hidden)]
pub mod page;

mod meta;
mod slice;
mod store;
mod tid;
mod tree;

pub mod undo;
mod visibility;

#[doc(hidden)]
pub use {
    buffer::{BlockId, BufferPool},
    coding::{Decode, Encode},
    item::{Item, ItemFlags},
    page::PageBuf,
};

pub use {
    attr::{AttrLen, AttrNo, AttrSpec},
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
    config::Config,
    error::{Error, Result},
    slice::Slice,
    store::Store,
    tid::Tid,
    tree::{scan::Scan, Tree},
    undo::{LockMode, UndoLog, UndoPtr},
    visibility::{CmdId, Snapshot, TxId, UpdateResult},
};

/// A single column value: `None` is SQL NULL, `Some` holds the raw bytes.
pub type Datum = Option<Slice>;
