//! Inspection and export of SQL database backups.
//!
//! A backup is a directory holding a JSON manifest and a set of sorted,
//! versioned data files. Full backups are extended by incremental backups,
//! and together they form a chain covering a contiguous time range. This
//! crate provides:
//!
//! - Storage access for local backup locations (`storage` module).
//! - Manifest reading and the human-readable summary (`manifest` module).
//! - Chain discovery across both incremental layouts and contiguity checks
//!   (`chain` module).
//! - Descriptor catalog, name resolution and table lookup (`catalog`).
//! - Locating a table's files as of a point in time (`entry`).
//! - A k-way merge over data files and time-bounded row fetching (`merge`,
//!   `fetch`), decoding rows with the table schema (`rowenc`).
//! - CSV export with a global row cap (`export`).
//!
//! The command line front end lives in a separate crate and only depends on
//! the public API exposed here.
#![deny(missing_docs)]
pub mod catalog;
pub mod chain;
pub mod entry;
pub mod error;
pub mod export;
pub mod fetch;
pub mod hlc;
pub mod keys;
pub mod manifest;
pub mod merge;
pub mod mvcc;
pub mod rowenc;
pub mod sst;
pub mod storage;
