//! Library to produce database backups and prove them restorable.
//!
//! Backups are full logical snapshots, compressed and optionally encrypted,
//! uploaded to an object store and pruned after a retention window. Restore
//! drills periodically download the newest artifact, replay it into an
//! ephemeral database and run a verification battery against it, without ever
//! touching the production database. The orchestration lives in [`cycle`],
//! the scheduling in [`sched`].

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod cycle;
pub mod notify;
pub mod postgres;
pub mod sched;
pub mod storage;
pub mod util;
