//! The two orchestrated cycles and their building blocks.
//!
//! - [`backup::BackupCycle`]: probe, dump-compress-encrypt, upload, prune, notify.
//! - [`restore::RestoreCycle`]: select, download, provision, restore, verify,
//!   teardown, report.
//! - [`retention::RetentionPruner`]: deletes artifacts older than the window.

pub mod backup;
pub mod cipher;
pub mod pipeline;
pub mod restore;
pub mod retention;
