use chrono::{Duration, NaiveDateTime};

use crate::storage::artifact::Artifact;
use crate::storage::transport::StorageTransport;
use crate::storage::{ObjectStore, StoreError};

/// Sweep summary: artifacts deleted vs. kept.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: usize,
    pub retained: usize,
}

/// Deletes artifacts whose key-encoded creation timestamp has fallen out of
/// the retention window.
///
/// Objects whose keys do not parse as artifacts are retained and logged:
/// the sweep fails safe toward retention, never toward data loss. A single
/// failed deletion is logged and the sweep continues.
pub struct RetentionPruner<'a, S> {
    transport: &'a StorageTransport<S>,
    prefix: &'a str,
    retention_days: i64,
}

impl<'a, S: ObjectStore> RetentionPruner<'a, S> {
    pub fn new(transport: &'a StorageTransport<S>, prefix: &'a str, retention_days: i64) -> Self {
        Self {
            transport,
            prefix,
            retention_days,
        }
    }

    pub fn prune(&self, now: NaiveDateTime) -> Result<PruneReport, StoreError> {
        let cutoff = now - Duration::days(self.retention_days);
        let objects = self.transport.list(self.prefix)?;

        let mut report = PruneReport::default();
        for object in objects {
            let artifact = match Artifact::from_key(self.prefix, &object.key, object.size) {
                Ok(artifact) => artifact,
                Err(foreign) => {
                    log::warn!(target: "cycle::retention", "retaining unrecognized object: {foreign}");
                    report.retained += 1;
                    continue;
                }
            };

            if artifact.created >= cutoff {
                report.retained += 1;
                continue;
            }

            match self.transport.delete(&artifact.key) {
                Ok(()) => {
                    log::info!(
                        target: "cycle::retention",
                        "deleted {} (created {})",
                        artifact.key,
                        artifact.created
                    );
                    report.deleted += 1;
                }
                Err(e) => {
                    log::warn!(
                        target: "cycle::retention",
                        "failed to delete {}, keeping it for the next sweep: {e}",
                        artifact.key
                    );
                    report.retained += 1;
                }
            }
        }

        log::info!(
            target: "cycle::retention",
            "retention sweep done: {} deleted, {} retained (cutoff {cutoff})",
            report.deleted,
            report.retained
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::NaiveDate;

    use crate::storage::memory::MemoryStore;
    use crate::util::retry::RetryPolicy;

    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 23)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn transport(store: MemoryStore) -> StorageTransport<MemoryStore> {
        StorageTransport::new(store, RetryPolicy::new(1, StdDuration::from_millis(1)))
    }

    #[test]
    fn deletes_expired_and_keeps_recent() {
        let store = MemoryStore::new();
        store.insert("db/backup_20260701_120000.sql.gz", b"old");
        store.insert("db/backup_20260822_120000.sql.gz", b"fresh");
        let transport = transport(store);
        let pruner = RetentionPruner::new(&transport, "db", 30);

        let report = pruner.prune(now()).unwrap();

        assert_eq!(report, PruneReport { deleted: 1, retained: 1 });
        assert_eq!(
            transport.list("db").unwrap().len(),
            1,
            "only the within-window artifact remains"
        );
    }

    #[test]
    fn boundary_artifact_exactly_at_cutoff_is_retained() {
        let store = MemoryStore::new();
        store.insert("db/backup_20260724_120000.sql.gz", b"at cutoff");
        let transport = transport(store);
        let pruner = RetentionPruner::new(&transport, "db", 30);

        let report = pruner.prune(now()).unwrap();

        assert_eq!(report, PruneReport { deleted: 0, retained: 1 });
    }

    #[test]
    fn unparsable_keys_are_retained() {
        let store = MemoryStore::new();
        store.insert("db/legacy-dump.tar", b"who knows");
        store.insert("db/backup_20250101_000000.sql.gz", b"ancient");
        let transport = transport(store);
        let pruner = RetentionPruner::new(&transport, "db", 7);

        let report = pruner.prune(now()).unwrap();

        assert_eq!(report, PruneReport { deleted: 1, retained: 1 });
        assert_eq!(transport.list("db").unwrap()[0].key, "db/legacy-dump.tar");
    }

    #[test]
    fn empty_store_is_a_noop() {
        let store = MemoryStore::new();
        let transport = transport(store);
        let pruner = RetentionPruner::new(&transport, "db", 7);

        let report = pruner.prune(now()).unwrap();

        assert_eq!(report, PruneReport::default());
    }

    #[test]
    fn one_failed_deletion_does_not_abort_the_sweep() {
        let store = MemoryStore::new();
        store.insert("db/backup_20250101_000000.sql.gz", b"stuck");
        store.insert("db/backup_20250102_000000.sql.gz", b"deletable");
        store.refuse_delete("db/backup_20250101_000000.sql.gz");
        let transport = transport(store);
        let pruner = RetentionPruner::new(&transport, "db", 7);

        let report = pruner.prune(now()).unwrap();

        assert_eq!(report, PruneReport { deleted: 1, retained: 1 });
    }

    #[test]
    fn encrypted_artifacts_are_pruned_too() {
        let store = MemoryStore::new();
        store.insert("db/backup_20250101_000000.sql.gz.enc", b"old sealed");
        let transport = transport(store);
        let pruner = RetentionPruner::new(&transport, "db", 7);

        let report = pruner.prune(now()).unwrap();

        assert_eq!(report, PruneReport { deleted: 1, retained: 0 });
    }
}
