use std::time::Instant;

use chrono::Utc;

use crate::config::Configuration;
use crate::notify::{CycleReport, Notifier};
use crate::postgres::{DbAdmin, Dumper};
use crate::storage::artifact::Artifact;
use crate::storage::transport::StorageTransport;
use crate::storage::ObjectStore;

use super::cipher::OpensslCipher;
use super::pipeline::ArtifactPipeline;
use super::retention::RetentionPruner;

/// One backup iteration: probe, produce, upload, prune, notify.
///
/// Every stage aborts only its own iteration; the process and the next
/// scheduled cycle are untouched. Retention-pruning failure is a warning and
/// never fails the cycle.
pub struct BackupCycle<'a, D, A, S> {
    cfg: &'a Configuration,
    dumper: &'a D,
    admin: &'a A,
    transport: &'a StorageTransport<S>,
    cipher: Option<&'a OpensslCipher>,
    notifier: &'a Notifier,
    dry_run: bool,
}

impl<'a, D, A, S> BackupCycle<'a, D, A, S>
where
    D: Dumper,
    A: DbAdmin,
    S: ObjectStore,
{
    pub fn new(
        cfg: &'a Configuration,
        dumper: &'a D,
        admin: &'a A,
        transport: &'a StorageTransport<S>,
        cipher: Option<&'a OpensslCipher>,
        notifier: &'a Notifier,
        dry_run: bool,
    ) -> Self {
        Self {
            cfg,
            dumper,
            admin,
            transport,
            cipher,
            notifier,
            dry_run,
        }
    }

    pub fn run(&self) -> CycleReport {
        let started = Instant::now();
        log::info!(target: "cycle::backup", "starting backup cycle for {}", self.cfg.production);

        let report = self.iteration();
        self.notifier.emit(&report, started.elapsed());
        report
    }

    fn iteration(&self) -> CycleReport {
        if let Err(e) = self.admin.ping(&self.cfg.production) {
            return CycleReport::error(format!("production database unreachable: {e}"), None);
        }
        if let Err(e) = self.transport.probe(&self.cfg.storage.prefix) {
            return CycleReport::error(format!("storage unreachable: {e}"), None);
        }

        let pipeline = ArtifactPipeline::new(
            self.dumper,
            &self.cfg.production,
            self.cfg.compression_level,
            self.cipher,
            &self.cfg.work_dir,
        );
        let artifact = match pipeline.produce(Utc::now().naive_utc()) {
            Ok(artifact) => artifact,
            Err(e) => return CycleReport::failure(format!("artifact production failed: {e}"), None),
        };

        if self.dry_run {
            log::info!(
                target: "cycle::backup",
                "dry run, discarding {} byte artifact instead of uploading",
                artifact.size
            );
            return CycleReport::success("dry run completed", None);
        }

        let key = Artifact::key_for(
            &self.cfg.storage.prefix,
            artifact.created,
            artifact.encrypted,
        );
        let metadata = [
            ("created".to_string(), artifact.created.to_string()),
            ("source-host".to_string(), self.cfg.host.clone()),
            ("database".to_string(), self.cfg.production.database.clone()),
            ("size-bytes".to_string(), artifact.size.to_string()),
        ];

        if let Err(e) = self.transport.put(&key, artifact.file.path(), &metadata) {
            return CycleReport::failure(format!("upload of {key} failed: {e}"), Some(key));
        }
        log::info!(target: "cycle::backup", "uploaded {key} ({} bytes)", artifact.size);
        // artifact drops below, removing the local temp file

        let pruner =
            RetentionPruner::new(self.transport, &self.cfg.storage.prefix, self.cfg.retention_days);
        match pruner.prune(Utc::now().naive_utc()) {
            Ok(report) => log::debug!(
                target: "cycle::backup",
                "pruned {} expired artifact(s)",
                report.deleted
            ),
            Err(e) => {
                log::warn!(target: "cycle::backup", "retention pruning failed, continuing: {e}")
            }
        }

        CycleReport::success(
            format!("backup uploaded ({} bytes)", artifact.size),
            Some(key),
        )
    }
}
