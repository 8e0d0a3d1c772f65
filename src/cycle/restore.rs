use std::fs::{self, File};
use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use flate2::read::GzDecoder;

use crate::config::{Configuration, Verification};
use crate::notify::{CycleReport, Notifier};
use crate::postgres::{DbAdmin, Restorer};
use crate::storage::artifact::Artifact;
use crate::storage::transport::StorageTransport;
use crate::storage::ObjectStore;

use super::cipher::OpensslCipher;
use super::pipeline::LocalFile;

/// One restore drill: select, download, provision, restore, verify, teardown,
/// report.
///
/// Teardown is unconditional. Whatever earlier stage failed, the ephemeral
/// database is dropped and local files are removed before the cycle returns;
/// a drill must never leak either.
pub struct RestoreCycle<'a, R, A, S> {
    cfg: &'a Configuration,
    verification: &'a Verification,
    restorer: &'a R,
    admin: &'a A,
    transport: &'a StorageTransport<S>,
    cipher: Option<&'a OpensslCipher>,
    notifier: &'a Notifier,
}

/// How far the drill got before reporting.
enum DrillOutcome {
    /// Restore ran; counts of failed and total verification checks.
    Verified { failed: u32, total: u32 },
    /// Restore itself failed after a successful provision.
    RestoreFailed(String),
    /// Download or provisioning failed before restore could even attempt.
    Aborted(String),
}

impl<'a, R, A, S> RestoreCycle<'a, R, A, S>
where
    R: Restorer,
    A: DbAdmin,
    S: ObjectStore,
{
    pub fn new(
        cfg: &'a Configuration,
        verification: &'a Verification,
        restorer: &'a R,
        admin: &'a A,
        transport: &'a StorageTransport<S>,
        cipher: Option<&'a OpensslCipher>,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            cfg,
            verification,
            restorer,
            admin,
            transport,
            cipher,
            notifier,
        }
    }

    pub fn run(&self) -> CycleReport {
        let started = Instant::now();
        log::info!(
            target: "cycle::restore",
            "starting restore drill against {}",
            self.verification.target
        );

        let report = self.drill(Utc::now().naive_utc());
        self.notifier.emit(&report, started.elapsed());
        report
    }

    fn drill(&self, now: NaiveDateTime) -> CycleReport {
        let artifact = match self.select_artifact() {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return CycleReport::error("no artifact available to verify", None),
            Err(e) => return CycleReport::error(format!("artifact selection failed: {e}"), None),
        };
        log::info!(
            target: "cycle::restore",
            "verifying {} (created {})",
            artifact.key,
            artifact.created
        );

        let db_name = format!("verify_{}", now.format("%Y%m%d_%H%M%S"));
        let outcome = self.download_restore_verify(&artifact, &db_name);

        // Teardown runs whatever happened above. Local files are dropped
        // inside download_restore_verify; the ephemeral database goes here.
        if let Err(e) = self
            .admin
            .drop_database(&self.verification.target, &db_name)
        {
            log::warn!(target: "cycle::restore", "dropping {db_name} failed: {e}");
        }

        let key = artifact.key.clone();
        match outcome {
            DrillOutcome::Verified { failed: 0, total } => CycleReport::success(
                format!("restore drill passed all {total} check(s) for {key}"),
                Some(key),
            ),
            DrillOutcome::Verified { failed, total } => CycleReport::failure(
                format!("restore drill failed {failed} of {total} check(s) for {key}"),
                Some(key),
            ),
            DrillOutcome::RestoreFailed(reason) => {
                CycleReport::failure(format!("restore of {key} failed: {reason}"), Some(key))
            }
            DrillOutcome::Aborted(reason) => CycleReport::error(reason, Some(key)),
        }
    }

    /// Newest artifact under the prefix; unparsable keys are skipped.
    fn select_artifact(&self) -> Result<Option<Artifact>, crate::storage::StoreError> {
        let objects = self.transport.list(&self.cfg.storage.prefix)?;

        Ok(objects
            .into_iter()
            .filter_map(|object| {
                Artifact::from_key(&self.cfg.storage.prefix, &object.key, object.size).ok()
            })
            .max_by_key(|artifact| artifact.created))
    }

    fn download_restore_verify(&self, artifact: &Artifact, db_name: &str) -> DrillOutcome {
        let download = match self.download(artifact, db_name) {
            Ok(download) => download,
            Err(reason) => return DrillOutcome::Aborted(reason),
        };

        if let Err(reason) = self.provision(db_name) {
            return DrillOutcome::Aborted(reason);
        }

        let ephemeral = self.verification.target.with_database(db_name);
        if let Err(e) = self.restore_into(&ephemeral, &download) {
            // captured, not propagated: teardown must still run
            return DrillOutcome::RestoreFailed(e);
        }

        let (failed, total) = self.verify(&ephemeral);
        DrillOutcome::Verified { failed, total }
    }

    /// Downloads the artifact and, when encrypted, decrypts it. Both working
    /// files are removed on drop.
    fn download(&self, artifact: &Artifact, db_name: &str) -> Result<LocalFile, String> {
        if let Err(e) = fs::create_dir_all(&self.cfg.work_dir) {
            return Err(format!("creating work dir failed: {e}"));
        }

        let plain = LocalFile::new(self.cfg.work_dir.join(format!("{db_name}.sql.gz")));

        if !artifact.encrypted {
            let size = self
                .transport
                .get(&artifact.key, plain.path())
                .map_err(|e| format!("download of {} failed: {e}", artifact.key))?;
            log::debug!(target: "cycle::restore", "downloaded {size} bytes");
            return Ok(plain);
        }

        let sealed = LocalFile::new(self.cfg.work_dir.join(format!("{db_name}.sql.gz.enc")));
        self.transport
            .get(&artifact.key, sealed.path())
            .map_err(|e| format!("download of {} failed: {e}", artifact.key))?;

        let cipher = self
            .cipher
            .ok_or_else(|| format!("{} is encrypted but no encryption key is configured", artifact.key))?;
        cipher
            .decrypt(sealed.path(), plain.path())
            .map_err(|e| format!("decryption of {} failed: {e}", artifact.key))?;

        Ok(plain)
    }

    fn provision(&self, db_name: &str) -> Result<(), String> {
        let server = &self.verification.target;

        match self.admin.database_exists(server, db_name) {
            Ok(true) => {
                // should not happen under correct scheduling
                log::warn!(target: "cycle::restore", "{db_name} already exists, dropping first");
                self.admin
                    .drop_database(server, db_name)
                    .map_err(|e| format!("dropping stale {db_name} failed: {e}"))?;
            }
            Ok(false) => {}
            Err(e) => return Err(format!("checking for {db_name} failed: {e}")),
        }

        self.admin
            .create_database(server, db_name)
            .map_err(|e| format!("provisioning {db_name} failed: {e}"))
    }

    fn restore_into(
        &self,
        ephemeral: &crate::config::target::ConnectionTarget,
        download: &LocalFile,
    ) -> Result<(), String> {
        let file = File::open(download.path()).map_err(|e| format!("opening download: {e}"))?;
        let mut decoder = GzDecoder::new(file);

        self.restorer
            .restore(ephemeral, &mut decoder)
            .map_err(|e| e.to_string())
    }

    /// Runs the verification battery, returning `(failed, total)` counts.
    fn verify(&self, ephemeral: &crate::config::target::ConnectionTarget) -> (u32, u32) {
        let mut failed = 0;
        let mut total = 0;
        let mut check = |name: &str, passed: Result<(), String>| {
            total += 1;
            match passed {
                Ok(()) => log::info!(target: "cycle::restore", "check `{name}` passed"),
                Err(e) => {
                    log::warn!(target: "cycle::restore", "check `{name}` failed: {e}");
                    failed += 1;
                }
            }
        };

        check(
            "liveness",
            self.admin.ping(ephemeral).map_err(|e| e.to_string()),
        );

        check("table count", self.check_table_count(ephemeral));

        if let Some(statement) = &self.verification.check_statement {
            check(
                "custom statement",
                self.admin
                    .query_scalar(ephemeral, statement)
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
            );
        }

        if let Some(script) = &self.verification.check_script {
            match fs::read_to_string(script) {
                Ok(sql) => {
                    for (index, statement) in split_statements(&sql).enumerate() {
                        check(
                            &format!("script statement {}", index + 1),
                            self.admin
                                .query_scalar(ephemeral, statement)
                                .map(|_| ())
                                .map_err(|e| e.to_string()),
                        );
                    }
                }
                Err(e) => check(
                    "check script",
                    Err(format!("reading {} failed: {e}", script.display())),
                ),
            }
        }

        (failed, total)
    }

    fn check_table_count(
        &self,
        ephemeral: &crate::config::target::ConnectionTarget,
    ) -> Result<(), String> {
        const TABLE_COUNT_SQL: &str = "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema NOT IN ('pg_catalog', 'information_schema')";

        let raw = self
            .admin
            .query_scalar(ephemeral, TABLE_COUNT_SQL)
            .map_err(|e| e.to_string())?;
        let count: u64 = raw
            .trim()
            .parse()
            .map_err(|_| format!("unexpected table count answer: {raw:?}"))?;

        if count < self.verification.min_table_count {
            return Err(format!(
                "restored database has {count} table(s), expected at least {}",
                self.verification.min_table_count
            ));
        }
        Ok(())
    }
}

/// Splits a SQL script into statements on semicolons, dropping blanks.
fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}
