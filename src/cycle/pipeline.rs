use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use derive_more::{Display, Error, From};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::target::ConnectionTarget;
use crate::postgres::{Dumper, PgError};

use super::cipher::{CipherError, OpensslCipher};

/// A working file that is removed when dropped.
///
/// Every temp file the cycles create lives behind one of these, so no exit
/// path can leave dump or download files behind.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    target: "cycle::pipeline",
                    "leaving temp file {} behind: {e}",
                    self.path.display()
                );
            }
        }
    }
}

#[derive(Debug, Display, Error, From)]
pub enum PipelineError {
    /// The dump tool failed; nothing was produced.
    #[display("dump failed: {_0}")]
    Dump(PgError),

    /// The dump ran but produced zero bytes. Never uploaded.
    #[display("dump produced an empty artifact")]
    EmptyArtifact,

    /// Encryption failed after a successful dump.
    #[display("encryption failed: {_0}")]
    Encrypt(CipherError),

    #[from]
    Io(io::Error),
}

/// A finished local artifact, ready for upload.
#[derive(Debug)]
pub struct ProducedArtifact {
    pub file: LocalFile,
    pub size: u64,
    pub encrypted: bool,
    pub created: NaiveDateTime,
}

/// Streams a full logical dump through the gzip encoder and, when enabled,
/// through the symmetric cipher.
pub struct ArtifactPipeline<'a, D> {
    dumper: &'a D,
    target: &'a ConnectionTarget,
    compression_level: u32,
    cipher: Option<&'a OpensslCipher>,
    work_dir: &'a Path,
}

impl<'a, D: Dumper> ArtifactPipeline<'a, D> {
    pub fn new(
        dumper: &'a D,
        target: &'a ConnectionTarget,
        compression_level: u32,
        cipher: Option<&'a OpensslCipher>,
        work_dir: &'a Path,
    ) -> Self {
        Self {
            dumper,
            target,
            compression_level,
            cipher,
            work_dir,
        }
    }

    pub fn produce(&self, created: NaiveDateTime) -> Result<ProducedArtifact, PipelineError> {
        fs::create_dir_all(self.work_dir)?;

        let stem = created.format("%Y%m%d_%H%M%S");
        let plain = LocalFile::new(self.work_dir.join(format!("backup_{stem}.sql.gz")));
        log::debug!(
            target: "cycle::pipeline",
            "dumping {} into {}",
            self.target,
            plain.path().display()
        );

        let sink = File::create(plain.path())?;
        let mut encoder = GzEncoder::new(sink, Compression::new(self.compression_level));
        let dumped = self
            .dumper
            .dump(self.target, &mut encoder)
            .map_err(PipelineError::Dump)?;
        encoder.finish()?;

        // A zero-byte dump is a failed backup, not an empty one.
        if dumped == 0 {
            return Err(PipelineError::EmptyArtifact);
        }

        let (file, encrypted) = match self.cipher {
            None => (plain, false),
            Some(cipher) => {
                let sealed =
                    LocalFile::new(self.work_dir.join(format!("backup_{stem}.sql.gz.enc")));
                cipher
                    .encrypt(plain.path(), sealed.path())
                    .map_err(PipelineError::Encrypt)?;
                // plain drops here, removing the unencrypted copy
                (sealed, true)
            }
        };

        let size = fs::metadata(file.path())?.len();
        log::info!(
            target: "cycle::pipeline",
            "produced artifact {} ({size} bytes, encrypted: {encrypted})",
            file.path().display()
        );

        Ok(ProducedArtifact {
            file,
            size,
            encrypted,
            created,
        })
    }
}
