//! PostgreSQL tooling behind injectable seams.
//!
//! Orchestration code talks to [`Dumper`], [`Restorer`] and [`DbAdmin`];
//! the production implementation [`PgTools`] shells out to `pg_dump`, `psql`
//! and `pg_isready`, passing credentials through the child-process
//! environment only. Exit status is the sole success signal, stderr is
//! relayed to the log.

use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;

use derive_more::{Display, Error, From};

use crate::config::target::ConnectionTarget;

#[derive(Debug, Display, Error, From)]
pub enum PgError {
    /// The tool could not be spawned or a stream broke mid-transfer.
    #[from]
    Io(io::Error),

    /// The tool ran and reported failure via its exit status.
    #[display("{tool} failed: {stderr}")]
    CommandFailed {
        tool: &'static str,
        #[error(ignore)]
        stderr: String,
    },
}

/// Produces a full logical dump of one database.
pub trait Dumper {
    /// Streams the dump into `sink`, returning the bytes written.
    fn dump(&self, target: &ConnectionTarget, sink: &mut dyn Write) -> Result<u64, PgError>;
}

/// Replays a logical dump into one database.
pub trait Restorer {
    fn restore(&self, target: &ConnectionTarget, source: &mut dyn Read) -> Result<(), PgError>;
}

/// Server administration and verification queries.
pub trait DbAdmin {
    /// Liveness probe; `Ok` means the server accepts connections.
    fn ping(&self, target: &ConnectionTarget) -> Result<(), PgError>;

    fn database_exists(&self, server: &ConnectionTarget, name: &str) -> Result<bool, PgError>;

    fn create_database(&self, server: &ConnectionTarget, name: &str) -> Result<(), PgError>;

    fn drop_database(&self, server: &ConnectionTarget, name: &str) -> Result<(), PgError>;

    /// Runs a single statement and returns its first result value, trimmed.
    fn query_scalar(&self, target: &ConnectionTarget, sql: &str) -> Result<String, PgError>;
}

/// Production wiring over the PostgreSQL client tools.
#[derive(Debug, Clone, Default)]
pub struct PgTools;

impl PgTools {
    /// libpq environment for `target`; the password never hits the command line.
    fn libpq_env(cmd: &mut Command, target: &ConnectionTarget) {
        cmd.env("PGHOST", &target.host)
            .env("PGPORT", target.port.to_string())
            .env("PGUSER", &target.user)
            .env("PGPASSWORD", &target.password)
            .env("PGDATABASE", &target.database);
    }

    fn run_capture(
        mut cmd: Command,
        tool: &'static str,
    ) -> Result<String, PgError> {
        let output = cmd.output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(PgError::CommandFailed {
                tool,
                stderr: stderr.trim_end().to_string(),
            });
        }
        if !stderr.is_empty() {
            log::warn!(target: "postgres", "{tool}: {}", stderr.trim_end());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    fn psql(&self, target: &ConnectionTarget, sql: &str) -> Result<String, PgError> {
        let mut cmd = Command::new("psql");
        Self::libpq_env(&mut cmd, target);
        cmd.arg("--no-psqlrc")
            .arg("--tuples-only")
            .arg("--no-align")
            .arg("--command")
            .arg(sql);

        Self::run_capture(cmd, "psql")
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Drains the child's stderr on its own thread. Reading it in lockstep
    /// with the data stream would deadlock once the tool fills the stderr
    /// pipe buffer with notices while we are still copying data.
    fn drain_stderr(child: &mut Child) -> thread::JoinHandle<String> {
        let pipe = child.stderr.take();
        thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut pipe) = pipe {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        })
    }
}

impl Dumper for PgTools {
    fn dump(&self, target: &ConnectionTarget, sink: &mut dyn Write) -> Result<u64, PgError> {
        let mut cmd = Command::new("pg_dump");
        Self::libpq_env(&mut cmd, target);
        cmd.arg("--format=plain")
            .arg("--no-owner")
            .arg("--no-privileges")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        log::trace!(target: "postgres", "started pg_dump for {target}");

        let stderr_drain = Self::drain_stderr(&mut child);
        let mut stdout = child.stdout.take().expect("stdout is piped");
        let written = io::copy(&mut stdout, sink)?;

        let stderr = stderr_drain.join().unwrap_or_default();
        let status = child.wait()?;
        if !status.success() {
            return Err(PgError::CommandFailed {
                tool: "pg_dump",
                stderr: stderr.trim_end().to_string(),
            });
        }
        if !stderr.is_empty() {
            log::warn!(target: "postgres", "pg_dump: {}", stderr.trim_end());
        }

        Ok(written)
    }
}

impl Restorer for PgTools {
    fn restore(&self, target: &ConnectionTarget, source: &mut dyn Read) -> Result<(), PgError> {
        let mut cmd = Command::new("psql");
        Self::libpq_env(&mut cmd, target);
        cmd.arg("--no-psqlrc")
            .arg("--quiet")
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        log::trace!(target: "postgres", "started psql restore into {target}");

        let stderr_drain = Self::drain_stderr(&mut child);
        {
            let mut stdin = child.stdin.take().expect("stdin is piped");
            io::copy(source, &mut stdin)?;
            // stdin drops here so psql sees EOF
        }

        let stderr = stderr_drain.join().unwrap_or_default();
        let status = child.wait()?;
        if !status.success() {
            return Err(PgError::CommandFailed {
                tool: "psql",
                stderr: stderr.trim_end().to_string(),
            });
        }
        if !stderr.is_empty() {
            log::warn!(target: "postgres", "psql restore: {}", stderr.trim_end());
        }

        Ok(())
    }
}

impl DbAdmin for PgTools {
    fn ping(&self, target: &ConnectionTarget) -> Result<(), PgError> {
        let mut cmd = Command::new("pg_isready");
        Self::libpq_env(&mut cmd, target);

        Self::run_capture(cmd, "pg_isready").map(|_| ())
    }

    fn database_exists(&self, server: &ConnectionTarget, name: &str) -> Result<bool, PgError> {
        let sql = format!(
            "SELECT 1 FROM pg_database WHERE datname = '{}'",
            name.replace('\'', "''")
        );

        Ok(!self.psql(server, &sql)?.is_empty())
    }

    fn create_database(&self, server: &ConnectionTarget, name: &str) -> Result<(), PgError> {
        let sql = format!("CREATE DATABASE {}", Self::quote_ident(name));

        self.psql(server, &sql).map(|_| ())
    }

    fn drop_database(&self, server: &ConnectionTarget, name: &str) -> Result<(), PgError> {
        let sql = format!("DROP DATABASE IF EXISTS {}", Self::quote_ident(name));

        self.psql(server, &sql).map(|_| ())
    }

    fn query_scalar(&self, target: &ConnectionTarget, sql: &str) -> Result<String, PgError> {
        self.psql(target, sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A child that fills its stderr pipe well past the kernel buffer before
    // producing any data must not stall the data copy.
    #[test]
    fn stderr_past_the_pipe_buffer_does_not_stall_the_stream() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("head -c 262144 /dev/zero >&2; printf data")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().expect("sh should spawn");
        let stderr_drain = PgTools::drain_stderr(&mut child);
        let mut stdout = child.stdout.take().expect("stdout is piped");
        let mut data = Vec::new();
        io::copy(&mut stdout, &mut data).expect("stdout copy");

        let stderr = stderr_drain.join().expect("drain thread");
        assert!(child.wait().expect("child exit").success());
        assert_eq!(data, b"data");
        assert_eq!(stderr.len(), 262144);
    }
}
