//! Object-store access.
//!
//! [`ObjectStore`] is the seam between orchestration and the store: the
//! production implementation [`S3Cli`] shells out to the `aws` CLI and treats
//! exit status as the sole success signal, tests substitute an in-memory
//! store. [`transport::StorageTransport`] wraps any store in retry-with-backoff.

pub mod artifact;
pub mod transport;

use std::io;
use std::path::Path;
use std::process::Command;

use derive_more::{Display, Error, From};

use crate::config;

/// Key and byte size of one listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Display, Error, From)]
pub enum StoreError {
    /// The store client could not be spawned or a local file was unreadable.
    #[from]
    Io(io::Error),

    /// The store client ran but reported failure.
    #[display("store operation `{op}` failed: {stderr}")]
    CommandFailed {
        op: &'static str,
        #[error(ignore)]
        stderr: String,
    },

    /// The store client produced output the caller could not interpret.
    #[display("store operation `{op}` returned malformed output")]
    MalformedResponse { op: &'static str },
}

/// Remote object store: put, get, list, delete.
///
/// Every upload attaches key/value metadata for auditability. Implementations
/// report failure per operation; retries are the transport's concern.
pub trait ObjectStore {
    fn put(&self, key: &str, file: &Path, metadata: &[(String, String)]) -> Result<(), StoreError>;

    /// Downloads `key` to `dest`, returning the byte size written.
    fn get(&self, key: &str, dest: &Path) -> Result<u64, StoreError>;

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Production store backed by the `aws s3api` CLI.
///
/// Credentials are passed through the child-process environment only and
/// never appear on the command line.
#[derive(Debug, Clone)]
pub struct S3Cli {
    storage: config::Storage,
}

impl S3Cli {
    pub fn new(storage: config::Storage) -> Self {
        Self { storage }
    }

    fn s3api(&self, op: &str) -> Command {
        let mut cmd = Command::new("aws");
        cmd.env("AWS_ACCESS_KEY_ID", &self.storage.access_key)
            .env("AWS_SECRET_ACCESS_KEY", &self.storage.secret_key)
            .env("AWS_DEFAULT_REGION", &self.storage.region)
            .arg("s3api")
            .arg(op)
            .arg("--bucket")
            .arg(&self.storage.bucket)
            .arg("--output")
            .arg("json");
        if let Some(endpoint) = &self.storage.endpoint {
            cmd.arg("--endpoint-url").arg(endpoint);
        }

        cmd
    }

    fn run(mut cmd: Command, op: &'static str) -> Result<Vec<u8>, StoreError> {
        let output = cmd.output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(StoreError::CommandFailed {
                op,
                stderr: stderr.trim_end().to_string(),
            });
        }
        if !stderr.is_empty() {
            log::warn!(target: "storage::s3", "{op}: {}", stderr.trim_end());
        }

        Ok(output.stdout)
    }
}

impl ObjectStore for S3Cli {
    fn put(&self, key: &str, file: &Path, metadata: &[(String, String)]) -> Result<(), StoreError> {
        let mut cmd = self.s3api("put-object");
        cmd.arg("--key").arg(key).arg("--body").arg(file);
        if !metadata.is_empty() {
            let pairs: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
            cmd.arg("--metadata").arg(pairs.join(","));
        }

        Self::run(cmd, "put").map(|_| ())
    }

    fn get(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        let mut cmd = self.s3api("get-object");
        cmd.arg("--key").arg(key).arg(dest);

        Self::run(cmd, "get")?;
        Ok(std::fs::metadata(dest)?.len())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut cmd = self.s3api("list-objects-v2");
        cmd.arg("--prefix").arg(prefix);

        let stdout = Self::run(cmd, "list")?;

        // An empty bucket yields empty output instead of an empty Contents list.
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let parsed: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|_| StoreError::MalformedResponse { op: "list" })?;

        let contents = match parsed.get("Contents") {
            None => return Ok(Vec::new()),
            Some(contents) => contents
                .as_array()
                .ok_or(StoreError::MalformedResponse { op: "list" })?,
        };

        contents
            .iter()
            .map(|object| {
                let key = object
                    .get("Key")
                    .and_then(serde_json::Value::as_str)
                    .ok_or(StoreError::MalformedResponse { op: "list" })?;
                let size = object
                    .get("Size")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0);

                Ok(ObjectMeta {
                    key: key.to_string(),
                    size,
                })
            })
            .collect()
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut cmd = self.s3api("delete-object");
        cmd.arg("--key").arg(key);

        Self::run(cmd, "delete").map(|_| ())
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory [`ObjectStore`] with injectable failures, for cycle tests.

    use std::collections::{BTreeMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;

    use super::{ObjectMeta, ObjectStore, StoreError};

    #[derive(Default)]
    struct State {
        objects: BTreeMap<String, Vec<u8>>,
        failing_puts: u32,
        failing_gets: u32,
        failing_lists: u32,
        undeletable: HashSet<String>,
    }

    #[derive(Default)]
    pub struct MemoryStore {
        state: Mutex<State>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, key: &str, bytes: &[u8]) {
            let mut state = self.state.lock().unwrap();
            state.objects.insert(key.to_string(), bytes.to_vec());
        }

        pub fn keys(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.objects.keys().cloned().collect()
        }

        pub fn object(&self, key: &str) -> Option<Vec<u8>> {
            let state = self.state.lock().unwrap();
            state.objects.get(key).cloned()
        }

        /// The next `n` puts fail with a retryable error.
        pub fn fail_next_puts(&self, n: u32) {
            self.state.lock().unwrap().failing_puts = n;
        }

        pub fn fail_next_gets(&self, n: u32) {
            self.state.lock().unwrap().failing_gets = n;
        }

        pub fn fail_next_lists(&self, n: u32) {
            self.state.lock().unwrap().failing_lists = n;
        }

        pub fn refuse_delete(&self, key: &str) {
            self.state.lock().unwrap().undeletable.insert(key.to_string());
        }

        fn injected(op: &'static str) -> StoreError {
            StoreError::CommandFailed {
                op,
                stderr: "injected failure".to_string(),
            }
        }
    }

    impl ObjectStore for MemoryStore {
        fn put(
            &self,
            key: &str,
            file: &Path,
            _metadata: &[(String, String)],
        ) -> Result<(), StoreError> {
            let bytes = std::fs::read(file)?;

            let mut state = self.state.lock().unwrap();
            if state.failing_puts > 0 {
                state.failing_puts -= 1;
                return Err(Self::injected("put"));
            }
            state.objects.insert(key.to_string(), bytes);
            Ok(())
        }

        fn get(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.failing_gets > 0 {
                state.failing_gets -= 1;
                return Err(Self::injected("get"));
            }
            let bytes = state.objects.get(key).ok_or(Self::injected("get"))?;
            std::fs::write(dest, bytes)?;
            Ok(bytes.len() as u64)
        }

        fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                return Err(Self::injected("list"));
            }

            Ok(state
                .objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, bytes)| ObjectMeta {
                    key: key.clone(),
                    size: bytes.len() as u64,
                })
                .collect())
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.undeletable.contains(key) {
                return Err(Self::injected("delete"));
            }
            state.objects.remove(key);
            Ok(())
        }
    }
}
