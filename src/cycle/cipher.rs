use std::io;
use std::path::Path;
use std::process::Command;

use derive_more::{Display, Error, From};

// The key reaches openssl through this variable, never through argv.
const KEY_ENV: &str = "PG_DRILL_ENC_KEY";

#[derive(Debug, Display, Error, From)]
pub enum CipherError {
    #[from]
    Io(io::Error),

    #[display("openssl failed: {stderr}")]
    CommandFailed {
        #[error(ignore)]
        stderr: String,
    },
}

/// Symmetric file cipher shelling out to `openssl enc`.
#[derive(Debug, Clone)]
pub struct OpensslCipher {
    key: String,
}

impl OpensslCipher {
    pub fn new(key: String) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, input: &Path, output: &Path) -> Result<(), CipherError> {
        self.run(input, output, false)
    }

    pub fn decrypt(&self, input: &Path, output: &Path) -> Result<(), CipherError> {
        self.run(input, output, true)
    }

    fn run(&self, input: &Path, output: &Path, decrypt: bool) -> Result<(), CipherError> {
        let mut cmd = Command::new("openssl");
        cmd.env(KEY_ENV, &self.key)
            .arg("enc")
            .arg("-aes-256-cbc")
            .arg("-pbkdf2")
            .arg("-salt")
            .arg("-pass")
            .arg(format!("env:{KEY_ENV}"))
            .arg("-in")
            .arg(input)
            .arg("-out")
            .arg(output);
        if decrypt {
            cmd.arg("-d");
        }

        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CipherError::CommandFailed {
                stderr: stderr.trim_end().to_string(),
            });
        }

        Ok(())
    }
}
