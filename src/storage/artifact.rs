use chrono::NaiveDateTime;
use derive_more::{Display, Error};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const SUFFIX: &str = ".sql.gz";
const ENCRYPTED_SUFFIX: &str = ".sql.gz.enc";

/// One stored backup object, identified by its key.
///
/// Keys follow `{prefix}/backup_{YYYYMMDD}_{HHMMSS}.sql.gz[.enc]`; the
/// second-granularity timestamp makes keys unique as long as cycles respect
/// the minimum scheduling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub created: NaiveDateTime,
    pub encrypted: bool,
    pub size: u64,
}

/// An object key under the backup prefix that does not follow the artifact
/// naming scheme. Such objects are never deleted by the pruner.
#[derive(Debug, Display, Error, PartialEq, Eq)]
#[display("object key does not name an artifact: {key}")]
pub struct ForeignKey {
    pub key: String,
}

impl Artifact {
    /// Builds the key for a new artifact created at `timestamp`.
    pub fn key_for(prefix: &str, timestamp: NaiveDateTime, encrypted: bool) -> String {
        let suffix = if encrypted { ENCRYPTED_SUFFIX } else { SUFFIX };
        format!(
            "{prefix}/backup_{}{suffix}",
            timestamp.format(TIMESTAMP_FORMAT)
        )
    }

    /// Parses a listed object back into an [`Artifact`].
    pub fn from_key(prefix: &str, key: &str, size: u64) -> Result<Self, ForeignKey> {
        let foreign = || ForeignKey {
            key: key.to_string(),
        };

        let name = key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(foreign)?;
        let stem = name.strip_prefix("backup_").ok_or_else(foreign)?;

        let (timestamp, encrypted) = if let Some(ts) = stem.strip_suffix(ENCRYPTED_SUFFIX) {
            (ts, true)
        } else if let Some(ts) = stem.strip_suffix(SUFFIX) {
            (ts, false)
        } else {
            return Err(foreign());
        };

        let created =
            NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).map_err(|_| foreign())?;

        Ok(Self {
            key: key.to_string(),
            created,
            encrypted,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn key_embeds_timestamp_and_suffix() {
        let key = Artifact::key_for("db", ts(2026, 8, 23, 14, 5, 9), false);
        assert_eq!(key, "db/backup_20260823_140509.sql.gz");

        let key = Artifact::key_for("db", ts(2026, 8, 23, 14, 5, 9), true);
        assert_eq!(key, "db/backup_20260823_140509.sql.gz.enc");
    }

    #[test]
    fn round_trips_through_parse() {
        let created = ts(2026, 1, 2, 3, 4, 5);
        for encrypted in [false, true] {
            let key = Artifact::key_for("backups/prod", created, encrypted);
            let artifact =
                Artifact::from_key("backups/prod", &key, 1024).expect("should parse own key");

            assert_eq!(artifact.created, created);
            assert_eq!(artifact.encrypted, encrypted);
            assert_eq!(artifact.size, 1024);
        }
    }

    #[test]
    fn rejects_foreign_keys() {
        for key in [
            "db/readme.txt",
            "db/backup_garbage.sql.gz",
            "db/backup_20260823.sql.gz",          // date only
            "db/backup_20261301_000000.sql.gz",   // month 13
            "other/backup_20260823_140509.sql.gz", // wrong prefix
            "db/backup_20260823_140509.dump",
        ] {
            assert!(
                Artifact::from_key("db", key, 0).is_err(),
                "should reject {key:?}"
            );
        }
    }
}
