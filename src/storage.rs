use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::{config::Config, record::Record};

/// Upper bound on `<nanos>-<n>` names tried when timestamps collide.
const MAX_FILE_NAME_ATTEMPTS: usize = 1024;

#[derive(Debug, Clone)]
pub struct LogDir {
    path: PathBuf,
}

impl LogDir {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.storage.log_dir.clone())
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `record` into a new file and returns its path. Existing files
    /// are never opened or replaced.
    pub async fn write_record(&self, record: Record) -> anyhow::Result<PathBuf> {
        let dir = self.path.clone();
        tokio::task::spawn_blocking(move || write_record_blocking(&dir, &record))
            .await
            .context("join write_record task")?
    }
}

fn write_record_blocking(dir: &Path, record: &Record) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;

    let bytes = record.to_json_pretty()?;
    let base_name = record.file_name()?;
    let (path, mut file) = create_unique_file(dir, &base_name)?;

    if let Err(err) = file.write_all(&bytes) {
        drop(file);
        if let Err(remove_err) = fs::remove_file(&path) {
            tracing::warn!(
                path = %path.display(),
                "failed to remove partially written record: {remove_err}"
            );
        }
        return Err(err).with_context(|| format!("write record file {}", path.display()));
    }

    Ok(path)
}

fn create_unique_file(dir: &Path, base_name: &str) -> anyhow::Result<(PathBuf, File)> {
    for attempt in 0..MAX_FILE_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            base_name.to_owned()
        } else {
            format!("{base_name}-{attempt}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "record file name already taken");
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create record file {}", path.display()));
            }
        }
    }

    anyhow::bail!(
        "no free record file name for timestamp {base_name} in {} after {MAX_FILE_NAME_ATTEMPTS} attempts",
        dir.display()
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{TimeZone as _, Utc};
    use hyper::{Method, Request};

    use super::LogDir;
    use crate::{config::Config, record::Record};

    fn sample_record(nanos: u32, body: &str) -> Record {
        let (parts, ()) = Request::builder()
            .method(Method::PUT)
            .uri("/items/7")
            .header("host", "sink.test")
            .header("x-test", "a")
            .body(())
            .unwrap()
            .into_parts();
        let timestamp = Utc.timestamp_opt(1_700_000_000, nanos).unwrap();
        Record::capture(&parts, body.as_bytes(), timestamp)
    }

    fn file_names(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn from_config_uses_configured_log_dir() {
        let config = Config::new("/var/lib/request-sink", 9000);
        let log_dir = LogDir::from_config(&config);
        assert_eq!(log_dir.path(), std::path::Path::new("/var/lib/request-sink"));
    }

    #[tokio::test]
    async fn write_record_creates_missing_dirs_and_names_file_by_timestamp() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested").join("requests");
        let log_dir = LogDir::new(root.clone());
        let record = sample_record(42, "payload");

        let path = log_dir.write_record(record.clone()).await.unwrap();

        assert_eq!(path, root.join("1700000000000000042"));
        let stored: Record = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn write_record_tolerates_existing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_dir = LogDir::new(temp_dir.path().to_path_buf());

        log_dir.write_record(sample_record(1, "one")).await.unwrap();
        log_dir.write_record(sample_record(2, "two")).await.unwrap();

        assert_eq!(
            file_names(temp_dir.path()),
            vec!["1700000000000000001", "1700000000000000002"]
        );
    }

    #[tokio::test]
    async fn colliding_timestamps_get_numeric_suffixes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_dir = LogDir::new(temp_dir.path().to_path_buf());

        let first = log_dir.write_record(sample_record(9, "first")).await.unwrap();
        let second = log_dir.write_record(sample_record(9, "second")).await.unwrap();
        let third = log_dir.write_record(sample_record(9, "third")).await.unwrap();

        assert_eq!(first, temp_dir.path().join("1700000000000000009"));
        assert_eq!(second, temp_dir.path().join("1700000000000000009-1"));
        assert_eq!(third, temp_dir.path().join("1700000000000000009-2"));
        let first_stored: Record = serde_json::from_slice(&fs::read(&first).unwrap()).unwrap();
        assert_eq!(first_stored.body, "first");
        let third_stored: Record = serde_json::from_slice(&fs::read(&third).unwrap()).unwrap();
        assert_eq!(third_stored.body, "third");
    }

    #[tokio::test]
    async fn existing_foreign_file_is_left_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let occupied = temp_dir.path().join("1700000000000000003");
        fs::write(&occupied, b"not ours").unwrap();
        let log_dir = LogDir::new(temp_dir.path().to_path_buf());

        let path = log_dir.write_record(sample_record(3, "new")).await.unwrap();

        assert_eq!(path, temp_dir.path().join("1700000000000000003-1"));
        assert_eq!(fs::read(&occupied).unwrap(), b"not ours");
    }

    #[tokio::test]
    async fn unusable_log_dir_reports_error_and_writes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"regular file").unwrap();
        let log_dir = LogDir::new(blocker.join("requests"));

        let err = log_dir
            .write_record(sample_record(4, "lost"))
            .await
            .expect_err("writing below a regular file should fail");

        assert!(
            format!("{err:#}").contains("create log dir"),
            "error: {err:#}"
        );
        assert_eq!(file_names(temp_dir.path()), vec!["blocker"]);
    }
}
