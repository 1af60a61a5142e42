use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use directories::BaseDirs;
use rusqlite::{Connection, OpenFlags};
use tempfile::{Builder, TempDir, TempPath};

use crate::error::TrendsError;
use crate::schema;

pub const DB_FILE: &str = "trends.db";
pub const LOCK_FILE: &str = "ingest.lock";

// A lock older than this is abandoned even if its pid is still taken.
const STALE_LOCK_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
    scratch_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, TrendsError> {
        let cwd =
            std::env::current_dir().map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd.join(".kira-vt"))
            .map_err(|_| TrendsError::Filesystem("invalid store path".to_string()))?;

        let scratch_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("kira-variant-trends")
                        .join("scratch"),
                )
                .ok()
            })
            .ok_or_else(|| {
                TrendsError::Filesystem("unable to resolve scratch directory".to_string())
            })?;

        Ok(Self { root, scratch_root })
    }

    pub fn at(root: Utf8PathBuf) -> Self {
        let scratch_root = root.join("scratch");
        Self { root, scratch_root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn scratch_root(&self) -> &Utf8Path {
        &self.scratch_root
    }

    pub fn db_path(&self) -> Utf8PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn ensure_root(&self) -> Result<(), TrendsError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))
    }

    pub fn ingest_in_progress(&self) -> bool {
        self.lock_path().as_std_path().exists() && !self.lock_is_stale()
    }

    fn lock_is_stale(&self) -> bool {
        fs::read_to_string(self.lock_path().as_std_path())
            .ok()
            .and_then(|content| LockStamp::parse(&content))
            .is_some_and(|stamp| stamp.is_stale())
    }

    pub fn is_populated(&self) -> Result<bool, TrendsError> {
        if !self.db_path().as_std_path().exists() {
            return Ok(false);
        }
        let conn = Connection::open_with_flags(
            self.db_path().as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        schema::rollups_exist(&conn)
    }

    pub fn acquire_ingest_lock(&self) -> Result<IngestLock, TrendsError> {
        self.ensure_root()?;
        let path = self.lock_path();
        let mut file = match create_lock_file(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if !self.lock_is_stale() {
                    return Err(TrendsError::Unavailable);
                }
                tracing::warn!(path = %path, "taking over stale ingestion lock");
                fs::remove_file(path.as_std_path())
                    .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
                match create_lock_file(&path) {
                    Ok(file) => file,
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                        return Err(TrendsError::Unavailable);
                    }
                    Err(err) => return Err(TrendsError::Filesystem(err.to_string())),
                }
            }
            Err(err) => return Err(TrendsError::Filesystem(err.to_string())),
        };
        let stamp = LockStamp {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
        .render();
        file.write_all(stamp.as_bytes())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        Ok(IngestLock { path })
    }

    pub fn open_read(&self) -> Result<Connection, TrendsError> {
        if self.ingest_in_progress() {
            return Err(TrendsError::Unavailable);
        }
        let path = self.db_path();
        if !path.as_std_path().exists() {
            return Err(TrendsError::StoreNotReady(path.into_std_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    pub fn staging_db(&self) -> Result<TempPath, TrendsError> {
        self.ensure_root()?;
        let temp = Builder::new()
            .prefix("trends-")
            .suffix(".building")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        Ok(temp.into_temp_path())
    }

    pub fn scratch_dir(&self) -> Result<TempDir, TrendsError> {
        fs::create_dir_all(self.scratch_root.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))?;
        Builder::new()
            .prefix("kira-vt-scratch")
            .tempdir_in(self.scratch_root.as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))
    }

    pub fn promote(&self, staging: TempPath) -> Result<(), TrendsError> {
        staging
            .persist(self.db_path().as_std_path())
            .map_err(|err| TrendsError::Filesystem(err.to_string()))
    }
}

fn create_lock_file(path: &Utf8Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_std_path())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockStamp {
    pid: u32,
    started_at: DateTime<Utc>,
}

impl LockStamp {
    fn render(&self) -> String {
        format!(
            "pid={} started_at={}\n",
            self.pid,
            self.started_at.to_rfc3339()
        )
    }

    fn parse(content: &str) -> Option<Self> {
        let mut pid = None;
        let mut started_at = None;
        for field in content.split_whitespace() {
            if let Some(value) = field.strip_prefix("pid=") {
                pid = value.parse().ok();
            } else if let Some(value) = field.strip_prefix("started_at=") {
                started_at = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|time| time.with_timezone(&Utc));
            }
        }
        Some(Self {
            pid: pid?,
            started_at: started_at?,
        })
    }

    fn is_stale(&self) -> bool {
        Utc::now() - self.started_at > Duration::hours(STALE_LOCK_HOURS)
            || !process_alive(self.pid)
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

// Removes the lock file on drop.
#[derive(Debug)]
pub struct IngestLock {
    path: Utf8PathBuf,
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            tracing::warn!(path = %self.path, "failed to remove ingestion lock: {err}");
        }
    }
}

pub fn preset_bulk_connection(conn: &Connection) -> Result<(), TrendsError> {
    conn.execute_batch(
        "PRAGMA journal_mode = OFF;
         PRAGMA synchronous = OFF;
         PRAGMA locking_mode = EXCLUSIVE;
         PRAGMA temp_store = FILE;",
    )?;
    Ok(())
}
