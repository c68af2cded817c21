use phoenix_runtime::RuntimeConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// A temporary unit root on disk
pub struct UnitFixture {
    dir: TempDir,
}

impl UnitFixture {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write a unit file, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> io::Result<PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Replace a unit's content in one rename, with an mtime ahead of the
    /// old one so the change is seen even on coarse-timestamp filesystems
    pub fn modify(&self, relative: &str, content: &str) -> io::Result<PathBuf> {
        let path = self.path(relative);
        let previous = fs::metadata(&path)?.modified()?;
        // `*.tmp` is excluded from tracking
        let staged = self.path(&format!("{relative}.tmp"));
        fs::write(&staged, content)?;
        Self::set_mtime(&staged, later_than(previous))?;
        fs::rename(&staged, &path)?;
        Ok(path)
    }

    /// Advance the mtime without changing content
    pub fn touch(&self, relative: &str) -> io::Result<()> {
        self.bump_mtime(&self.path(relative))
    }

    pub fn remove(&self, relative: &str) -> io::Result<()> {
        fs::remove_file(self.path(relative))
    }

    fn bump_mtime(&self, path: &Path) -> io::Result<()> {
        let current = fs::metadata(path)?.modified()?;
        Self::set_mtime(path, later_than(current))
    }

    fn set_mtime(path: &Path, time: SystemTime) -> io::Result<()> {
        fs::OpenOptions::new().write(true).open(path)?.set_modified(time)
    }

    /// Runtime config rooted here, with watcher nudges off and a poll
    /// interval long enough that tests drive every poll themselves
    pub fn config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.reload.roots = vec![self.root().to_path_buf()];
        config.reload.watch_events = false;
        config.reload.poll_interval_ms = 3_600_000;
        config
    }
}

fn later_than(time: SystemTime) -> SystemTime {
    time.max(SystemTime::now()) + Duration::from_secs(5)
}
