//! Local filesystem adapter and the reports-directory advisory lock

use super::FilesystemAdapter;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = ".lock";

/// Advisory single-process lock on a directory.
///
/// Held for the lifetime of the process; the lock file is removed on drop.
pub struct ProcessLock {
    path: PathBuf,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock file");
        }
    }
}

pub struct LocalFilesystem;

impl FilesystemAdapter for LocalFilesystem {
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        // Write to a sibling temp file first so readers never observe a
        // partial report.
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn acquire_lock(&self, dir: &Path) -> io::Result<ProcessLock> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!(
                            "another process holds {}; remove it if that process is gone",
                            path.display()
                        ),
                    )
                } else {
                    e
                }
            })?;
        writeln!(file, "{}", std::process::id())?;

        Ok(ProcessLock { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let fs_adapter = LocalFilesystem;

        fs_adapter.write_atomic(&path, b"{\"ok\":true}").unwrap();
        assert_eq!(fs_adapter.read(&path).unwrap(), b"{\"ok\":true}");

        // No temp residue left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let fs_adapter = LocalFilesystem;

        fs_adapter.write_atomic(&path, b"first").unwrap();
        fs_adapter.write_atomic(&path, b"second").unwrap();
        assert_eq!(fs_adapter.read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let fs_adapter = LocalFilesystem;

        let lock = fs_adapter.acquire_lock(dir.path()).unwrap();
        let second = fs_adapter.acquire_lock(dir.path());
        assert!(second.is_err());

        drop(lock);
        let third = fs_adapter.acquire_lock(dir.path());
        assert!(third.is_ok());
    }

    #[test]
    fn test_list_returns_sorted_files() {
        let dir = tempdir().unwrap();
        let fs_adapter = LocalFilesystem;
        fs_adapter.write_atomic(&dir.path().join("b.json"), b"b").unwrap();
        fs_adapter.write_atomic(&dir.path().join("a.json"), b"a").unwrap();

        let files = fs_adapter.list(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }
}
