//! Filesystem-backed Pod.
//!
//! Writes land atomically: the new content is written to a temp file in
//! the same directory as the target and renamed into place, via
//! `tempfile::NamedTempFile::persist`, so a reader never observes a
//! partially-written blob.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::retry::{with_retry, DEFAULT_ATTEMPTS};
use super::Pod;

pub struct FilesystemPod {
    root: PathBuf,
}

impl FilesystemPod {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemPod { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Pod for FilesystemPod {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        with_retry(&format!("fs read {:?}", path), DEFAULT_ATTEMPTS, || match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {:?}", path)),
        })
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let dir = path.parent().unwrap_or(&self.root);
        with_retry(&format!("fs write {:?}", path), DEFAULT_ATTEMPTS, || {
            fs::create_dir_all(dir).with_context(|| format!("creating directory {:?}", dir))?;
            let mut tmp =
                NamedTempFile::new_in(dir).with_context(|| format!("creating temp file in {:?}", dir))?;
            std::io::Write::write_all(&mut tmp, data)?;
            tmp.persist(&path)
                .with_context(|| format!("renaming temp file into {:?}", path))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("deleting {:?}", path)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path_for(prefix);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut out: Vec<String> = fs::read_dir(&dir)
            .with_context(|| format!("listing {:?}", dir))?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                join_key(prefix, &name)
            })
            .collect();
        out.sort();
        Ok(out)
    }

    fn mtime(&self, key: &str) -> Result<Option<std::time::SystemTime>> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat'ing {:?}", path)),
        }
    }

    fn walk(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path_for(prefix);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                out.push(rel);
            }
        }
        out.sort();
        Ok(out)
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_temp_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pod = FilesystemPod::new(dir.path());
        pod.put("blobs/ab/cd/ef", b"payload").unwrap();
        assert_eq!(pod.get("blobs/ab/cd/ef").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn missing_root_yields_empty_list_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pod = FilesystemPod::new(dir.path().join("does-not-exist"));
        assert_eq!(pod.list("log/").unwrap(), Vec::<String>::new());
        assert_eq!(pod.walk("log/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pod = FilesystemPod::new(dir.path());
        pod.delete("never-existed").unwrap();
    }
}
