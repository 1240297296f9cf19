//! Scratch directories tied to the lifetime of a run.
//!
//! Every directory handed out is recorded in a registry shared with the signal
//! handler, so an interrupted run sweeps the same set a normal exit would.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::TempDirError;

const PREFIX: &str = "diagrun_temp_";
const HASH_LEN: usize = 16;

/// Registry of scratch directories created during a run.
#[derive(Debug, Clone)]
pub struct TempDirManager {
    root: PathBuf,
    keep_temp: bool,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl TempDirManager {
    /// Scratch directories go under `root`, or the platform temp dir if `None`.
    pub fn new(root: Option<&Path>, keep_temp: bool) -> Result<Self> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => std::env::temp_dir(),
        };
        if !root.is_dir() {
            fs::create_dir_all(&root)
                .with_context(|| format!("create temp root {}", root.display()))?;
        }
        Ok(Self {
            root,
            keep_temp,
            dirs: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn keep_temp(&self) -> bool {
        self.keep_temp
    }

    /// Create a uniquely named directory.
    pub fn make_tempdir(&self) -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(&self.root)
            .with_context(|| format!("create temp dir in {}", self.root.display()))?
            .keep();
        self.register(dir)
    }

    /// Create (or reuse) the directory named after `key`.
    ///
    /// `key` must be a single plain path component.
    pub fn make_named_tempdir(&self, key: &str) -> Result<PathBuf> {
        let mut components = Path::new(key).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain || key.contains(std::path::is_separator) {
            return Err(TempDirError::InvalidKey(key.to_string()).into());
        }
        let dir = self.root.join(format!("{PREFIX}{key}"));
        self.create_and_register(dir)
    }

    /// Create (or reuse) a directory named from a digest of `value`.
    pub fn make_hashed_tempdir<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        let encoded = serde_json::to_vec(value).context("serialize temp dir key")?;
        let digest = hex::encode(Sha256::digest(&encoded));
        self.make_named_tempdir(&digest[..HASH_LEN])
    }

    /// Remove one registered directory.
    pub fn rm_tempdir(&self, path: &Path) -> Result<()> {
        {
            let mut dirs = self.lock();
            let index = dirs
                .iter()
                .position(|dir| dir == path)
                .ok_or_else(|| TempDirError::NotRegistered(path.to_path_buf()))?;
            dirs.remove(index);
        }
        remove(path)
    }

    /// Remove every registered directory unless temp files are kept.
    ///
    /// The registry is drained either way, so calling this twice is harmless.
    pub fn cleanup(&self) {
        let dirs: Vec<PathBuf> = self.lock().drain(..).collect();
        if self.keep_temp {
            debug!(count = dirs.len(), "keeping temp dirs");
            return;
        }
        for dir in dirs {
            if let Err(err) = remove(&dir) {
                warn!(dir = %dir.display(), err = %format!("{err:#}"), "temp dir cleanup failed");
            }
        }
    }

    /// Snapshot of the registered directories.
    #[cfg(any(test, feature = "test-support"))]
    pub fn registered(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    fn create_and_register(&self, dir: PathBuf) -> Result<PathBuf> {
        if self.lock().contains(&dir) {
            return Err(TempDirError::AlreadyRegistered(dir).into());
        }
        if !dir.is_dir() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create temp dir {}", dir.display()))?;
        }
        self.register(dir)
    }

    fn register(&self, dir: PathBuf) -> Result<PathBuf> {
        let mut dirs = self.lock();
        if dirs.contains(&dir) {
            return Err(TempDirError::AlreadyRegistered(dir).into());
        }
        debug!(dir = %dir.display(), "registered temp dir");
        dirs.push(dir.clone());
        Ok(dir)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.dirs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove(path: &Path) -> Result<()> {
    debug!(dir = %path.display(), "cleanup temp dir");
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove temp dir {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(keep_temp: bool) -> (tempfile::TempDir, TempDirManager) {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = TempDirManager::new(Some(temp.path()), keep_temp).expect("manager");
        (temp, manager)
    }

    #[test]
    fn unique_dirs_are_created_and_registered() {
        let (_temp, manager) = manager(false);
        let a = manager.make_tempdir().expect("a");
        let b = manager.make_tempdir().expect("b");
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        assert_eq!(manager.registered(), vec![a, b]);
    }

    #[test]
    fn named_dir_is_deterministic_but_registers_once() {
        let (temp, manager) = manager(false);
        let dir = manager.make_named_tempdir("case").expect("named");
        assert_eq!(dir, temp.path().join("diagrun_temp_case"));
        let err = manager.make_named_tempdir("case").expect_err("duplicate");
        assert_eq!(
            err.downcast_ref::<TempDirError>(),
            Some(&TempDirError::AlreadyRegistered(dir))
        );
    }

    #[test]
    fn named_dir_keys_stay_inside_root() {
        let (temp, manager) = manager(false);
        for key in ["../escape", "a/b", "..", ".", "", "/abs"] {
            let err = manager.make_named_tempdir(key).expect_err(key);
            assert_eq!(
                err.downcast_ref::<TempDirError>(),
                Some(&TempDirError::InvalidKey(key.to_string()))
            );
        }
        assert!(manager.registered().is_empty());
        assert!(!temp.path().join("diagrun_temp_..").exists());
    }

    #[test]
    fn existing_dir_on_disk_is_reused() {
        let (temp, manager) = manager(false);
        let existing = temp.path().join("diagrun_temp_reuse");
        fs::create_dir(&existing).expect("mkdir");
        assert_eq!(manager.make_named_tempdir("reuse").expect("reuse"), existing);
    }

    #[test]
    fn hashed_dirs_follow_value() {
        let (_temp, manager) = manager(false);
        let a = manager.make_hashed_tempdir(&("case", 1990)).expect("a");
        let b = manager.make_hashed_tempdir(&("case", 1991)).expect("b");
        assert_ne!(a, b);
        let name = a.file_name().and_then(|n| n.to_str()).expect("name");
        assert_eq!(name.len(), PREFIX.len() + HASH_LEN);
    }

    #[test]
    fn rm_requires_registration() {
        let (temp, manager) = manager(false);
        let stray = temp.path().join("stray");
        fs::create_dir(&stray).expect("mkdir");
        let err = manager.rm_tempdir(&stray).expect_err("unregistered");
        assert!(matches!(
            err.downcast_ref::<TempDirError>(),
            Some(TempDirError::NotRegistered(_))
        ));
        assert!(stray.is_dir());

        let dir = manager.make_tempdir().expect("dir");
        manager.rm_tempdir(&dir).expect("rm");
        assert!(!dir.exists());
        assert!(manager.registered().is_empty());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let (_temp, manager) = manager(false);
        let a = manager.make_tempdir().expect("a");
        let b = manager.make_named_tempdir("b").expect("b");
        let handle = manager.clone();
        manager.cleanup();
        handle.cleanup();
        assert!(!a.exists() && !b.exists());
        assert!(manager.registered().is_empty());
    }

    #[test]
    fn keep_temp_leaves_dirs_on_disk() {
        let (_temp, manager) = manager(true);
        let dir = manager.make_tempdir().expect("dir");
        manager.cleanup();
        assert!(dir.is_dir());
        assert!(manager.registered().is_empty());
    }
}
