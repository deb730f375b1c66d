//! JSON state files shared between processes.
//!
//! Every read-modify-write happens under an exclusive `fs2` advisory lock on
//! a sidecar `<file>.lock`, and new contents land via temp file + rename so a
//! crashed writer never leaves a torn file behind.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

/// A serde-backed file guarded by an advisory lock.
#[derive(Debug, Clone)]
pub(crate) struct StateFile<T> {
    path: PathBuf,
    lock_path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            _marker: PhantomData,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read a consistent snapshot under a shared lock.
    pub(crate) fn read(&self) -> Result<T> {
        let guard = self.open_lock_file()?;
        guard
            .lock_shared()
            .map_err(|e| Error::io(&self.lock_path, &e))?;
        let state = self.load();
        drop(guard);
        state
    }

    /// Apply `f` to the current state and persist the result atomically.
    ///
    /// Nothing is written when `f` returns an error.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let guard = self.open_lock_file()?;
        guard
            .lock_exclusive()
            .map_err(|e| Error::io(&self.lock_path, &e))?;

        let mut state = self.load()?;
        let result = f(&mut state)?;
        self.store(&state)?;

        drop(guard);
        Ok(result)
    }

    fn open_lock_file(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, &e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| Error::io(&self.lock_path, &e))
    }

    fn load(&self) -> Result<T> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(T::default()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Parse(format!("corrupt state file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(Error::io(&self.path, &e)),
        }
    }

    fn store(&self, state: &T) -> Result<()> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(format!(".tmp-{}", std::process::id()));
        let tmp_path = PathBuf::from(tmp_name);

        let json = serde_json::to_vec_pretty(state)?;
        let mut tmp = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, &e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.sync_all())
            .map_err(|e| Error::io(&tmp_path, &e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::io(&self.path, &e)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use serde::Deserialize;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counter {
        value: u64,
    }

    #[test]
    fn test_missing_file_reads_as_default() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", &e))?;
        let file = StateFile::<Counter>::new(dir.path().join("counter.json"));
        assert_eq!(file.read()?.value, 0);
        Ok(())
    }

    #[test]
    fn test_failed_update_writes_nothing() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", &e))?;
        let file = StateFile::<Counter>::new(dir.path().join("counter.json"));
        file.update(|c| {
            c.value = 5;
            Ok(())
        })?;

        let result: Result<()> = file.update(|c| {
            c.value = 99;
            Err(Error::InvalidRequest("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(file.read()?.value, 5);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_a_parse_error() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", &e))?;
        let path = dir.path().join("counter.json");
        fs::write(&path, "{not json").map_err(|e| Error::io(&path, &e))?;
        let file = StateFile::<Counter>::new(path);
        assert!(matches!(file.read(), Err(Error::Parse(_))));
        Ok(())
    }

    #[test]
    fn test_concurrent_updates_are_serialized() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", &e))?;
        let path = dir.path().join("counter.json");

        // Separate StateFile values mimic independent processes.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let file = Arc::new(StateFile::<Counter>::new(path.clone()));
                thread::spawn(move || {
                    for _ in 0..25 {
                        file.update(|c| {
                            c.value += 1;
                            Ok(())
                        })?;
                    }
                    Ok::<(), Error>(())
                })
            })
            .collect();

        for handle in handles {
            handle
                .join()
                .map_err(|_| Error::InvalidRequest("worker panicked".into()))??;
        }

        assert_eq!(StateFile::<Counter>::new(path).read()?.value, 200);
        Ok(())
    }
}
