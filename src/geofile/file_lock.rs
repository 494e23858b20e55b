use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

use fs2::FileExt;

/// Exclusive advisory lock on a sidecar file, released when dropped.
///
/// Every holder opens the lock file itself, so the lock excludes other threads of this process
/// as well as other processes working on the same data directory.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Block until the lock is held.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }

    /// Take the lock if nobody holds it, `None` otherwise.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testdir::testdir;

    use super::FileLock;

    #[rstest]
    fn test_lock_is_exclusive_until_dropped() {
        let lock_path = testdir!().join("upload.lock");

        let held = FileLock::acquire(&lock_path).unwrap();
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_none());

        drop(held);
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_some());
    }
}
