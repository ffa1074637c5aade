//! Filesystem primitives the file backend is written against.
//!
//! [`OsFs`] resolves relative paths against a storage root on disk and
//! refuses paths that would leave it.
//! [`MemoryFs`] keeps files in process, which is handy for tests and for
//! throwaway stores.

use std::{
    collections::HashMap,
    fmt,
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

pub trait Filesystem: fmt::Debug + Send + Sync {
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Creates an empty file. Fails with `AlreadyExists` if it is there already.
    fn create(&self, path: &Path) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replaces the whole content of an existing file.
    fn write_truncate(&self, path: &Path, data: &[u8]) -> io::Result<()>;
}

impl<F: Filesystem + ?Sized> Filesystem for Arc<F> {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        (**self).exists(path)
    }

    fn create(&self, path: &Path) -> io::Result<()> {
        (**self).create(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write_truncate(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        (**self).write_truncate(path, data)
    }
}

#[derive(Debug, Clone)]
pub struct OsFs {
    root: PathBuf,
}

impl OsFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is outside {}", path.display(), self.root.display()),
            ));
        }

        Ok(self.root.join(path))
    }
}

impl Filesystem for OsFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        self.resolve(path)?.try_exists()
    }

    fn create(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.resolve(path)?)?;
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut data = vec![];
        File::open(self.resolve(path)?)?.read_to_end(&mut data)?;
        Ok(data)
    }

    fn write_truncate(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.resolve(path)?)?;
        file.write_all(data)?;
        file.sync_data()
    }
}

#[derive(Debug, Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `write_truncate` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Puts a file in place without going through `create`.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), data.into());
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

impl Filesystem for MemoryFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }

    fn create(&self, path: &Path) -> io::Result<()> {
        let mut files = self.files.lock();
        if files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        files.insert(path.to_owned(), vec![]);
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write_truncate(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut files = self.files.lock();
        let file = files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.clear();
        file.extend_from_slice(data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_fs_resolves_against_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new(dir.path());
        let path = Path::new("store.json");

        assert!(!fs.exists(path).unwrap());
        fs.create(path).unwrap();
        assert!(dir.path().join("store.json").exists());
        assert!(fs.read(path).unwrap().is_empty());

        let err = fs.create(path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn os_fs_write_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new(dir.path());
        let path = Path::new("data");
        fs.create(path).unwrap();

        fs.write_truncate(path, b"a much longer first version").unwrap();
        fs.write_truncate(path, b"short").unwrap();

        assert_eq!(fs.read(path).unwrap(), b"short");
    }

    #[test]
    fn os_fs_write_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new(dir.path());

        let err = fs.write_truncate(Path::new("missing"), b"{}").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn os_fs_stays_inside_root() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let fs = OsFs::new(root.path());

        let absolute = elsewhere.path().join("escaped.json");
        let err = fs.create(&absolute).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!absolute.exists());

        for path in ["../escaped.json", "nested/../../escaped.json"] {
            let err = fs.exists(Path::new(path)).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{path}");
        }
        assert!(fs.exists(Path::new("./store.json")).is_ok());
    }

    #[test]
    fn memory_fs_counts_writes() {
        let fs = MemoryFs::new();
        let path = Path::new("/store");

        assert!(fs.read(path).is_err());
        fs.create(path).unwrap();
        fs.write_truncate(path, b"one").unwrap();
        fs.write_truncate(path, b"two").unwrap();

        assert_eq!(fs.read(path).unwrap(), b"two");
        assert_eq!(fs.write_count(), 2);
        assert_eq!(
            fs.create(path).unwrap_err().kind(),
            io::ErrorKind::AlreadyExists
        );
    }
}
