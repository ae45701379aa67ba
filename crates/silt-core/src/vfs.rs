//! Thin filesystem facade for segment storage.
//!
//! The segment backend only ever needs three verbs (create a writable
//! stream, open a readable-seekable one, remove one), so that is the whole
//! [`Vfs`] contract. [`OsVfs`] maps it onto `std::fs`; [`MemVfs`] keeps the
//! streams in shared memory, which is what the test suites (and ephemeral
//! engines) run against.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A readable, seekable byte stream.
pub trait ReadStream: Read + Seek + Send + std::fmt::Debug {}
impl<T: Read + Seek + Send + std::fmt::Debug> ReadStream for T {}

/// A writable byte stream.
pub trait WriteStream: Write + Send {}
impl<T: Write + Send> WriteStream for T {}

/// The three filesystem operations the engine relies on.
pub trait Vfs: Send + Sync {
    /// Creates (or truncates) the file at `path` and returns a write sink.
    fn create(&self, path: &Path) -> io::Result<Box<dyn WriteStream>>;

    /// Opens the file at `path` for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadStream>>;

    /// Removes the file at `path`; `NotFound` when it does not exist.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`Vfs`] over the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsVfs;

impl Vfs for OsVfs {
    fn create(&self, path: &Path) -> io::Result<Box<dyn WriteStream>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(io::BufWriter::new(file)))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadStream>> {
        Ok(Box::new(File::open(path)?))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// An in-memory [`Vfs`].
///
/// Clones share the same file table, so a backend holding one clone and a
/// test holding another observe the same files.
#[derive(Debug, Default, Clone)]
pub struct MemVfs {
    files: Arc<Mutex<HashMap<PathBuf, SharedBuf>>>,
}

impl MemVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a file exists at `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    /// Number of files currently stored.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

impl Vfs for MemVfs {
    fn create(&self, path: &Path) -> io::Result<Box<dyn WriteStream>> {
        let buf: SharedBuf = Arc::new(Mutex::new(Vec::new()));
        self.files
            .lock()
            .insert(path.to_path_buf(), Arc::clone(&buf));
        Ok(Box::new(MemWriter { buf }))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadStream>> {
        let buf = self
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        Ok(Box::new(MemReader { buf, pos: 0 }))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

struct MemWriter {
    buf: SharedBuf,
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct MemReader {
    buf: SharedBuf,
    pos: u64,
}

impl Read for MemReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let buf = self.buf.lock();
        let pos = self.pos.min(buf.len() as u64) as usize;
        let n = out.len().min(buf.len() - pos);
        out[..n].copy_from_slice(&buf[pos..pos + n]);
        drop(buf);

        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MemReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buf.lock().len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }

        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_vfs_round_trip() {
        let vfs = MemVfs::new();
        let path = Path::new("dir/file.dat");

        let mut writer = vfs.create(path).unwrap();
        writer.write_all(b"hello world").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader = vfs.open(path).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_mem_vfs_seek() {
        let vfs = MemVfs::new();
        let path = Path::new("f");

        vfs.create(path).unwrap().write_all(b"0123456789").unwrap();

        let mut reader = vfs.open(path).unwrap();
        assert_eq!(reader.seek(SeekFrom::End(-4)).unwrap(), 6);

        let mut out = [0u8; 4];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"6789");

        assert!(reader.seek(SeekFrom::End(-100)).is_err());
    }

    #[test]
    fn test_mem_vfs_create_truncates() {
        let vfs = MemVfs::new();
        let path = Path::new("f");

        vfs.create(path).unwrap().write_all(b"long content").unwrap();
        vfs.create(path).unwrap().write_all(b"x").unwrap();

        let mut out = Vec::new();
        vfs.open(path).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"x");
    }

    #[test]
    fn test_mem_vfs_missing_files() {
        let vfs = MemVfs::new();
        let path = Path::new("missing");

        assert_eq!(
            vfs.open(path).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            vfs.remove(path).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_mem_vfs_remove() {
        let vfs = MemVfs::new();
        let path = Path::new("f");

        vfs.create(path).unwrap();
        assert!(vfs.contains(path));

        vfs.remove(path).unwrap();
        assert!(!vfs.contains(path));
        assert!(vfs.is_empty());
    }

    #[test]
    fn test_os_vfs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = OsVfs;
        let path = dir.path().join("file.dat");

        let mut writer = vfs.create(&path).unwrap();
        writer.write_all(b"data").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut out = Vec::new();
        vfs.open(&path).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"data");

        vfs.remove(&path).unwrap();
        assert_eq!(
            vfs.open(&path).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
