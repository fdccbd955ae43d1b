//! `FileLocator`: the capability for resolving and opening named streams,
//! switchable between the host filesystem and an in-virtual-disk
//! filesystem, so the codecs in `vmdk`, `ldm` and `ntfs` are agnostic to
//! where the bytes backing them actually live.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Seekable, length-known, positional byte stream. Any concrete stream a
/// `FileLocator::open` call hands back implements this; callers own the
/// stream they open and drop it (closing it) on every exit path.
pub trait ByteStream: Read + Write + Seek + Send {
    fn len(&self) -> io::Result<u64>;
}

impl ByteStream for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// Mirrors `System.IO.FileMode` as used by the source's `FileLocator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    CreateNew,
    Create,
    Open,
    OpenOrCreate,
    Truncate,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShare {
    None,
    Read,
    Write,
    ReadWrite,
    Delete,
}

/// Capability for resolving and opening named streams. Immutable; composes
/// by path join via `relative`.
pub trait FileLocator: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    fn open(
        &self,
        name: &str,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
    ) -> Result<Box<dyn ByteStream>>;

    /// Returns a locator rooted at `self`'s path joined with `path`.
    fn relative(&self, path: &str) -> Result<Box<dyn FileLocator>>;
}

/// Platform-neutral `/`-separated path join: collapses consecutive
/// separators and discards empty segments.
fn join_path(base: &str, extra: &str) -> String {
    let mut segments: Vec<&str> = base
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    segments.extend(extra.split('/').filter(|s| !s.is_empty()));
    segments.join("/")
}

/// A `FileLocator` rooted at a directory on the host filesystem.
#[derive(Clone)]
pub struct HostFileLocator {
    root: PathBuf,
}

impl HostFileLocator {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        HostFileLocator { root: root.into() }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(Path::new(name))
    }
}

impl FileLocator for HostFileLocator {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    fn open(
        &self,
        name: &str,
        mode: FileMode,
        access: FileAccess,
        _share: FileShare,
    ) -> Result<Box<dyn ByteStream>> {
        let path = self.resolve(name);
        let mut options = OpenOptions::new();
        match access {
            FileAccess::Read => {
                options.read(true);
            }
            FileAccess::Write => {
                options.write(true);
            }
            FileAccess::ReadWrite => {
                options.read(true).write(true);
            }
        }
        match mode {
            FileMode::CreateNew => {
                options.create_new(true);
            }
            FileMode::Create => {
                options.create(true).truncate(true);
            }
            FileMode::Open => {
                if !path.exists() {
                    return Err(Error::NotFound(name.to_string()));
                }
            }
            FileMode::OpenOrCreate => {
                options.create(true);
            }
            FileMode::Truncate => {
                options.create(true).truncate(true);
            }
            FileMode::Append => {
                options.create(true).append(true);
            }
        }
        let file = options.open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(name.to_string()),
            io::ErrorKind::PermissionDenied => Error::AccessDenied(name.to_string()),
            _ => Error::Io(e),
        })?;
        Ok(Box::new(file))
    }

    fn relative(&self, path: &str) -> Result<Box<dyn FileLocator>> {
        Ok(Box::new(HostFileLocator::new(self.resolve(path))))
    }
}

/// Capability an in-virtual-disk filesystem (e.g. an NTFS volume) exposes
/// to back a [`DiscFileLocator`]. This crate provides only the trait
/// boundary: the NTFS attribute model here stops short of a full directory
/// tree (see Non-goals), so there is no built-in implementor.
pub trait VirtualFilesystem: Send + Sync {
    fn vfs_exists(&self, path: &str) -> bool;

    fn vfs_open(
        &self,
        path: &str,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
    ) -> Result<Box<dyn ByteStream>>;
}

/// A `FileLocator` rooted at a base path inside a shared, externally-owned
/// in-disk filesystem object. The locator never owns the filesystem: it is
/// an `Arc` so locators derived via `relative` keep sharing it.
#[derive(Clone)]
pub struct DiscFileLocator {
    fs: Arc<dyn VirtualFilesystem>,
    base_path: String,
}

impl DiscFileLocator {
    pub fn new(fs: Arc<dyn VirtualFilesystem>, base_path: impl Into<String>) -> Self {
        DiscFileLocator {
            fs,
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, name: &str) -> String {
        join_path(&self.base_path, name)
    }
}

impl FileLocator for DiscFileLocator {
    fn exists(&self, name: &str) -> bool {
        self.fs.vfs_exists(&self.resolve(name))
    }

    fn open(
        &self,
        name: &str,
        mode: FileMode,
        access: FileAccess,
        share: FileShare,
    ) -> Result<Box<dyn ByteStream>> {
        self.fs.vfs_open(&self.resolve(name), mode, access, share)
    }

    fn relative(&self, path: &str) -> Result<Box<dyn FileLocator>> {
        Ok(Box::new(DiscFileLocator {
            fs: Arc::clone(&self.fs),
            base_path: self.resolve(path),
        }))
    }
}

/// A clamped view over a fraction of a `Read + Seek` stream: `[start,
/// start+len)` of the underlying stream behaves as a standalone stream
/// starting at position 0. Used to treat a single VMDK extent file, or a
/// single LDM/NTFS record block, as a self-contained byte range.
pub struct BoundedStream<S> {
    inner: S,
    start: u64,
    len: u64,
    pos: u64,
}

impl<S: Read + Seek> BoundedStream<S> {
    pub fn new(mut inner: S, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(BoundedStream {
            inner,
            start,
            len,
            pos: 0,
        })
    }
}

impl<S: Read + Seek> Read for BoundedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let max = std::cmp::min(buf.len() as u64, self.len - self.pos) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: Read + Seek> Seek for BoundedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => self.pos as i64 + off,
            SeekFrom::End(off) => self.len as i64 + off,
        };
        if new_pos < 0 || new_pos as u64 > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek out of bounded range",
            ));
        }
        self.inner.seek(SeekFrom::Start(self.start + new_pos as u64))?;
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn join_path_collapses_separators() {
        assert_eq!(join_path("a/", "/b//c"), "a/b/c");
        assert_eq!(join_path("", "x"), "x");
    }

    #[test]
    fn bounded_stream_clamps_reads() {
        let data = Cursor::new(b"0123456789".to_vec());
        let mut s = BoundedStream::new(data, 2, 4).unwrap();
        let mut buf = [0u8; 10];
        let n = s.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"2345");
        assert_eq!(s.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn host_locator_relative_composes_paths() {
        let dir = std::env::temp_dir().join(format!("exhume_body_test_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("a/b")).unwrap();
        std::fs::write(dir.join("a/b/file.txt"), b"hello").unwrap();

        let root = HostFileLocator::new(&dir);
        let joined = root.relative("a").unwrap().relative("b").unwrap();
        let direct = root.relative("a/b").unwrap();

        let mut s1 = joined
            .open("file.txt", FileMode::Open, FileAccess::Read, FileShare::Read)
            .unwrap();
        let mut s2 = direct
            .open("file.txt", FileMode::Open, FileAccess::Read, FileShare::Read)
            .unwrap();
        let mut b1 = Vec::new();
        let mut b2 = Vec::new();
        s1.read_to_end(&mut b1).unwrap();
        s2.read_to_end(&mut b2).unwrap();
        assert_eq!(b1, b2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
