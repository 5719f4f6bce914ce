//! Filesystem backend capability.
//!
//! The session engine is polymorphic over the set of operations below; any
//! implementation works - local disk, a sandboxed root, an in-memory test
//! double. Backends report failures as [`FsError`], a numeric errno plus a
//! message; the status taxonomy in [`status`](crate::sftp::status) maps
//! those onto SFTP status codes before they reach the wire.

use crate::sftp::types::{DirItem, FileAttributes, OpenMode};
use async_trait::async_trait;
use std::fmt;

/// Backend-native identifier for an open file or directory.
///
/// Minted by the backend on `open`/`opendir` and handed back on every
/// subsequent call. Distinct from the 4-byte wire handle, which indexes the
/// session's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// Error codes reported by filesystem backends.
///
/// Values the status taxonomy special-cases are fixed; the rest of the
/// namespace only needs to be stable within the engine.
pub mod errno {
    /// End of file
    pub const EOF: i32 = 1;
    /// Permission denied
    pub const EACCES: i32 = 3;
    /// Resource temporarily unavailable
    pub const EAGAIN: i32 = 4;
    /// Bad file descriptor
    pub const EBADF: i32 = 9;
    /// Resource busy or locked
    pub const EBUSY: i32 = 10;
    /// Invalid argument
    pub const EINVAL: i32 = 18;
    /// Too many open files
    pub const EMFILE: i32 = 20;
    /// File table overflow
    pub const ENFILE: i32 = 24;
    /// No buffer space available
    pub const ENOBUFS: i32 = 25;
    /// Not enough memory
    pub const ENOMEM: i32 = 26;
    /// Not a directory
    pub const ENOTDIR: i32 = 27;
    /// Illegal operation on a directory
    pub const EISDIR: i32 = 28;
    /// No such file or directory
    pub const ENOENT: i32 = 34;
    /// Function not implemented
    pub const ENOSYS: i32 = 35;
    /// File already exists
    pub const EEXIST: i32 = 47;
    /// File name too long
    pub const ENAMETOOLONG: i32 = 49;
    /// Operation not permitted
    pub const EPERM: i32 = 50;
    /// Too many symbolic links encountered
    pub const ELOOP: i32 = 51;
    /// Cross-device link
    pub const EXDEV: i32 = 52;
    /// Directory not empty
    pub const ENOTEMPTY: i32 = 53;
    /// No space left on device
    pub const ENOSPC: i32 = 54;
    /// I/O error
    pub const EIO: i32 = 55;
    /// Read-only file system
    pub const EROFS: i32 = 56;
    /// No such device
    pub const ENODEV: i32 = 57;
    /// Illegal seek
    pub const ESPIPE: i32 = 58;
    /// Operation canceled
    pub const ECANCELED: i32 = 59;
}

/// A backend filesystem error: numeric errno plus message.
///
/// Errors marked `public` keep their message on the wire even when the
/// errno is not in the taxonomy; everything else degrades to a generic
/// failure message so backend internals never leak to clients.
#[derive(Debug, Clone)]
pub struct FsError {
    /// Errno-style code (see [`errno`])
    pub errno: i32,
    /// Human-readable description
    pub message: String,
    /// Whether the message is safe to send verbatim
    pub public: bool,
}

impl FsError {
    /// Creates an error whose message is internal-only.
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
            public: false,
        }
    }

    /// Creates an error whose message may go to the client verbatim.
    pub fn public(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
            public: true,
        }
    }

    /// End-of-file marker error.
    pub fn eof() -> Self {
        Self::new(errno::EOF, "end of file")
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fs error {}: {}", self.errno, self.message)
    }
}

impl std::error::Error for FsError {}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => errno::ENOENT,
            ErrorKind::PermissionDenied => errno::EACCES,
            ErrorKind::AlreadyExists => errno::EEXIST,
            ErrorKind::WouldBlock => errno::EAGAIN,
            ErrorKind::InvalidInput => errno::EINVAL,
            ErrorKind::UnexpectedEof => errno::EOF,
            ErrorKind::Unsupported => errno::ENOSYS,
            ErrorKind::OutOfMemory => errno::ENOMEM,
            _ => errno::EIO,
        };
        Self::new(code, err.to_string())
    }
}

/// Result type for backend operations.
pub type FsResult<T> = Result<T, FsError>;

/// The filesystem capability consumed by the session engine.
///
/// Paths are raw byte sequences; no encoding is imposed. `read` fills the
/// caller's buffer (the engine passes a slice of the response packet) and
/// reports the byte count. `readdir` yields batches of entries and `None`
/// at end-of-stream.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Opens a file in the given mode, creating it when the mode says so.
    async fn open(
        &self,
        path: &[u8],
        mode: OpenMode,
        attrs: &FileAttributes,
    ) -> FsResult<FileHandle>;

    /// Closes an open file or directory.
    async fn close(&self, handle: FileHandle) -> FsResult<()>;

    /// Reads up to `buf.len()` bytes at `offset` into `buf`.
    async fn read(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize>;

    /// Writes `data` at `offset`.
    async fn write(&self, handle: FileHandle, offset: u64, data: &[u8]) -> FsResult<()>;

    /// Stats a path, following symlinks.
    async fn stat(&self, path: &[u8]) -> FsResult<FileAttributes>;

    /// Stats a path without following symlinks.
    async fn lstat(&self, path: &[u8]) -> FsResult<FileAttributes>;

    /// Stats an open handle.
    async fn fstat(&self, handle: FileHandle) -> FsResult<FileAttributes>;

    /// Applies the populated attribute fields to a path.
    async fn setstat(&self, path: &[u8], attrs: &FileAttributes) -> FsResult<()>;

    /// Applies the populated attribute fields to an open handle.
    async fn fsetstat(&self, handle: FileHandle, attrs: &FileAttributes) -> FsResult<()>;

    /// Opens a directory for listing.
    async fn opendir(&self, path: &[u8]) -> FsResult<FileHandle>;

    /// Returns the next batch of entries, or `None` at end-of-stream.
    async fn readdir(&self, handle: FileHandle) -> FsResult<Option<Vec<DirItem>>>;

    /// Removes a file.
    async fn unlink(&self, path: &[u8]) -> FsResult<()>;

    /// Creates a directory; `attrs` may carry the permissions to apply.
    async fn mkdir(&self, path: &[u8], attrs: &FileAttributes) -> FsResult<()>;

    /// Removes an empty directory.
    async fn rmdir(&self, path: &[u8]) -> FsResult<()>;

    /// Canonicalizes a path.
    async fn realpath(&self, path: &[u8]) -> FsResult<Vec<u8>>;

    /// Renames a file or directory.
    async fn rename(&self, old_path: &[u8], new_path: &[u8]) -> FsResult<()>;

    /// Reads the target of a symbolic link.
    async fn readlink(&self, path: &[u8]) -> FsResult<Vec<u8>>;

    /// Creates a symbolic link at `link_path` pointing to `target`.
    async fn symlink(&self, target: &[u8], link_path: &[u8]) -> FsResult<()>;

    /// Creates a hard link at `new_path` referring to `old_path`.
    async fn link(&self, old_path: &[u8], new_path: &[u8]) -> FsResult<()>;
}
