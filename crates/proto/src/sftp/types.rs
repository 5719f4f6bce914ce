//! SFTP data types and structures.

use crate::sftp::codec::{PacketReader, PacketWriter};
use chrono::{DateTime, Utc};
use skiff_platform::SkiffResult;

/// SFTP status codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation not supported
    OpUnsupported = 8,
}

impl StatusCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns the conventional message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file or directory",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation not supported",
        }
    }
}

/// File open flags (SSH_FXF_*).
#[derive(Debug, Clone, Copy)]
pub struct FileOpenFlags(pub u32);

impl FileOpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: u32 = 0x00000001;
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: u32 = 0x00000002;
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: u32 = 0x00000004;
    /// SSH_FXF_CREAT - Create if doesn't exist
    pub const CREAT: u32 = 0x00000008;
    /// SSH_FXF_TRUNC - Truncate to 0 length
    pub const TRUNC: u32 = 0x00000010;
    /// SSH_FXF_EXCL - Fail if file exists
    pub const EXCL: u32 = 0x00000020;
    /// All defined flag bits
    pub const ALL: u32 = 0x0000003F;
}

/// Backend open mode.
///
/// One protocol `pflags` word decodes to an ordered list of these; see
/// [`open_modes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file for reading.
    Read,
    /// Open an existing file for reading and writing.
    ReadWrite,
    /// Create a new file for writing; fail if it already exists.
    CreateNew,
    /// Create a new file for reading and writing; fail if it already exists.
    CreateNewRead,
    /// Open an existing file for writing and truncate it.
    Truncate,
    /// Open an existing file for reading and writing and truncate it.
    TruncateRead,
    /// Open or create a file whose writes append.
    Append,
    /// Open or create a file whose writes append, readable.
    AppendRead,
}

/// Decodes protocol open flags into an ordered list of backend open modes.
///
/// The session opens each mode in turn, closing the descriptor between
/// attempts; the final open's handle is the one kept. The order therefore
/// encodes a preference (exclusive-create before truncate-existing for
/// create-or-truncate opens). An empty list means the combination is
/// unsupported.
pub fn open_modes(pflags: u32) -> Vec<OpenMode> {
    use FileOpenFlags as F;

    let mut flags = pflags & F::ALL;

    // exclusive create starts from an empty file, truncation is redundant
    if flags & F::EXCL != 0 {
        flags &= !F::TRUNC;
    }
    // truncation and append contradict each other; truncation wins
    if flags & F::TRUNC != 0 {
        flags &= !F::APPEND;
    }
    // create/exclusive/truncate/append all require write intent
    if flags & F::WRITE == 0 {
        flags &= !(F::CREAT | F::EXCL | F::TRUNC | F::APPEND);
    }

    const R: u32 = FileOpenFlags::READ;
    const W: u32 = FileOpenFlags::WRITE;
    const A: u32 = FileOpenFlags::APPEND;
    const C: u32 = FileOpenFlags::CREAT;
    const T: u32 = FileOpenFlags::TRUNC;
    const X: u32 = FileOpenFlags::EXCL;

    const RW: u32 = R | W;
    const WA: u32 = W | A;
    const RWA: u32 = R | W | A;
    const WAC: u32 = W | A | C;
    const RWAC: u32 = R | W | A | C;
    const WC: u32 = W | C;
    const RWC: u32 = R | W | C;
    const WCT: u32 = W | C | T;
    const RWCT: u32 = R | W | C | T;
    const WCX: u32 = W | C | X;
    const RWCX: u32 = R | W | C | X;
    const WACX: u32 = W | A | C | X;
    const RWACX: u32 = R | W | A | C | X;

    match flags {
        R => vec![OpenMode::Read],
        W | RW => vec![OpenMode::ReadWrite],
        WA | WAC => vec![OpenMode::Append],
        RWA | RWAC => vec![OpenMode::AppendRead],
        WC => vec![OpenMode::CreateNew, OpenMode::ReadWrite],
        RWC => vec![OpenMode::CreateNewRead, OpenMode::ReadWrite],
        WCT => vec![OpenMode::CreateNew, OpenMode::Truncate],
        RWCT => vec![OpenMode::CreateNewRead, OpenMode::TruncateRead],
        WCX => vec![OpenMode::CreateNew],
        RWCX => vec![OpenMode::CreateNewRead],
        WACX => vec![OpenMode::CreateNew, OpenMode::Append],
        RWACX => vec![OpenMode::CreateNewRead, OpenMode::AppendRead],
        _ => Vec::new(),
    }
}

/// File mode (permissions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    /// File type mask
    pub const TYPE_MASK: u32 = 0o170000;
    /// Directory
    pub const DIRECTORY: u32 = 0o040000;
    /// Symbolic link
    pub const SYMLINK: u32 = 0o120000;
    /// Regular file
    pub const REGULAR: u32 = 0o100000;

    /// Default file permissions (0644 = rw-r--r--)
    pub const DEFAULT_FILE: u32 = 0o644;
    /// Default directory permissions (0755 = rwxr-xr-x)
    pub const DEFAULT_DIR: u32 = 0o755;

    /// Whether the mode names a directory.
    pub fn is_directory(&self) -> bool {
        self.0 & Self::TYPE_MASK == Self::DIRECTORY
    }
}

/// File attribute flags.
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// File attributes.
///
/// The wire form is a 32-bit flags word followed only by the fields whose
/// flag bits are set; requests and responses share the same block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// User ID
    pub uid: Option<u32>,
    /// Group ID
    pub gid: Option<u32>,
    /// Permissions
    pub permissions: Option<FileMode>,
    /// Access time (Unix timestamp)
    pub atime: Option<u32>,
    /// Modification time (Unix timestamp)
    pub mtime: Option<u32>,
}

impl FileAttributes {
    /// Creates empty attributes (flags word 0 on the wire).
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the flags word for the populated fields.
    pub fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        flags
    }

    /// Serializes the attribute block into a response.
    pub fn write_to(&self, w: &mut PacketWriter) -> SkiffResult<()> {
        w.write_u32(self.flags())?;

        if let Some(size) = self.size {
            w.write_u64(size)?;
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            w.write_u32(uid)?;
            w.write_u32(gid)?;
        }
        if let Some(permissions) = self.permissions {
            w.write_u32(permissions.0)?;
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            w.write_u32(atime)?;
            w.write_u32(mtime)?;
        }
        Ok(())
    }

    /// Parses an attribute block out of a request.
    pub fn read_from(r: &mut PacketReader<'_>) -> SkiffResult<Self> {
        let flags = r.read_u32()?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(r.read_u64()?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            attrs.uid = Some(r.read_u32()?);
            attrs.gid = Some(r.read_u32()?);
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(FileMode(r.read_u32()?));
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            attrs.atime = Some(r.read_u32()?);
            attrs.mtime = Some(r.read_u32()?);
        }

        Ok(attrs)
    }

    /// Estimated wire size of this block in bytes.
    pub fn wire_len(&self) -> usize {
        let flags = self.flags();
        let mut len = 4;
        if flags & AttrFlags::SIZE != 0 {
            len += 8;
        }
        if flags & AttrFlags::UIDGID != 0 {
            len += 8;
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            len += 4;
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            len += 8;
        }
        len
    }
}

/// One directory listing entry.
#[derive(Debug, Clone)]
pub struct DirItem {
    /// Plain filename (no path)
    pub filename: Vec<u8>,
    /// Listing-style line; synthesized from filename + attrs when absent
    pub long_name: Option<Vec<u8>>,
    /// Attributes of the entry
    pub attrs: FileAttributes,
}

impl DirItem {
    /// Creates an entry with no long form.
    pub fn new(filename: impl Into<Vec<u8>>, attrs: FileAttributes) -> Self {
        Self {
            filename: filename.into(),
            long_name: None,
            attrs,
        }
    }

    /// Returns the listing-style line, synthesizing one if the backend did
    /// not supply it.
    pub fn long_form(&self) -> Vec<u8> {
        match &self.long_name {
            Some(line) => line.clone(),
            None => synthesize_long_form(&self.filename, &self.attrs),
        }
    }

    /// Serializes the entry into a `NAME` response.
    pub fn write_to(&self, w: &mut PacketWriter) -> SkiffResult<()> {
        w.write_string(&self.filename)?;
        w.write_string(&self.long_form())?;
        self.attrs.write_to(w)
    }
}

/// Builds an `ls -l` style line from a filename and attributes.
fn synthesize_long_form(filename: &[u8], attrs: &FileAttributes) -> Vec<u8> {
    let mode = attrs.permissions.map(|p| p.0).unwrap_or(0);

    let kind = match mode & FileMode::TYPE_MASK {
        FileMode::DIRECTORY => 'd',
        FileMode::SYMLINK => 'l',
        _ => '-',
    };

    let mut perms = String::with_capacity(10);
    perms.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    let uid = attrs.uid.unwrap_or(0);
    let gid = attrs.gid.unwrap_or(0);
    let size = attrs.size.unwrap_or(0);
    let when = format_mtime(attrs.mtime.unwrap_or(0));

    let mut line = format!("{} {:>3} {:<8} {:<8} {:>8} {} ", perms, 1, uid, gid, size, when)
        .into_bytes();
    line.extend_from_slice(filename);
    line
}

/// Formats an mtime the way `ls -l` does: hour and minute for recent
/// files, year for older ones.
fn format_mtime(mtime: u32) -> String {
    const SIX_MONTHS_SECS: i64 = 182 * 24 * 60 * 60;

    let when =
        DateTime::<Utc>::from_timestamp(i64::from(mtime), 0).unwrap_or(DateTime::UNIX_EPOCH);
    let age = Utc::now().signed_duration_since(when).num_seconds();

    if (0..SIX_MONTHS_SECS).contains(&age) {
        when.format("%b %e %H:%M").to_string()
    } else {
        when.format("%b %e  %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_conversion() {
        assert_eq!(StatusCode::from_u32(0), Some(StatusCode::Ok));
        assert_eq!(StatusCode::from_u32(2), Some(StatusCode::NoSuchFile));
        assert_eq!(StatusCode::from_u32(8), Some(StatusCode::OpUnsupported));
        assert_eq!(StatusCode::from_u32(999), None);
    }

    #[test]
    fn test_attributes_round_trip() {
        let mut attrs = FileAttributes::new();
        attrs.size = Some(1024);
        attrs.permissions = Some(FileMode(0o644));

        let mut w = PacketWriter::new();
        w.start(crate::sftp::message::SftpMessageType::Attrs, Some(1));
        attrs.write_to(&mut w).unwrap();
        let bytes = w.finish().to_vec();

        let mut r = PacketReader::new(&bytes[9..]);
        let parsed = FileAttributes::read_from(&mut r).unwrap();

        assert_eq!(parsed, attrs);
        assert_eq!(r.remaining(), 0);
        assert_eq!(attrs.wire_len(), bytes.len() - 9);
    }

    #[test]
    fn test_attributes_empty_block() {
        let attrs = FileAttributes::new();
        assert_eq!(attrs.flags(), 0);
        assert_eq!(attrs.wire_len(), 4);
    }

    #[test]
    fn test_attributes_uid_without_gid_not_flagged() {
        let mut attrs = FileAttributes::new();
        attrs.uid = Some(1000);
        assert_eq!(attrs.flags(), 0);
    }

    #[test]
    fn test_open_modes_read_write() {
        use FileOpenFlags as F;

        assert_eq!(open_modes(F::READ), vec![OpenMode::Read]);
        assert_eq!(open_modes(F::READ | F::WRITE), vec![OpenMode::ReadWrite]);
        assert_eq!(open_modes(F::WRITE), vec![OpenMode::ReadWrite]);
    }

    #[test]
    fn test_open_modes_create_or_truncate_prefers_exclusive() {
        use FileOpenFlags as F;

        assert_eq!(
            open_modes(F::WRITE | F::CREAT | F::TRUNC),
            vec![OpenMode::CreateNew, OpenMode::Truncate]
        );
        assert_eq!(
            open_modes(F::READ | F::WRITE | F::CREAT | F::TRUNC),
            vec![OpenMode::CreateNewRead, OpenMode::TruncateRead]
        );
    }

    #[test]
    fn test_open_modes_exclusive_drops_truncate() {
        use FileOpenFlags as F;

        assert_eq!(
            open_modes(F::WRITE | F::CREAT | F::TRUNC | F::EXCL),
            vec![OpenMode::CreateNew]
        );
    }

    #[test]
    fn test_open_modes_append() {
        use FileOpenFlags as F;

        assert_eq!(
            open_modes(F::WRITE | F::APPEND | F::CREAT),
            vec![OpenMode::Append]
        );
        assert_eq!(
            open_modes(F::READ | F::WRITE | F::APPEND | F::CREAT),
            vec![OpenMode::AppendRead]
        );
    }

    #[test]
    fn test_open_modes_unsupported() {
        use FileOpenFlags as F;

        assert!(open_modes(0).is_empty());
        // truncate without write intent normalizes to nothing
        assert!(open_modes(F::TRUNC).is_empty());
    }

    #[test]
    fn test_long_form_synthesis() {
        let mut attrs = FileAttributes::new();
        attrs.size = Some(420);
        attrs.uid = Some(1000);
        attrs.gid = Some(100);
        attrs.permissions = Some(FileMode(FileMode::DIRECTORY | 0o755));
        attrs.atime = Some(0);
        attrs.mtime = Some(0);

        let item = DirItem::new(&b"projects"[..], attrs);
        let line = String::from_utf8(item.long_form()).unwrap();

        assert!(line.starts_with("drwxr-xr-x"), "line was: {}", line);
        assert!(line.contains("420"));
        assert!(line.ends_with("projects"));
    }

    #[test]
    fn test_long_form_passthrough() {
        let item = DirItem {
            filename: b"x".to_vec(),
            long_name: Some(b"-rw-r--r-- 1 u g 0 Jan  1  1970 x".to_vec()),
            attrs: FileAttributes::new(),
        };
        assert_eq!(item.long_form(), b"-rw-r--r-- 1 u g 0 Jan  1  1970 x");
    }
}
