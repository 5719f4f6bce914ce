//! SFTP protocol message types and wire constants.

/// SFTP protocol version (v3).
pub const SFTP_VERSION: u32 = 3;

/// Maximum accepted total packet length in bytes.
///
/// Requests whose declared length exceeds this are answered with a
/// `BAD_MESSAGE` status and otherwise ignored; the session continues.
pub const MAX_PACKET_LEN: usize = 66_000;

/// Extension name for the hardlink extended request.
///
/// The only non-standard extension this engine recognizes; it behaves as a
/// two-path link operation.
pub const EXT_HARDLINK: &str = "hardlink@openssh.com";

/// SFTP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SftpMessageType {
    /// SSH_FXP_INIT - Initialize SFTP session
    Init = 1,
    /// SSH_FXP_VERSION - Version response
    Version = 2,
    /// SSH_FXP_OPEN - Open file
    Open = 3,
    /// SSH_FXP_CLOSE - Close file/directory
    Close = 4,
    /// SSH_FXP_READ - Read from file
    Read = 5,
    /// SSH_FXP_WRITE - Write to file
    Write = 6,
    /// SSH_FXP_LSTAT - Get file attributes (no follow symlinks)
    LStat = 7,
    /// SSH_FXP_FSTAT - Get file attributes by handle
    FStat = 8,
    /// SSH_FXP_SETSTAT - Set file attributes
    SetStat = 9,
    /// SSH_FXP_FSETSTAT - Set file attributes by handle
    FSetStat = 10,
    /// SSH_FXP_OPENDIR - Open directory
    OpenDir = 11,
    /// SSH_FXP_READDIR - Read directory
    ReadDir = 12,
    /// SSH_FXP_REMOVE - Remove file
    Remove = 13,
    /// SSH_FXP_MKDIR - Create directory
    MkDir = 14,
    /// SSH_FXP_RMDIR - Remove directory
    RmDir = 15,
    /// SSH_FXP_REALPATH - Canonicalize path
    RealPath = 16,
    /// SSH_FXP_STAT - Get file attributes
    Stat = 17,
    /// SSH_FXP_RENAME - Rename file/directory
    Rename = 18,
    /// SSH_FXP_READLINK - Read symbolic link
    ReadLink = 19,
    /// SSH_FXP_SYMLINK - Create symbolic link
    Symlink = 20,

    // Response messages
    /// SSH_FXP_STATUS - Status response
    Status = 101,
    /// SSH_FXP_HANDLE - File handle response
    Handle = 102,
    /// SSH_FXP_DATA - Data response
    Data = 103,
    /// SSH_FXP_NAME - Name response
    Name = 104,
    /// SSH_FXP_ATTRS - Attributes response
    Attrs = 105,

    // Extended messages
    /// SSH_FXP_EXTENDED - Extended request
    Extended = 200,
    /// SSH_FXP_EXTENDED_REPLY - Extended response
    ExtendedReply = 201,
}

impl SftpMessageType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            7 => Some(Self::LStat),
            8 => Some(Self::FStat),
            9 => Some(Self::SetStat),
            10 => Some(Self::FSetStat),
            11 => Some(Self::OpenDir),
            12 => Some(Self::ReadDir),
            13 => Some(Self::Remove),
            14 => Some(Self::MkDir),
            15 => Some(Self::RmDir),
            16 => Some(Self::RealPath),
            17 => Some(Self::Stat),
            18 => Some(Self::Rename),
            19 => Some(Self::ReadLink),
            20 => Some(Self::Symlink),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            104 => Some(Self::Name),
            105 => Some(Self::Attrs),
            200 => Some(Self::Extended),
            201 => Some(Self::ExtendedReply),
            _ => None,
        }
    }

    /// Whether the first payload field of this request is a file handle.
    ///
    /// Handle-bound requests are serialized per handle: at most one is in
    /// flight against the backend at any time, the rest wait in FIFO order.
    pub fn is_handle_bound(self) -> bool {
        matches!(
            self,
            Self::Close | Self::Read | Self::Write | Self::FStat | Self::FSetStat | Self::ReadDir
        )
    }
}
