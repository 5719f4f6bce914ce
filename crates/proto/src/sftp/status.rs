//! Status taxonomy: backend errno to SFTP status code mapping.
//!
//! Backend errors carry a numeric errno; the table here decides which
//! `SSH_FX_*` code and message a client sees. The table is minimum
//! coverage: any errno it does not know becomes a generic `FAILURE`
//! (keeping the backend's own message only when the error is marked
//! public), and never tears the session down.

use crate::sftp::fs::{errno, FsError};
use crate::sftp::types::StatusCode;
use std::borrow::Cow;

/// Maps a backend error onto the SFTP status code and message to send.
pub fn status_for(err: &FsError) -> (StatusCode, Cow<'static, str>) {
    match err.errno {
        errno::EOF => (StatusCode::Eof, Cow::Borrowed("End of file")),
        errno::EACCES => (
            StatusCode::PermissionDenied,
            Cow::Borrowed("Permission denied"),
        ),
        // ENOENT appears under several numbering schemes depending on the
        // backend's origin platform
        errno::ENOENT | -2 | -4058 => (
            StatusCode::NoSuchFile,
            Cow::Borrowed("No such file or directory"),
        ),
        errno::ENOSYS => (
            StatusCode::OpUnsupported,
            Cow::Borrowed("Function not implemented"),
        ),
        errno::ENODEV => (StatusCode::NoSuchFile, Cow::Borrowed("No such device")),
        errno::EAGAIN => (
            StatusCode::Failure,
            Cow::Borrowed("Resource temporarily unavailable"),
        ),
        errno::EBADF => (StatusCode::Failure, Cow::Borrowed("Bad file descriptor")),
        errno::EBUSY => (StatusCode::Failure, Cow::Borrowed("Resource busy or locked")),
        errno::EINVAL => (StatusCode::Failure, Cow::Borrowed("Invalid argument")),
        errno::EMFILE => (StatusCode::Failure, Cow::Borrowed("Too many open files")),
        errno::ENFILE => (StatusCode::Failure, Cow::Borrowed("File table overflow")),
        errno::ENOBUFS => (
            StatusCode::Failure,
            Cow::Borrowed("No buffer space available"),
        ),
        errno::ENOMEM => (StatusCode::Failure, Cow::Borrowed("Not enough memory")),
        errno::ENOTDIR => (StatusCode::Failure, Cow::Borrowed("Not a directory")),
        errno::EISDIR => (
            StatusCode::Failure,
            Cow::Borrowed("Illegal operation on a directory"),
        ),
        errno::EEXIST => (StatusCode::Failure, Cow::Borrowed("File already exists")),
        errno::ENAMETOOLONG => (StatusCode::Failure, Cow::Borrowed("File name too long")),
        errno::EPERM => (StatusCode::Failure, Cow::Borrowed("Operation not permitted")),
        errno::ELOOP => (
            StatusCode::Failure,
            Cow::Borrowed("Too many symbolic links encountered"),
        ),
        errno::EXDEV => (StatusCode::Failure, Cow::Borrowed("Cross-device link")),
        errno::ENOTEMPTY => (StatusCode::Failure, Cow::Borrowed("Directory not empty")),
        errno::ENOSPC => (
            StatusCode::Failure,
            Cow::Borrowed("No space left on device"),
        ),
        errno::EIO => (StatusCode::Failure, Cow::Borrowed("I/O error")),
        errno::EROFS => (StatusCode::Failure, Cow::Borrowed("Read-only file system")),
        errno::ESPIPE => (StatusCode::Failure, Cow::Borrowed("Illegal seek")),
        errno::ECANCELED => (StatusCode::Failure, Cow::Borrowed("Operation canceled")),
        _ if err.public => (StatusCode::Failure, Cow::Owned(err.message.clone())),
        _ => (StatusCode::Failure, Cow::Borrowed("Failure")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_cased_errnos() {
        let (code, msg) = status_for(&FsError::eof());
        assert_eq!(code, StatusCode::Eof);
        assert_eq!(msg, "End of file");

        let (code, msg) = status_for(&FsError::new(errno::EACCES, "x"));
        assert_eq!(code, StatusCode::PermissionDenied);
        assert_eq!(msg, "Permission denied");

        let (code, _) = status_for(&FsError::new(errno::ENOSYS, "x"));
        assert_eq!(code, StatusCode::OpUnsupported);

        let (code, msg) = status_for(&FsError::new(errno::ENODEV, "x"));
        assert_eq!(code, StatusCode::NoSuchFile);
        assert_eq!(msg, "No such device");
    }

    #[test]
    fn test_enoent_variants() {
        for code in [errno::ENOENT, -2, -4058] {
            let (status, msg) = status_for(&FsError::new(code, "whatever"));
            assert_eq!(status, StatusCode::NoSuchFile);
            assert_eq!(msg, "No such file or directory");
        }
    }

    #[test]
    fn test_descriptive_failures() {
        let (code, msg) = status_for(&FsError::new(errno::ENOTEMPTY, "x"));
        assert_eq!(code, StatusCode::Failure);
        assert_eq!(msg, "Directory not empty");

        let (code, msg) = status_for(&FsError::new(errno::EROFS, "x"));
        assert_eq!(code, StatusCode::Failure);
        assert_eq!(msg, "Read-only file system");
    }

    #[test]
    fn test_unmapped_errno_is_generic() {
        let (code, msg) = status_for(&FsError::new(-9999, "secret backend detail"));
        assert_eq!(code, StatusCode::Failure);
        assert_eq!(msg, "Failure");
    }

    #[test]
    fn test_unmapped_public_error_keeps_message() {
        let (code, msg) = status_for(&FsError::public(-9999, "quota exceeded for user"));
        assert_eq!(code, StatusCode::Failure);
        assert_eq!(msg, "quota exceeded for user");
    }
}
