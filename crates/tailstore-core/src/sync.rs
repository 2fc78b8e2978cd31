//! Durable sync for WAL segments and their directory
//!
//! `sync_file` maps to the strongest data-durability primitive on each
//! platform. `sync_dir` makes renames and unlinks inside a directory
//! durable, which compaction relies on.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush file data to persistent media before returning.
///
/// - Linux: `fdatasync()` (data only, skips metadata like mtime)
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`; plain fsync stops at the drive cache there
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
///
/// May block for a long time under heavy I/O. Do not call while holding the
/// index lock.
pub fn sync_file(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        // fdatasync skips metadata (atime, mtime); replay only needs the bytes.
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File`, so it is open for the whole call.
        let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        // fsync on Apple platforms stops at the drive's volatile cache, which
        // a power cut loses. F_FULLFSYNC pushes through to the media.
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File`, so it is open for the whole call.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        // FlushFileBuffers flushes the OS buffers and asks the device to flush.
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live `File`.
        let rc = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        // Nonzero means success here, unlike the POSIX calls.
        if rc != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        // FreeBSD and others: std picks the platform's data-sync primitive.
        file.sync_data()
    }
}

/// Persist directory entries (new, renamed or removed segment files).
///
/// Windows has no directory handle fsync; NTFS journals the metadata, so
/// this is a no-op there.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        // A rename or unlink lives in the directory inode, not the file, so
        // the directory itself has to be synced for it to survive a crash.
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
