//! Platform handles that can travel alongside a message
//!
//! On Unix a handle is an owned file descriptor passed with `SCM_RIGHTS`.
//! On Windows it is an owned handle the sender duplicates into the target
//! process before the message leaves.

#[cfg(unix)]
pub use unix::TransferableHandle;

#[cfg(windows)]
pub use windows_impl::TransferableHandle;

#[cfg(unix)]
mod unix {
    use crate::error::HandleError;
    use std::fs::File;
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

    /// An owned descriptor attached to a message
    ///
    /// Closed exactly once: when sent (after the kernel has taken its copy)
    /// or when the message carrying it is dropped.
    #[derive(Debug)]
    pub struct TransferableHandle {
        fd: OwnedFd,
    }

    impl TransferableHandle {
        /// Wraps a descriptor for transfer
        ///
        /// Directories are refused: a directory descriptor in a sandboxed
        /// child can be walked upwards with `openat`.
        pub fn from_fd(fd: OwnedFd) -> Result<Self, HandleError> {
            let file = File::from(fd);
            if file.metadata()?.is_dir() {
                return Err(HandleError::Directory);
            }
            Ok(Self {
                fd: OwnedFd::from(file),
            })
        }

        pub(crate) fn from_received(fd: OwnedFd) -> Self {
            Self { fd }
        }

        pub fn try_clone(&self) -> Result<Self, HandleError> {
            Ok(Self {
                fd: self.fd.try_clone()?,
            })
        }

        pub fn into_fd(self) -> OwnedFd {
            self.fd
        }

        pub fn into_file(self) -> File {
            File::from(self.fd)
        }
    }

    impl AsFd for TransferableHandle {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.fd.as_fd()
        }
    }

    impl AsRawFd for TransferableHandle {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

    impl From<File> for TransferableHandle {
        fn from(file: File) -> Self {
            Self {
                fd: OwnedFd::from(file),
            }
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use crate::error::HandleError;
    use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle, OwnedHandle};
    use windows::Win32::Foundation::{DuplicateHandle, BOOL, DUPLICATE_SAME_ACCESS, HANDLE};
    use windows::Win32::System::Threading::GetCurrentProcess;

    /// An owned handle attached to a message
    #[derive(Debug)]
    pub struct TransferableHandle {
        handle: OwnedHandle,
    }

    impl TransferableHandle {
        pub fn from_handle(handle: OwnedHandle) -> Self {
            Self { handle }
        }

        pub fn try_clone(&self) -> Result<Self, HandleError> {
            Ok(Self {
                handle: self.handle.try_clone()?,
            })
        }

        /// Duplicates the handle into `target_process`
        ///
        /// Returns the raw handle value valid inside the target. The target
        /// process handle needs `PROCESS_DUP_HANDLE` access.
        pub fn duplicate_into(&self, target_process: BorrowedHandle<'_>) -> Result<usize, HandleError> {
            let mut target = HANDLE::default();
            unsafe {
                DuplicateHandle(
                    GetCurrentProcess(),
                    HANDLE(self.handle.as_raw_handle()),
                    HANDLE(target_process.as_raw_handle()),
                    &mut target,
                    0,
                    BOOL(0),
                    DUPLICATE_SAME_ACCESS,
                )?;
            }
            Ok(target.0 as usize)
        }

        pub fn into_handle(self) -> OwnedHandle {
            self.handle
        }
    }

    impl AsHandle for TransferableHandle {
        fn as_handle(&self) -> BorrowedHandle<'_> {
            self.handle.as_handle()
        }
    }
}
